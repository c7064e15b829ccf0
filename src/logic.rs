//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - Document upload (type resolution + text extraction + new session)
//!   - Summary and ask-anything (with verified supporting evidence)
//!   - Challenge creation, MCQ grading, open-answer evaluation and scoring
//!   - Connection test against the completion service

use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::completion::{Completer, CompletionRequest, CompletionResult};
use crate::config::Prompts;
use crate::domain::{
  Challenge, ChatRole, ChatTurn, McqGrade, McqQuestion, OpenFeedback, OptionLabel, QuizMode, QuizQuestion, Scoreboard,
};
use crate::error::ApiError;
use crate::evidence::extract_evidence;
use crate::extract::{extract_text, resolve_kind, ExtractError};
use crate::protocol::{DocumentOut, McqResultOut, OpenResultOut};
use crate::quiz::generate_quiz;
use crate::state::AppState;
use crate::util::{clip_chars, fill_template};

const SUMMARY_INPUT_CHARS: usize = 3000;
const SUMMARY_TEMPERATURE: f64 = 0.3;
const SUMMARY_MAX_TOKENS: u32 = 200;

const ASK_INPUT_CHARS: usize = 2500;
const ASK_TEMPERATURE: f64 = 0.2;
const ASK_MAX_TOKENS: u32 = 400;

const EVAL_TEMPERATURE: f64 = 0.3;
const EVAL_MAX_TOKENS: u32 = 300;

const PREVIEW_CHARS: usize = 500;
const POINTS_PER_QUESTION: f32 = 10.0;

fn score_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"(?i)score[\s:*]*(\d+(?:\.\d+)?)\s*/\s*10").expect("score pattern"))
}

// -------- Model-backed operations (no session state) --------

/// Summary of at most ~150 words. On failure, the failure message is returned as the text.
#[instrument(level = "info", skip_all, fields(text_len = text.len()))]
pub async fn generate_summary(completer: &dyn Completer, prompts: &Prompts, text: &str) -> String {
  let prompt = fill_template(&prompts.summary, &[("text", &clip_chars(text, SUMMARY_INPUT_CHARS))]);
  completer
    .complete(&CompletionRequest::new(prompt, SUMMARY_TEMPERATURE, SUMMARY_MAX_TOKENS))
    .await
    .into_display_text()
}

/// Answer a question about the document plus quotes verified against it.
#[instrument(level = "info", skip_all, fields(text_len = text.len(), question_len = question.len()))]
pub async fn ask_anything(
  completer: &dyn Completer,
  prompts: &Prompts,
  text: &str,
  question: &str,
) -> (String, Vec<String>) {
  let context = clip_chars(text, ASK_INPUT_CHARS);
  let prompt = fill_template(&prompts.ask, &[("text", &context), ("question", question)]);
  match completer.complete(&CompletionRequest::new(prompt, ASK_TEMPERATURE, ASK_MAX_TOKENS)).await {
    CompletionResult::Success(answer) => {
      let evidence = extract_evidence(&answer, &context);
      debug!(target: "research_assistant", evidence = evidence.len(), "Answer evidence extracted");
      (answer, evidence)
    }
    CompletionResult::Failure(message) => (message, Vec::new()),
  }
}

/// Have the model grade an open answer; the "Score: X/10" line is parsed when present.
#[instrument(level = "info", skip_all, fields(answer_len = answer.len()))]
pub async fn evaluate_open_answer(
  completer: &dyn Completer,
  prompts: &Prompts,
  question: &str,
  answer: &str,
) -> OpenFeedback {
  let prompt = fill_template(&prompts.evaluate_open, &[("question", question), ("answer", answer)]);
  match completer.complete(&CompletionRequest::new(prompt, EVAL_TEMPERATURE, EVAL_MAX_TOKENS)).await {
    CompletionResult::Success(feedback) => {
      let points = parse_score(&feedback);
      OpenFeedback { feedback, points }
    }
    CompletionResult::Failure(message) => OpenFeedback { feedback: message, points: None },
  }
}

/// "Score: 7/10" → 7.0, clamped to 0..=10.
pub fn parse_score(feedback: &str) -> Option<f32> {
  score_re()
    .captures(feedback)
    .and_then(|c| c.get(1))
    .and_then(|m| m.as_str().parse::<f32>().ok())
    .map(|v| v.clamp(0.0, POINTS_PER_QUESTION))
}

/// The selected label is the first non-space character of the choice ("B) Paris" → B).
pub fn grade_mcq(question: &McqQuestion, choice: &str) -> Option<McqGrade> {
  let first = choice.trim_start().chars().next()?;
  let selected = OptionLabel::parse(&first.to_string())?;
  Some(McqGrade { selected, correct: selected == question.correct_answer })
}

/// Running score: 10 points per answered MCQ / evaluated open answer.
pub fn scoreboard(challenge: &Challenge) -> Scoreboard {
  let mut total = 0.0;
  let mut max = 0.0;
  for grade in challenge.mcq_grades.values() {
    max += POINTS_PER_QUESTION;
    if grade.correct { total += POINTS_PER_QUESTION; }
  }
  for fb in challenge.open_feedback.values() {
    max += POINTS_PER_QUESTION;
    total += fb.points.unwrap_or(0.0);
  }

  let percentage = if max > 0.0 { total / max * 100.0 } else { 0.0 };
  let verdict = if max <= 0.0 {
    None
  } else if percentage >= 80.0 {
    Some("Excellent work!".to_string())
  } else if percentage >= 60.0 {
    Some("Good job!".to_string())
  } else {
    Some("Keep studying!".to_string())
  };
  Scoreboard { total, max, percentage, verdict }
}

pub fn preview(text: &str) -> String {
  clip_chars(text, PREVIEW_CHARS)
}

// -------- Session-aware operations used by the handlers --------

#[instrument(level = "info", skip(state, bytes), fields(bytes = bytes.len()))]
pub async fn do_upload(
  state: &AppState,
  file_name: &str,
  mime: Option<&str>,
  bytes: Vec<u8>,
) -> Result<DocumentOut, ApiError> {
  let kind = resolve_kind(mime, Some(file_name)).map_err(|e| {
    if let ExtractError::Unsupported { declared } = &e {
      warn!(target: "research_assistant", %declared, file = %file_name, "Rejected upload type");
    }
    e
  })?;
  let text = tokio::task::spawn_blocking(move || extract_text(kind, bytes))
    .await
    .map_err(|e| {
      warn!(target: "research_assistant", error = %e, "Extraction task failed");
      ApiError::Internal
    })??;

  let chars = text.chars().count();
  let preview = preview(&text);
  let session_id = state.create_session(file_name, text).await;
  info!(target: "research_assistant", session = %session_id, chars, "Document uploaded and text extracted");
  Ok(DocumentOut { session_id, name: file_name.to_string(), chars, preview })
}

#[instrument(level = "info", skip(state))]
pub async fn do_summary(state: &AppState, session_id: &str) -> Result<String, ApiError> {
  let (name, text) = state
    .with_session(session_id, |s| Ok((s.document_name.clone(), s.document_text.clone())))
    .await?;
  let summary = generate_summary(state.completer.as_ref(), &state.prompts, &text).await;
  info!(target: "research_assistant", session = %session_id, document = %name, "Summary generated");
  Ok(summary)
}

#[instrument(level = "info", skip(state, question), fields(question_len = question.len()))]
pub async fn do_ask(state: &AppState, session_id: &str, question: &str) -> Result<(String, Vec<String>), ApiError> {
  let question = question.trim();
  if question.is_empty() {
    return Err(ApiError::BadRequest("Question must not be empty.".into()));
  }
  let text = state.document_text(session_id).await?;
  let (answer, evidence) = ask_anything(state.completer.as_ref(), &state.prompts, &text, question).await;

  state
    .push_turns(session_id, vec![
      ChatTurn { role: ChatRole::User, content: question.to_string(), evidence: Vec::new() },
      ChatTurn { role: ChatRole::Assistant, content: answer.clone(), evidence: evidence.clone() },
    ])
    .await?;
  Ok((answer, evidence))
}

#[instrument(level = "info", skip(state, mode), fields(%mode))]
pub async fn do_new_challenge(state: &AppState, session_id: &str, mode: QuizMode) -> Result<Vec<QuizQuestion>, ApiError> {
  let text = state.document_text(session_id).await?;
  let questions = generate_quiz(state.completer.as_ref(), &state.prompts, &text, mode).await;
  state.set_challenge(session_id, Challenge::new(mode, questions.clone())).await?;
  info!(target: "quiz", session = %session_id, count = questions.len(), "Challenge started");
  Ok(questions)
}

#[instrument(level = "info", skip(state, choice))]
pub async fn do_answer_mcq(state: &AppState, session_id: &str, index: usize, choice: &str) -> Result<McqResultOut, ApiError> {
  state
    .with_session_mut(session_id, |s| {
      let challenge = s.challenge.as_mut().ok_or(ApiError::NoChallenge)?;
      let question = match challenge.questions.get(index) {
        Some(QuizQuestion::MultipleChoice(q)) => q.clone(),
        Some(QuizQuestion::OpenEnded(_)) => return Err(ApiError::NotMultipleChoice(index)),
        None => return Err(ApiError::QuestionOutOfRange(index)),
      };
      let grade = grade_mcq(&question, choice).ok_or_else(|| ApiError::InvalidChoice(choice.trim().to_string()))?;
      let correct = grade.correct;
      challenge.mcq_grades.insert(index, grade);
      Ok(McqResultOut {
        correct,
        correct_answer: question.correct_answer,
        explanation: question.explanation,
        score: scoreboard(challenge),
      })
    })
    .await
}

#[instrument(level = "info", skip(state, answer), fields(answer_len = answer.len()))]
pub async fn do_evaluate_open(state: &AppState, session_id: &str, index: usize, answer: &str) -> Result<OpenResultOut, ApiError> {
  let answer = answer.trim();
  if answer.is_empty() {
    return Err(ApiError::BadRequest("Answer must not be empty.".into()));
  }
  let question = state
    .with_session(session_id, |s| {
      let challenge = s.challenge.as_ref().ok_or(ApiError::NoChallenge)?;
      match challenge.questions.get(index) {
        Some(QuizQuestion::OpenEnded(q)) => Ok(q.question.clone()),
        Some(QuizQuestion::MultipleChoice(_)) => Err(ApiError::NotOpenEnded(index)),
        None => Err(ApiError::QuestionOutOfRange(index)),
      }
    })
    .await?;

  let fb = evaluate_open_answer(state.completer.as_ref(), &state.prompts, &question, answer).await;

  state
    .with_session_mut(session_id, |s| {
      let challenge = s.challenge.as_mut().ok_or(ApiError::NoChallenge)?;
      // The challenge may have been replaced while the model was busy.
      if challenge.questions.get(index).map(QuizQuestion::text) == Some(question.as_str()) {
        challenge.open_feedback.insert(index, fb.clone());
      } else {
        warn!(target: "quiz", index, "Challenge changed during evaluation; feedback not recorded");
      }
      Ok(OpenResultOut { feedback: fb.feedback.clone(), points: fb.points, score: scoreboard(challenge) })
    })
    .await
}

pub async fn do_score(state: &AppState, session_id: &str) -> Result<Scoreboard, ApiError> {
  let challenge = state.challenge(session_id).await?;
  Ok(scoreboard(&challenge))
}

#[instrument(level = "info", skip(state))]
pub async fn do_status(state: &AppState) -> bool {
  let connected = state.completer.test_connection().await;
  info!(target: "research_assistant", connected, "Connection test finished");
  connected
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  use crate::completion::UNREACHABLE_MESSAGE;
  use crate::quiz::tests::ScriptedCompleter;

  fn ok(s: &str) -> CompletionResult {
    CompletionResult::Success(s.to_string())
  }

  fn mcq(correct: OptionLabel) -> McqQuestion {
    McqQuestion {
      question: "By what percentage did revenue grow in 2023?".into(),
      options: ["A) 12%".into(), "B) 22%".into(), "C) 7%".into(), "D) 32%".into()],
      correct_answer: correct,
      explanation: "Stated in the results.".into(),
    }
  }

  #[test]
  fn parse_score_reads_common_formats() {
    assert_eq!(parse_score("Score: 7/10\nFeedback: good"), Some(7.0));
    assert_eq!(parse_score("**Score:** 8.5 / 10"), Some(8.5));
    assert_eq!(parse_score("Score: 15/10"), Some(10.0));
    assert_eq!(parse_score("No score here"), None);
  }

  #[test]
  fn grade_mcq_uses_first_letter() {
    let q = mcq(OptionLabel::B);
    assert!(grade_mcq(&q, "B) 22%").unwrap().correct);
    assert!(grade_mcq(&q, " b").unwrap().correct);
    assert!(!grade_mcq(&q, "A) 12%").unwrap().correct);
    assert!(grade_mcq(&q, "Z").is_none());
    assert!(grade_mcq(&q, "").is_none());
  }

  #[test]
  fn scoreboard_verdicts() {
    let mut ch = Challenge::new(QuizMode::Mixed, vec![]);
    assert_eq!(scoreboard(&ch).verdict, None);

    ch.mcq_grades.insert(0, McqGrade { selected: OptionLabel::A, correct: true });
    ch.mcq_grades.insert(1, McqGrade { selected: OptionLabel::B, correct: true });
    let s = scoreboard(&ch);
    assert_eq!((s.total, s.max), (20.0, 20.0));
    assert_eq!(s.verdict.as_deref(), Some("Excellent work!"));

    ch.open_feedback.insert(2, OpenFeedback { feedback: "meh".into(), points: Some(2.0) });
    let s = scoreboard(&ch);
    assert_eq!((s.total, s.max), (22.0, 30.0));
    assert_eq!(s.verdict.as_deref(), Some("Good job!"));

    ch.mcq_grades.insert(1, McqGrade { selected: OptionLabel::C, correct: false });
    assert_eq!(scoreboard(&ch).verdict.as_deref(), Some("Keep studying!"));
  }

  #[test]
  fn preview_is_clipped() {
    let long = "x".repeat(600);
    assert_eq!(preview(&long).chars().count(), 503);
    assert_eq!(preview("short"), "short");
  }

  #[tokio::test]
  async fn ask_anything_returns_verified_evidence() {
    let completer = ScriptedCompleter::new(vec![ok(
      "**Answer:** 12%\n\n**Justification:** stated.\n\n**Supporting Evidence:** \"revenue grew by 12%\" and \"profits doubled overnight\"",
    )]);
    let (answer, evidence) = ask_anything(
      &completer,
      &Prompts::default(),
      "In 2023 revenue grew by 12% across regions.",
      "How much did revenue grow?",
    ).await;
    assert!(answer.starts_with("**Answer:**"));
    assert_eq!(evidence.first().map(String::as_str), Some("revenue grew by 12%"));
    assert!(!evidence.iter().any(|e| e.contains("profits")));
    assert!(completer.seen.lock().unwrap()[0].prompt().contains("How much did revenue grow?"));
  }

  #[tokio::test]
  async fn ask_anything_failure_has_no_evidence() {
    let completer = ScriptedCompleter::new(vec![]);
    let (answer, evidence) = ask_anything(&completer, &Prompts::default(), "doc", "q?").await;
    assert_eq!(answer, UNREACHABLE_MESSAGE);
    assert!(evidence.is_empty());
  }

  #[tokio::test]
  async fn summary_clips_long_documents() {
    let completer = ScriptedCompleter::new(vec![ok("A short summary.")]);
    let doc = "y".repeat(5000);
    let summary = generate_summary(&completer, &Prompts::default(), &doc).await;
    assert_eq!(summary, "A short summary.");
    let seen = completer.seen.lock().unwrap();
    assert!(seen[0].prompt().contains(&format!("{}...", "y".repeat(3000))));
    assert!(!seen[0].prompt().contains(&"y".repeat(3001)));
    assert_eq!(seen[0].max_output_tokens(), 200);
  }

  #[tokio::test]
  async fn session_flow_records_answers_and_feedback() {
    let quiz = serde_json::json!([
      {
        "question": "By what percentage did revenue grow in 2023?",
        "type": "mcq",
        "options": ["A) 12%", "B) 22%", "C) 7%", "D) 32%"],
        "correct_answer": "A",
        "explanation": "Stated in the results."
      },
      {
        "question": "Which region reported the largest cost savings?",
        "type": "mcq",
        "options": ["A) North", "B) South", "C) East", "D) West"],
        "correct_answer": "C",
        "explanation": "Listed in the regional table."
      },
      { "question": "Explain why the cost savings in the East region mattered.", "type": "open" }
    ]);
    let completer = Arc::new(ScriptedCompleter::new(vec![
      ok("facts"),
      ok(&quiz.to_string()),
      ok("Score: 6/10\nFeedback: partially right"),
    ]));
    let state = AppState::with_completer(completer, Prompts::default());
    let doc = state
      .create_session("report.txt", "In 2023 revenue grew by 12%. The East region saved the most.".into())
      .await;

    let qs = do_new_challenge(&state, &doc, QuizMode::Mixed).await.unwrap();
    assert_eq!(qs.len(), 3);

    let r = do_answer_mcq(&state, &doc, 0, "A) 12%").await.unwrap();
    assert!(r.correct);
    let r = do_answer_mcq(&state, &doc, 1, "B").await.unwrap();
    assert!(!r.correct);
    assert_eq!(r.correct_answer, OptionLabel::C);

    assert!(matches!(do_answer_mcq(&state, &doc, 2, "A").await, Err(ApiError::NotMultipleChoice(2))));
    assert!(matches!(do_answer_mcq(&state, &doc, 7, "A").await, Err(ApiError::QuestionOutOfRange(7))));
    assert!(matches!(do_evaluate_open(&state, &doc, 0, "text").await, Err(ApiError::NotOpenEnded(0))));

    let open = do_evaluate_open(&state, &doc, 2, "Because it cut costs the most.").await.unwrap();
    assert_eq!(open.points, Some(6.0));
    assert_eq!((open.score.total, open.score.max), (16.0, 30.0));

    let score = do_score(&state, &doc).await.unwrap();
    assert_eq!(score.verdict.as_deref(), Some("Keep studying!"));
  }

  #[tokio::test]
  async fn ask_records_chat_history() {
    let completer = Arc::new(ScriptedCompleter::new(vec![ok("It grew.")]));
    let state = AppState::with_completer(completer, Prompts::default());
    let id = state.create_session("a.txt", "text".into()).await;

    assert!(matches!(do_ask(&state, &id, "   ").await, Err(ApiError::BadRequest(_))));
    do_ask(&state, &id, "What happened?").await.unwrap();
    let history = state.history(&id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, ChatRole::User);
    assert_eq!(history[1].content, "It grew.");
  }

  #[tokio::test]
  async fn upload_rejects_unsupported_types() {
    let state = AppState::with_completer(Arc::new(ScriptedCompleter::new(vec![])), Prompts::default());
    let err = do_upload(&state, "photo.png", Some("image/png"), vec![1, 2, 3]).await.unwrap_err();
    assert_eq!(err.to_string(), "Unsupported file type. Please upload PDF or TXT files.");

    let ok = do_upload(&state, "notes.txt", Some("text/plain"), b"hello there".to_vec()).await.unwrap();
    assert_eq!(ok.chars, 11);
    assert_eq!(state.document_text(&ok.session_id).await.unwrap(), "hello there");
  }
}
