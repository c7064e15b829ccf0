//! Quiz generation: prompt the model for a JSON array of questions, parse strictly, validate,
//! and fall back to deterministic questions when the model output is not good enough.
//!
//! Flow:
//! 1) Ask the model for key facts of the document (one call).
//! 2) Build the mode-specific prompt and try up to 3 generations with rising temperature.
//! 3) Each response: strip code fences, find the `[...]` span, parse it as a JSON array.
//! 4) Validate the first 3 entries into `QuizQuestion`s; accept when at least 2 survive.
//! 5) Otherwise fall back to `fallback::fallback_questions`.
//!
//! The result always holds exactly 3 questions unless the open-mode fallback has fewer signals.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::completion::{Completer, CompletionRequest, CompletionResult};
use crate::config::Prompts;
use crate::domain::{McqQuestion, OpenQuestion, OptionLabel, QuizMode, QuizQuestion};
use crate::fallback::fallback_questions;
use crate::util::{fill_template, take_chars, trunc_for_log};

pub const QUESTIONS_PER_QUIZ: usize = 3;
const MIN_VALID_QUESTIONS: usize = 2;
const GENERATION_ATTEMPTS: usize = 3;
const BASE_TEMPERATURE: f64 = 0.3;
const TEMPERATURE_STEP: f64 = 0.2;
const GENERATION_MAX_TOKENS: u32 = 1200;

const KEY_FACTS_INPUT_CHARS: usize = 3000;
const KEY_FACTS_TEMPERATURE: f64 = 0.1;
const KEY_FACTS_MAX_TOKENS: u32 = 800;
const KEY_FACTS_UNAVAILABLE: &str = "Could not extract key facts";

/// Text the quiz is built from (prompt and fallback alike).
pub const FOCUS_CHARS: usize = 4000;

/// Questions containing any of these read as boilerplate and are rejected.
pub const GENERIC_WORDS: [&str; 4] = ["generic", "general", "typical", "common"];
const MIN_QUESTION_CHARS: usize = 20;

/// Why a model response could not be read as a question list at all.
#[derive(Debug, Error)]
pub enum QuizParseError {
  #[error("response is not valid JSON: {0}")]
  Json(#[from] serde_json::Error),
  #[error("response JSON is not an array")]
  NotArray,
}

/// Why a single question entry was rejected.
#[derive(Debug, Error, PartialEq)]
pub enum Rejection {
  #[error("entry does not have the question shape")]
  Malformed,
  #[error("question text is missing")]
  MissingQuestion,
  #[error("type tag is missing")]
  MissingType,
  #[error("question text is too short")]
  TooShort,
  #[error("question uses generic wording ({0})")]
  GenericWording(&'static str),
  #[error("unknown question type '{0}'")]
  UnknownType(String),
  #[error("expected 4 options, got {0}")]
  WrongOptionCount(usize),
  #[error("correct answer is missing or not one of A-D")]
  BadCorrectAnswer,
  #[error("explanation is missing")]
  MissingExplanation,
  #[error("'{0}' question does not belong in a {1} quiz")]
  WrongKind(&'static str, QuizMode),
}

/// Entry as the model produced it. Nothing is trusted until `validate_entry` says so.
#[derive(Debug, Default, Deserialize)]
struct RawQuestion {
  #[serde(default)] question: Option<String>,
  #[serde(default, rename = "type")] kind: Option<String>,
  #[serde(default)] options: Option<Vec<String>>,
  #[serde(default)] correct_answer: Option<String>,
  #[serde(default)] explanation: Option<String>,
}

fn array_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"(?s)\[.*\]").expect("array pattern"))
}

/// Remove markdown code fences around a response, preferring a ```json block.
pub fn strip_code_fences(raw: &str) -> &str {
  let t = raw.trim();
  if let Some((_, rest)) = t.split_once("```json") {
    return rest.split("```").next().unwrap_or(rest);
  }
  if t.contains("```") {
    return t.split("```").nth(1).unwrap_or(t);
  }
  t
}

/// Parse a model response into raw JSON entries.
pub fn parse_question_array(raw: &str) -> Result<Vec<Value>, QuizParseError> {
  let body = strip_code_fences(raw);
  let body = array_re().find(body).map(|m| m.as_str()).unwrap_or(body);
  match serde_json::from_str::<Value>(body.trim())? {
    Value::Array(items) => Ok(items),
    _ => Err(QuizParseError::NotArray),
  }
}

fn non_empty(s: Option<String>) -> Option<String> {
  s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Strictly turn one raw entry into a typed question.
pub fn validate_entry(entry: &Value) -> Result<QuizQuestion, Rejection> {
  let raw: RawQuestion = serde_json::from_value(entry.clone()).map_err(|_| Rejection::Malformed)?;

  let question = non_empty(raw.question).ok_or(Rejection::MissingQuestion)?;
  let kind = non_empty(raw.kind).ok_or(Rejection::MissingType)?;
  if question.chars().count() <= MIN_QUESTION_CHARS {
    return Err(Rejection::TooShort);
  }
  let lower = question.to_lowercase();
  if let Some(word) = GENERIC_WORDS.into_iter().find(|w| lower.contains(*w)) {
    return Err(Rejection::GenericWording(word));
  }

  match kind.to_ascii_lowercase().as_str() {
    "mcq" => {
      let options = raw.options.unwrap_or_default();
      let options: [String; 4] = options
        .try_into()
        .map_err(|o: Vec<String>| Rejection::WrongOptionCount(o.len()))?;
      let correct_answer = raw
        .correct_answer
        .as_deref()
        .and_then(OptionLabel::parse)
        .ok_or(Rejection::BadCorrectAnswer)?;
      let explanation = non_empty(raw.explanation).ok_or(Rejection::MissingExplanation)?;
      Ok(QuizQuestion::MultipleChoice(McqQuestion { question, options, correct_answer, explanation }))
    }
    "open" => Ok(QuizQuestion::OpenEnded(OpenQuestion { question })),
    other => Err(Rejection::UnknownType(other.to_string())),
  }
}

/// Re-check an already typed question against the same rules.
pub fn validate_question(q: &QuizQuestion) -> Result<QuizQuestion, Rejection> {
  let value = serde_json::to_value(q).map_err(|_| Rejection::Malformed)?;
  validate_entry(&value)
}

/// Mcq quizzes take only MCQ entries and open quizzes only open ones; mixed takes both.
fn check_kind(q: QuizQuestion, mode: QuizMode) -> Result<QuizQuestion, Rejection> {
  match (mode, q.is_mcq()) {
    (QuizMode::Mcq, false) => Err(Rejection::WrongKind("open", mode)),
    (QuizMode::Open, true) => Err(Rejection::WrongKind("mcq", mode)),
    _ => Ok(q),
  }
}

/// Validate the first 3 entries for `mode`; rejected ones are dropped silently (logged at debug).
pub fn validate_batch(entries: &[Value], mode: QuizMode) -> Vec<QuizQuestion> {
  entries
    .iter()
    .take(QUESTIONS_PER_QUIZ)
    .enumerate()
    .filter_map(|(idx, entry)| match validate_entry(entry).and_then(|q| check_kind(q, mode)) {
      Ok(q) => Some(q),
      Err(reason) => {
        debug!(target: "quiz", idx, %reason, "Rejected generated question");
        None
      }
    })
    .collect()
}

fn template_for<'a>(prompts: &'a Prompts, mode: QuizMode) -> &'a str {
  match mode {
    QuizMode::Mcq => &prompts.quiz_mcq,
    QuizMode::Open => &prompts.quiz_open,
    QuizMode::Mixed => &prompts.quiz_mixed,
  }
}

/// Which kind of question a short quiz still needs: `true` for MCQ.
fn wants_mcq(current: &[QuizQuestion], mode: QuizMode) -> bool {
  match mode {
    QuizMode::Mcq => true,
    QuizMode::Open => false,
    QuizMode::Mixed => current.iter().any(|q| !q.is_mcq()),
  }
}

/// Top up an accepted-but-short list with fallback questions not already present.
fn pad_with_fallback(mut questions: Vec<QuizQuestion>, focused: &str, mode: QuizMode) -> Vec<QuizQuestion> {
  questions.truncate(QUESTIONS_PER_QUIZ);
  let pool: Vec<QuizQuestion> = fallback_questions(focused, mode)
    .into_iter()
    .filter(|q| validate_question(q).is_ok())
    .collect();
  while questions.len() < QUESTIONS_PER_QUIZ {
    let want_mcq = wants_mcq(&questions, mode);
    let fresh = |q: &&QuizQuestion| !questions.iter().any(|have| have.text() == q.text());
    let pick = pool
      .iter()
      .filter(fresh)
      .find(|q| q.is_mcq() == want_mcq)
      .or_else(|| pool.iter().find(fresh))
      .cloned();
    match pick {
      Some(q) => questions.push(q),
      None => break,
    }
  }
  questions
}

/// Ask the model for the facts worth quizzing on. Never fails.
#[instrument(level = "info", skip_all, fields(text_len = text.len()))]
pub async fn extract_key_facts(completer: &dyn Completer, prompts: &Prompts, text: &str) -> String {
  let prompt = fill_template(&prompts.key_facts, &[("text", &take_chars(text, KEY_FACTS_INPUT_CHARS))]);
  match completer.complete(&CompletionRequest::new(prompt, KEY_FACTS_TEMPERATURE, KEY_FACTS_MAX_TOKENS)).await {
    CompletionResult::Success(facts) => facts,
    CompletionResult::Failure(reason) => {
      warn!(target: "quiz", %reason, "Key fact extraction failed");
      KEY_FACTS_UNAVAILABLE.to_string()
    }
  }
}

/// Generate a quiz for `document`. Never fails: degrades to deterministic questions.
#[instrument(level = "info", skip(completer, prompts, document, mode), fields(doc_len = document.len(), %mode))]
pub async fn generate_quiz(
  completer: &dyn Completer,
  prompts: &Prompts,
  document: &str,
  mode: QuizMode,
) -> Vec<QuizQuestion> {
  let focused = take_chars(document, FOCUS_CHARS);
  let key_facts = extract_key_facts(completer, prompts, document).await;
  let prompt = fill_template(template_for(prompts, mode), &[("key_facts", &key_facts), ("text", &focused)]);

  for attempt in 0..GENERATION_ATTEMPTS {
    let temperature = BASE_TEMPERATURE + TEMPERATURE_STEP * attempt as f64;
    let request = CompletionRequest::new(prompt.clone(), temperature, GENERATION_MAX_TOKENS);

    let text = match completer.complete(&request).await {
      CompletionResult::Success(text) => text,
      CompletionResult::Failure(reason) => {
        warn!(target: "quiz", attempt = attempt + 1, %reason, "Quiz generation call failed");
        continue;
      }
    };

    let entries = match parse_question_array(&text) {
      Ok(entries) => entries,
      Err(e) => {
        warn!(target: "quiz", attempt = attempt + 1, error = %e, response = %trunc_for_log(&text, 200), "Quiz response did not parse");
        continue;
      }
    };

    let valid = validate_batch(&entries, mode);
    if valid.len() >= MIN_VALID_QUESTIONS {
      info!(target: "quiz", attempt = attempt + 1, valid = valid.len(), "Accepted generated quiz");
      return pad_with_fallback(valid, &focused, mode);
    }
    warn!(target: "quiz", attempt = attempt + 1, entries = entries.len(), valid = valid.len(), "Too few valid questions; retrying");
  }

  warn!(target: "quiz", "Model generation exhausted; using fallback questions");
  fallback_questions(&focused, mode)
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use std::collections::VecDeque;
  use std::sync::Mutex;

  use async_trait::async_trait;
  use serde_json::json;

  use crate::completion::UNREACHABLE_MESSAGE;

  /// Replays canned results in order and records every request it sees.
  #[derive(Default)]
  pub(crate) struct ScriptedCompleter {
    replies: Mutex<VecDeque<CompletionResult>>,
    pub(crate) seen: Mutex<Vec<CompletionRequest>>,
  }

  impl ScriptedCompleter {
    pub(crate) fn new(replies: Vec<CompletionResult>) -> Self {
      Self { replies: Mutex::new(replies.into()), seen: Mutex::new(Vec::new()) }
    }
  }

  #[async_trait]
  impl Completer for ScriptedCompleter {
    async fn complete(&self, request: &CompletionRequest) -> CompletionResult {
      self.seen.lock().unwrap().push(request.clone());
      self.replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| CompletionResult::Failure(UNREACHABLE_MESSAGE.into()))
    }
  }

  fn ok(s: &str) -> CompletionResult {
    CompletionResult::Success(s.to_string())
  }

  fn mcq_json(question: &str, correct: &str) -> Value {
    json!({
      "question": question,
      "type": "mcq",
      "options": ["A) 12%", "B) 22%", "C) 7%", "D) 32%"],
      "correct_answer": correct,
      "explanation": "Stated in the results section."
    })
  }

  const DOC: &str = "Python increased performance by 40% according to the study.";

  #[test]
  fn strips_json_fences_and_surrounding_chatter() {
    let raw = "Sure! Here you go:\n```json\n[{\"question\": \"x\"}]\n```\nEnjoy.";
    assert_eq!(parse_question_array(raw).unwrap().len(), 1);

    let bare = "```\n[1, 2]\n```";
    assert_eq!(parse_question_array(bare).unwrap().len(), 2);

    let embedded = "Questions: [{\"a\": 1}, {\"b\": 2}] hope that helps";
    assert_eq!(parse_question_array(embedded).unwrap().len(), 2);
  }

  #[test]
  fn non_array_json_is_a_parse_error() {
    assert!(matches!(parse_question_array("{\"question\": 1}"), Err(QuizParseError::NotArray)));
    assert!(matches!(parse_question_array("not json at all"), Err(QuizParseError::Json(_))));
  }

  #[test]
  fn validates_mcq_entries() {
    let q = validate_entry(&mcq_json("By what percentage did revenue grow in 2023?", "a)")).unwrap();
    match q {
      QuizQuestion::MultipleChoice(m) => assert_eq!(m.correct_answer, OptionLabel::A),
      other => panic!("expected MCQ, got {:?}", other),
    }
  }

  #[test]
  fn rejects_entries_breaking_the_rules() {
    let short = mcq_json("Revenue growth?", "A");
    assert_eq!(validate_entry(&short), Err(Rejection::TooShort));

    let generic = mcq_json("What is a common theme across the whole report?", "A");
    assert_eq!(validate_entry(&generic), Err(Rejection::GenericWording("common")));

    let mut three_options = mcq_json("By what percentage did revenue grow in 2023?", "A");
    three_options["options"] = json!(["A) 1", "B) 2", "C) 3"]);
    assert_eq!(validate_entry(&three_options), Err(Rejection::WrongOptionCount(3)));

    let bad_label = mcq_json("By what percentage did revenue grow in 2023?", "E");
    assert_eq!(validate_entry(&bad_label), Err(Rejection::BadCorrectAnswer));

    let mut no_expl = mcq_json("By what percentage did revenue grow in 2023?", "B");
    no_expl["explanation"] = json!("  ");
    assert_eq!(validate_entry(&no_expl), Err(Rejection::MissingExplanation));

    let no_type = json!({ "question": "Explain how the caching layer reduces latency." });
    assert_eq!(validate_entry(&no_type), Err(Rejection::MissingType));

    let odd_type = json!({ "question": "Explain how the caching layer reduces latency.", "type": "essay" });
    assert_eq!(validate_entry(&odd_type), Err(Rejection::UnknownType("essay".into())));

    assert_eq!(validate_entry(&json!("just a string")), Err(Rejection::Malformed));
  }

  #[test]
  fn open_entries_need_only_question_and_type() {
    let q = validate_entry(&json!({ "question": "Explain how the caching layer reduces latency.", "type": "open" })).unwrap();
    assert!(!q.is_mcq());
  }

  #[test]
  fn validation_is_idempotent() {
    let entries = vec![
      mcq_json("By what percentage did revenue grow in 2023?", "c"),
      json!({ "question": "Explain how the caching layer reduces latency.", "type": "open" }),
    ];
    for q in validate_batch(&entries, QuizMode::Mixed) {
      let again = validate_question(&q).unwrap();
      assert_eq!(again, q);
    }
  }

  #[test]
  fn only_first_three_entries_are_considered() {
    let entries: Vec<Value> = (0..5)
      .map(|i| mcq_json(&format!("Question number {} about the revenue figures?", i), "A"))
      .collect();
    assert_eq!(validate_batch(&entries, QuizMode::Mcq).len(), 3);
  }

  #[test]
  fn batch_keeps_only_the_requested_kind() {
    let entries = vec![
      mcq_json("By what percentage did revenue grow in 2023?", "A"),
      json!({ "question": "Explain how the caching layer reduces latency.", "type": "open" }),
    ];
    assert!(validate_batch(&entries, QuizMode::Mcq).iter().all(QuizQuestion::is_mcq));
    assert_eq!(validate_batch(&entries, QuizMode::Mcq).len(), 1);
    assert!(validate_batch(&entries, QuizMode::Open).iter().all(|q| !q.is_mcq()));
    assert_eq!(validate_batch(&entries, QuizMode::Mixed).len(), 2);
  }

  #[tokio::test]
  async fn accepts_valid_model_quiz() {
    let quiz = json!([
      mcq_json("By what percentage did revenue grow in 2023?", "A"),
      mcq_json("Which region reported the largest cost savings?", "B"),
      mcq_json("How many staff joined the research team last year?", "C"),
    ]);
    let completer = ScriptedCompleter::new(vec![ok("FACTS: revenue 12%"), ok(&format!("```json\n{}\n```", quiz))]);
    let qs = generate_quiz(&completer, &Prompts::default(), DOC, QuizMode::Mcq).await;

    assert_eq!(qs.len(), 3);
    assert_eq!(qs[1].text(), "Which region reported the largest cost savings?");
    let seen = completer.seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen[1].prompt().contains("FACTS: revenue 12%"));
  }

  #[tokio::test]
  async fn retries_with_rising_temperature_then_accepts() {
    let good = json!([
      mcq_json("By what percentage did revenue grow in 2023?", "A"),
      mcq_json("Which region reported the largest cost savings?", "B"),
      mcq_json("How many staff joined the research team last year?", "C"),
    ]);
    let completer = ScriptedCompleter::new(vec![
      ok("facts"),
      ok("I cannot produce JSON today."),
      ok("[{\"question\": \"too short\", \"type\": \"mcq\"}]"),
      ok(&good.to_string()),
    ]);
    let qs = generate_quiz(&completer, &Prompts::default(), DOC, QuizMode::Mcq).await;
    assert_eq!(qs.len(), 3);
    assert_eq!(qs[0].text(), "By what percentage did revenue grow in 2023?");

    let temps: Vec<f64> = completer.seen.lock().unwrap().iter().skip(1).map(|r| r.temperature()).collect();
    assert_eq!(temps.len(), 3);
    assert!((temps[0] - 0.3).abs() < 1e-9);
    assert!((temps[1] - 0.5).abs() < 1e-9);
    assert!((temps[2] - 0.7).abs() < 1e-9);
  }

  #[tokio::test]
  async fn two_valid_questions_are_padded_to_three() {
    let quiz = json!([
      mcq_json("By what percentage did revenue grow in 2023?", "A"),
      mcq_json("Generic question about the general topic here?", "A"),
      mcq_json("Which region reported the largest cost savings?", "B"),
    ]);
    let completer = ScriptedCompleter::new(vec![ok("facts"), ok(&quiz.to_string())]);
    let qs = generate_quiz(&completer, &Prompts::default(), DOC, QuizMode::Mcq).await;

    assert_eq!(qs.len(), 3);
    assert!(qs.iter().all(QuizQuestion::is_mcq));
    assert_eq!(qs[2].text(), "According to the document, what specific figure or measurement is mentioned?");
  }

  #[tokio::test]
  async fn mixed_quiz_padding_adds_the_missing_open_question() {
    let quiz = json!([
      mcq_json("By what percentage did revenue grow in 2023?", "A"),
      mcq_json("Which region reported the largest cost savings?", "B"),
      { "question": "short", "type": "open" },
    ]);
    let completer = ScriptedCompleter::new(vec![ok("facts"), ok(&quiz.to_string())]);
    let qs = generate_quiz(&completer, &Prompts::default(), DOC, QuizMode::Mixed).await;

    assert_eq!(qs.len(), 3);
    assert!(!qs[2].is_mcq());
  }

  #[tokio::test]
  async fn open_entries_never_leak_into_an_mcq_quiz() {
    let open_only = json!([
      { "question": "Explain how the caching layer reduces latency.", "type": "open" },
      { "question": "Discuss why the rollout plan was split into phases.", "type": "open" },
      { "question": "Describe the trade-offs of the chosen storage design.", "type": "open" },
    ]);
    let replies = std::iter::once(ok("facts"))
      .chain(std::iter::repeat_with(|| ok(&open_only.to_string())).take(GENERATION_ATTEMPTS))
      .collect();
    let completer = ScriptedCompleter::new(replies);
    let qs = generate_quiz(&completer, &Prompts::default(), DOC, QuizMode::Mcq).await;

    assert_eq!(qs.len(), 3);
    assert!(qs.iter().all(QuizQuestion::is_mcq));
    assert_eq!(completer.seen.lock().unwrap().len(), 1 + GENERATION_ATTEMPTS);
  }

  #[tokio::test]
  async fn unreachable_model_falls_back_for_mcq() {
    let completer = ScriptedCompleter::new(vec![]);
    let qs = generate_quiz(&completer, &Prompts::default(), DOC, QuizMode::Mcq).await;

    assert_eq!(qs.len(), 3);
    assert_eq!(completer.seen.lock().unwrap().len(), 1 + GENERATION_ATTEMPTS);
    let first = match &qs[0] {
      QuizQuestion::MultipleChoice(m) => m.clone(),
      other => panic!("expected MCQ, got {:?}", other),
    };
    assert_eq!(first.options[0], "A) 40%");
    assert_eq!(first.correct_answer, OptionLabel::A);
    for q in &qs {
      match q {
        QuizQuestion::MultipleChoice(m) => assert!(OptionLabel::ALL.contains(&m.correct_answer)),
        other => panic!("expected MCQ, got {:?}", other),
      }
    }
  }

  #[tokio::test]
  async fn empty_document_never_yields_empty_quiz() {
    for mode in [QuizMode::Mcq, QuizMode::Open, QuizMode::Mixed] {
      let completer = ScriptedCompleter::new(vec![]);
      let qs = generate_quiz(&completer, &Prompts::default(), "", mode).await;
      assert!(!qs.is_empty(), "mode {} returned nothing", mode);
    }
  }
}
