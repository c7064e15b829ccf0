//! Deterministic quiz questions built straight from the document text.
//!
//! Used when the model cannot produce enough valid questions (or cannot be reached at all).
//! Nothing here can fail: with no usable signal in the text we still return placeholder
//! (MCQ) or reflective (open) questions.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::{McqQuestion, OpenQuestion, OptionLabel, QuizMode, QuizQuestion};
use crate::util::clip_chars;

pub const CLOSING_OPEN_QUESTION: &str =
  "Based on the information presented in the document, what are the most important takeaways and how might they be applied?";

pub const PLACEHOLDER_MCQ_QUESTION: &str =
  "Based on the document content, what type of information is primarily presented?";

const MAX_SENTENCES: usize = 20;
const MAX_PARAGRAPHS: usize = 10;
const MAX_NUMBERS: usize = 5;
const MAX_NAMES: usize = 10;
const MAX_QUOTED: usize = 5;

fn number_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"\b\d+(?:\.\d+)?(?:%|\b)").expect("number pattern"))
}

fn name_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*\b").expect("name pattern"))
}

fn quoted_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r#""([^"]+)""#).expect("quoted pattern"))
}

/// Cheap lexical signals pulled out of a document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DocumentSignals {
  pub sentences: Vec<String>,
  pub paragraphs: Vec<String>,
  pub numbers: Vec<String>,
  pub names: Vec<String>,
  pub quoted: Vec<String>,
}

impl DocumentSignals {
  pub fn scan(text: &str) -> Self {
    let sentences = text
      .split('.')
      .map(str::trim)
      .filter(|s| s.chars().count() > 30)
      .take(MAX_SENTENCES)
      .map(str::to_string)
      .collect();
    let paragraphs = text
      .split("\n\n")
      .map(str::trim)
      .filter(|p| p.chars().count() > 50)
      .take(MAX_PARAGRAPHS)
      .map(str::to_string)
      .collect();
    let numbers = number_re()
      .find_iter(text)
      .take(MAX_NUMBERS)
      .map(|m| m.as_str().to_string())
      .collect();
    // Length filter runs before the cap, so short matches don't eat slots.
    let names = name_re()
      .find_iter(text)
      .map(|m| m.as_str())
      .filter(|w| w.chars().count() > 3)
      .take(MAX_NAMES)
      .map(str::to_string)
      .collect();
    let quoted = quoted_re()
      .captures_iter(text)
      .filter_map(|c| c.get(1))
      .take(MAX_QUOTED)
      .map(|m| m.as_str().to_string())
      .collect();

    Self { sentences, paragraphs, numbers, names, quoted }
  }
}

/// Fallback questions for `mode`. MCQ always yields exactly 3; open yields 1 to 3; mixed yields
/// two MCQ followed by the closing open question.
pub fn fallback_questions(text: &str, mode: QuizMode) -> Vec<QuizQuestion> {
  let signals = DocumentSignals::scan(text);
  match mode {
    QuizMode::Mcq => mcq_questions(&signals),
    QuizMode::Open => open_questions(&signals),
    QuizMode::Mixed => {
      let mut qs: Vec<QuizQuestion> = mcq_questions(&signals).into_iter().take(2).collect();
      qs.push(closing_question());
      qs
    }
  }
}

fn mcq(question: &str, options: [String; 4], explanation: String) -> QuizQuestion {
  QuizQuestion::MultipleChoice(McqQuestion {
    question: question.to_string(),
    options,
    correct_answer: OptionLabel::A,
    explanation,
  })
}

fn open(question: String) -> QuizQuestion {
  QuizQuestion::OpenEnded(OpenQuestion { question })
}

fn closing_question() -> QuizQuestion {
  open(CLOSING_OPEN_QUESTION.to_string())
}

fn placeholder_question() -> QuizQuestion {
  mcq(
    PLACEHOLDER_MCQ_QUESTION,
    [
      "A) Detailed explanations and analysis".into(),
      "B) Simple definitions only".into(),
      "C) Historical dates and events".into(),
      "D) Mathematical formulas".into(),
    ],
    "The document provides detailed information and explanations about its topic.".into(),
  )
}

/// Wrong-but-plausible figures around the anchor: +10, -5, +20 on its integer part.
/// Anchors that don't fit an `i64` get the fixed percentage set.
fn number_distractors(anchor: &str) -> [String; 3] {
  let suffix = if anchor.ends_with('%') { "%" } else { "" };
  let shifted = anchor
    .trim_end_matches('%')
    .split('.')
    .next()
    .and_then(|int| int.parse::<i64>().ok())
    .and_then(|base| Some([base.checked_add(10)?, base.checked_sub(5)?, base.checked_add(20)?]));
  match shifted {
    Some([b, c, d]) => [format!("{}{}", b, suffix), format!("{}{}", c, suffix), format!("{}{}", d, suffix)],
    None => ["25%".into(), "15%".into(), "35%".into()],
  }
}

fn mcq_questions(s: &DocumentSignals) -> Vec<QuizQuestion> {
  let mut qs = Vec::with_capacity(3);

  if let Some(n) = s.numbers.first() {
    let [b, c, d] = number_distractors(n);
    qs.push(mcq(
      "According to the document, what specific figure or measurement is mentioned?",
      [format!("A) {}", n), format!("B) {}", b), format!("C) {}", c), format!("D) {}", d)],
      format!("The document specifically mentions {} in the context of the discussion.", n),
    ));
  }

  if let Some(name) = s.names.first() {
    qs.push(mcq(
      "Which specific term or name is mentioned in the document?",
      [
        format!("A) {}", name),
        "B) Alternative Term".into(),
        "C) Different Concept".into(),
        "D) Other Reference".into(),
      ],
      format!("The document specifically references {} in its content.", name),
    ));
  }

  if let Some(first) = s.sentences.first() {
    qs.push(mcq(
      "What does the document primarily discuss in its opening section?",
      [
        format!("A) {}", clip_chars(first, 80)),
        "B) Alternative topic not mentioned".into(),
        "C) Different subject matter".into(),
        "D) Unrelated content".into(),
      ],
      "This is directly stated in the document's opening section.".into(),
    ));
  }

  while qs.len() < 3 {
    qs.push(placeholder_question());
  }
  qs
}

fn open_questions(s: &DocumentSignals) -> Vec<QuizQuestion> {
  let mut qs = Vec::with_capacity(3);

  if let Some(term) = s.quoted.first() {
    qs.push(open(format!(
      "Explain the concept of '{}' as described in the document and discuss its significance.",
      term
    )));
  }

  if let Some(paragraph) = s.paragraphs.first() {
    qs.push(open(format!(
      "Analyze the main topic discussed in the document (\"{}\") and explain its key components and implications.",
      clip_chars(paragraph, 100)
    )));
  }

  qs.push(closing_question());
  qs.truncate(3);
  qs
}
