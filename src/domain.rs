//! Domain models used by the backend: quiz modes, questions, chat turns, challenges and scores.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Which kind of quiz the user asked for.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuizMode {
  /// Three multiple-choice questions.
  Mcq,
  /// Three open-ended questions.
  Open,
  /// Two multiple-choice questions and one open-ended question.
  #[default]
  Mixed,
}

impl fmt::Display for QuizMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      QuizMode::Mcq => write!(f, "mcq"),
      QuizMode::Open => write!(f, "open"),
      QuizMode::Mixed => write!(f, "mixed"),
    }
  }
}

/// The four fixed option labels of a multiple-choice question.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OptionLabel { A, B, C, D }

impl OptionLabel {
  pub const ALL: [OptionLabel; 4] = [OptionLabel::A, OptionLabel::B, OptionLabel::C, OptionLabel::D];

  pub fn as_char(self) -> char {
    match self {
      OptionLabel::A => 'A',
      OptionLabel::B => 'B',
      OptionLabel::C => 'C',
      OptionLabel::D => 'D',
    }
  }

  /// Normalise model/user input ("a", "B)", " c. ") into a label.
  pub fn parse(raw: &str) -> Option<Self> {
    let t = raw.trim().trim_end_matches(|c| c == ')' || c == '.' || c == ':');
    let mut chars = t.chars();
    let c = chars.next()?;
    if chars.next().is_some() { return None; }
    let c = c.to_ascii_uppercase();
    Self::ALL.into_iter().find(|l| l.as_char() == c)
  }
}

impl fmt::Display for OptionLabel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_char())
  }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct McqQuestion {
  pub question: String,
  /// Exactly four options, each prefixed with its label ("A) ...").
  pub options: [String; 4],
  pub correct_answer: OptionLabel,
  pub explanation: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OpenQuestion {
  pub question: String,
}

/// A validated quiz question. Serialises to the same JSON shape the model is asked to produce.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum QuizQuestion {
  #[serde(rename = "mcq")]
  MultipleChoice(McqQuestion),
  #[serde(rename = "open")]
  OpenEnded(OpenQuestion),
}

impl QuizQuestion {
  pub fn text(&self) -> &str {
    match self {
      QuizQuestion::MultipleChoice(q) => &q.question,
      QuizQuestion::OpenEnded(q) => &q.question,
    }
  }

  pub fn is_mcq(&self) -> bool {
    matches!(self, QuizQuestion::MultipleChoice(_))
  }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole { User, Assistant }

/// One entry of a session's chat history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatTurn {
  pub role: ChatRole,
  pub content: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub evidence: Vec<String>,
}

/// Grade recorded for an answered multiple-choice question.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct McqGrade {
  pub selected: OptionLabel,
  pub correct: bool,
}

/// Feedback recorded for an evaluated open-ended answer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpenFeedback {
  pub feedback: String,
  /// Parsed "Score: X/10", if the evaluator produced one.
  pub points: Option<f32>,
}

/// An active quiz. Replaced wholesale whenever a new challenge starts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Challenge {
  pub mode: QuizMode,
  pub questions: Vec<QuizQuestion>,
  #[serde(default)] pub mcq_grades: HashMap<usize, McqGrade>,
  #[serde(default)] pub open_feedback: HashMap<usize, OpenFeedback>,
}

impl Challenge {
  pub fn new(mode: QuizMode, questions: Vec<QuizQuestion>) -> Self {
    Self { mode, questions, mcq_grades: HashMap::new(), open_feedback: HashMap::new() }
  }
}

/// Running score over everything answered so far in a challenge.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Scoreboard {
  pub total: f32,
  pub max: f32,
  pub percentage: f32,
  pub verdict: Option<String>,
}
