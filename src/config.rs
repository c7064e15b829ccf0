//! Loading assistant configuration (completion settings + prompts) from TOML and the environment.
//!
//! See `AppConfig`, `CompletionSettings` and `Prompts` for the expected schema.
//! Every field has a default, so an empty (or missing) file is valid.
//! Environment variables win over the file:
//!   GROQ_API_KEY   : credential handed to the completion client
//!   GROQ_BASE_URL  : chat-completions base URL
//!   GROQ_MODELS    : comma-separated candidate model list

use serde::Deserialize;
use tracing::{error, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
  #[serde(default)]
  pub completion: CompletionSettings,
  #[serde(default)]
  pub prompts: Prompts,
}

/// Knobs for the resilient completion client.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CompletionSettings {
  pub base_url: String,
  /// Ordered by preference: fastest/cheapest first.
  pub models: Vec<String>,
  pub attempts_per_model: u32,
  pub request_timeout_secs: u64,
  pub rate_limit_backoff_ms: u64,
  pub connect_backoff_ms: u64,
  pub system_prompt: String,
}

impl Default for CompletionSettings {
  fn default() -> Self {
    Self {
      base_url: DEFAULT_BASE_URL.into(),
      models: vec![
        "llama3-8b-8192".into(),
        "llama3-70b-8192".into(),
        "mixtral-8x7b-32768".into(),
        "gemma-7b-it".into(),
      ],
      attempts_per_model: 2,
      request_timeout_secs: 45,
      rate_limit_backoff_ms: 2000,
      connect_backoff_ms: 1000,
      system_prompt: "You are a helpful AI assistant. When asked to provide JSON format, respond with valid JSON. Otherwise, respond in clear, natural text format.".into(),
    }
  }
}

/// Prompt templates. Placeholders use `{name}` and are filled by `util::fill_template`.
/// Override any of them in TOML under `[prompts]` to tune tone/structure.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  /// {text}
  pub summary: String,
  /// {text}, {question}
  pub ask: String,
  /// {text}
  pub key_facts: String,
  /// {key_facts}, {text}
  pub quiz_mcq: String,
  /// {key_facts}, {text}
  pub quiz_open: String,
  /// {key_facts}, {text}
  pub quiz_mixed: String,
  /// {question}, {answer}
  pub evaluate_open: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      summary: r#"Please provide a concise summary of the following document in exactly 150 words or less.
Focus on the main points, key arguments, and important conclusions.
Make it informative and well-structured.

Respond in plain text format (NOT JSON). Write a clear, readable summary.

Document:
{text}

Summary (150 words max):"#.into(),

      ask: r#"Based on the following document, please answer the question clearly and provide justification for your answer.

Document:
{text}

Question: {question}

Please provide a clear, natural text response (NOT JSON format) that includes:
1. A direct answer to the question
2. Justification explaining why this answer is correct based on the document
3. Quote the exact sentences or phrases from the document that support your answer

Format your response as:
**Answer:** [Your direct answer]

**Justification:** [Why this answer is correct]

**Supporting Evidence:** "[Quote exact text from document that supports this answer]""#.into(),

      key_facts: r#"Analyze this document and extract specific, factual information that could be used for quiz questions.

Extract:
1. Specific numbers, dates, percentages, statistics
2. Names of people, places, organizations, products
3. Technical terms and their definitions
4. Key processes, methods, or procedures described
5. Important facts, findings, or conclusions
6. Cause-and-effect relationships mentioned

Document:
{text}

Return the information in this format:
NUMBERS/DATES: [list specific numbers, dates, percentages found]
NAMES: [list specific names of people, places, organizations]
TERMS: [list technical terms and concepts with brief definitions]
PROCESSES: [list key processes or methods described]
FACTS: [list important facts or findings]
RELATIONSHIPS: [list cause-effect or other relationships]"#.into(),

      quiz_mcq: r#"You are creating quiz questions for students studying this document. Use the extracted key facts to create 3 specific multiple choice questions.

KEY FACTS EXTRACTED:
{key_facts}

DOCUMENT TEXT:
{text}

Create 3 MCQ questions that test specific knowledge from this document. Each question MUST:
1. Reference specific facts, numbers, names, or terms from the extracted key facts
2. Be answerable ONLY by someone who read this specific document
3. Have one clearly correct answer and three plausible wrong answers
4. Test actual learning, not guessing

EXAMPLE of what I want:
- If document mentions "Python increased performance by 40%", ask "According to the document, by what percentage did Python increase performance?"
- If document mentions "Dr. Smith's research", ask "Who conducted the research mentioned in the document?"

Return ONLY this JSON format:
[
  {
    "question": "[Specific question using exact facts from document]",
    "type": "mcq",
    "options": ["A) [correct answer from document]", "B) [plausible wrong answer]", "C) [plausible wrong answer]", "D) [plausible wrong answer]"],
    "correct_answer": "A",
    "explanation": "The document specifically states this fact in the section about [topic]"
  },
  {
    "question": "[Another specific question]",
    "type": "mcq",
    "options": ["A) [wrong]", "B) [correct from document]", "C) [wrong]", "D) [wrong]"],
    "correct_answer": "B",
    "explanation": "This information is directly mentioned in the document"
  },
  {
    "question": "[Third specific question]",
    "type": "mcq",
    "options": ["A) [wrong]", "B) [wrong]", "C) [correct from document]", "D) [wrong]"],
    "correct_answer": "C",
    "explanation": "The document clearly explains this concept"
  }
]"#.into(),

      quiz_open: r#"Create 3 open-ended questions that require students to explain, analyze, or discuss specific content from this document.

KEY FACTS EXTRACTED:
{key_facts}

DOCUMENT TEXT:
{text}

Create questions that:
1. Reference specific concepts, processes, or findings from the document
2. Ask students to explain HOW or WHY something works based on the document
3. Require analysis of relationships, causes, effects mentioned in the text
4. Use exact terms and concepts from the document

Return ONLY this JSON format:
[
  {
    "question": "Explain [specific concept/process from document] as described in the text and analyze its importance or how it works.",
    "type": "open"
  },
  {
    "question": "The document presents [specific findings/data/argument]. Analyze this information and discuss what it means or implies.",
    "type": "open"
  },
  {
    "question": "Based on the document's explanation of [specific topic], compare/contrast/evaluate [specific aspects] and explain the significance.",
    "type": "open"
  }
]"#.into(),

      quiz_mixed: r#"Create exactly 3 questions: 2 multiple choice AND 1 open-ended question using specific facts from this document.

KEY FACTS EXTRACTED:
{key_facts}

DOCUMENT TEXT:
{text}

REQUIREMENTS:
- Questions 1 & 2: "type": "mcq" with 4 options each, testing specific facts
- Question 3: "type": "open" requiring explanation/analysis
- ALL questions must use specific information from the extracted key facts
- NO vague questions that could apply to any document

Return ONLY this JSON format:
[
  {
    "question": "[Specific MCQ question using exact facts/numbers/names from document]",
    "type": "mcq",
    "options": ["A) [correct from document]", "B) [wrong but plausible]", "C) [wrong but plausible]", "D) [wrong but plausible]"],
    "correct_answer": "A",
    "explanation": "The document specifically mentions this fact"
  },
  {
    "question": "[Another specific MCQ question using document facts]",
    "type": "mcq",
    "options": ["A) [wrong]", "B) [correct from document]", "C) [wrong]", "D) [wrong]"],
    "correct_answer": "B",
    "explanation": "This is directly stated in the document"
  },
  {
    "question": "Explain [specific concept/process from document] and analyze [specific aspect mentioned in text].",
    "type": "open"
  }
]"#.into(),

      evaluate_open: r#"Evaluate this answer for the given question. Provide a score out of 10 and detailed feedback.

Question: {question}
Student Answer: {answer}

Please provide:
1. Score out of 10
2. What was good about the answer
3. What could be improved
4. Key points that were missed (if any)

Format: Score: X/10
Feedback: [detailed feedback]"#.into(),
    }
  }
}

/// Load `AppConfig` from ASSISTANT_CONFIG_PATH (if set), then apply env overrides.
/// A missing path means defaults; an unreadable or invalid file is logged and ignored.
pub fn load_from_env() -> AppConfig {
  let mut cfg = match std::env::var("ASSISTANT_CONFIG_PATH") {
    Ok(path) => match std::fs::read_to_string(&path) {
      Ok(s) => match toml::from_str::<AppConfig>(&s) {
        Ok(cfg) => {
          info!(target: "research_assistant", %path, "Loaded assistant config (TOML)");
          cfg
        }
        Err(e) => {
          error!(target: "research_assistant", %path, error = %e, "Failed to parse TOML config; using defaults");
          AppConfig::default()
        }
      },
      Err(e) => {
        error!(target: "research_assistant", %path, error = %e, "Failed to read TOML config file; using defaults");
        AppConfig::default()
      }
    },
    Err(_) => AppConfig::default(),
  };

  apply_env_overrides(&mut cfg.completion, |k| std::env::var(k).ok());
  cfg
}

/// Read the completion credential. Kept separate so the key never sits in `AppConfig`.
pub fn api_key_from_env() -> Option<String> {
  std::env::var("GROQ_API_KEY").ok().map(|k| k.trim().to_string()).filter(|k| !k.is_empty())
}

fn apply_env_overrides(settings: &mut CompletionSettings, get: impl Fn(&str) -> Option<String>) {
  if let Some(url) = get("GROQ_BASE_URL").filter(|u| !u.trim().is_empty()) {
    settings.base_url = url.trim().trim_end_matches('/').to_string();
  }
  if let Some(list) = get("GROQ_MODELS") {
    let models: Vec<String> = list
      .split(',')
      .map(|m| m.trim().to_string())
      .filter(|m| !m.is_empty())
      .collect();
    if models.is_empty() {
      warn!(target: "research_assistant", "GROQ_MODELS is set but empty; keeping configured models");
    } else {
      settings.models = models;
    }
  }
}
