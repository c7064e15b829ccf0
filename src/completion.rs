//! Resilient chat-completion client.
//!
//! One logical `complete` call walks an ordered list of candidate models. Every candidate gets a
//! small attempt budget; each attempt is reduced to an `AttemptOutcome`, and `transition` decides
//! whether to return, retry the same candidate (possibly after a fixed backoff) or move on.
//! Exhausting every candidate is not an error: the caller gets `CompletionResult::Failure` with a
//! short user-facing message.
//!
//! Calls are instrumented and log model names, status codes, latencies and response sizes.
//! The API key is never logged.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::CompletionSettings;
use crate::util::trunc_for_log;

/// Returned when every candidate model is exhausted.
pub const UNREACHABLE_MESSAGE: &str =
  "Error: Unable to connect to the language model service. Please check your internet connection and API key.";

/// One prompt to send. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
  prompt: String,
  temperature: f64,
  max_output_tokens: u32,
}

impl CompletionRequest {
  /// Temperature is clamped into [0, 1]; the token limit is at least 1.
  pub fn new(prompt: impl Into<String>, temperature: f64, max_output_tokens: u32) -> Self {
    let temperature = if temperature.is_nan() { 0.0 } else { temperature.clamp(0.0, 1.0) };
    Self { prompt: prompt.into(), temperature, max_output_tokens: max_output_tokens.max(1) }
  }

  pub fn prompt(&self) -> &str { &self.prompt }
  pub fn temperature(&self) -> f64 { self.temperature }
  pub fn max_output_tokens(&self) -> u32 { self.max_output_tokens }
}

/// Final answer of a `complete` call. Callers must check it before using the text.
#[derive(Clone, Debug, PartialEq)]
pub enum CompletionResult {
  Success(String),
  Failure(String),
}

impl CompletionResult {
  pub fn is_success(&self) -> bool {
    matches!(self, CompletionResult::Success(_))
  }

  /// Text to show the user: the completion, or the failure message.
  pub fn into_display_text(self) -> String {
    match self {
      CompletionResult::Success(t) | CompletionResult::Failure(t) => t,
    }
  }
}

/// Anything that can turn a prompt into a completion.
#[async_trait]
pub trait Completer: Send + Sync {
  async fn complete(&self, request: &CompletionRequest) -> CompletionResult;

  /// Cheap round-trip used by the status endpoint.
  async fn test_connection(&self) -> bool {
    self.complete(&CompletionRequest::new("Hello", 0.1, 10)).await.is_success()
  }
}

/// Explicit client configuration. The credential is passed in here, never read at call time.
#[derive(Clone)]
pub struct CompletionConfig {
  pub api_key: String,
  pub base_url: String,
  pub models: Vec<String>,
  pub attempts_per_model: u32,
  pub request_timeout: Duration,
  pub rate_limit_backoff: Duration,
  pub connect_backoff: Duration,
  pub system_prompt: String,
}

impl CompletionConfig {
  pub fn from_settings(settings: &CompletionSettings, api_key: impl Into<String>) -> Self {
    Self {
      api_key: api_key.into(),
      base_url: settings.base_url.trim_end_matches('/').to_string(),
      models: settings.models.clone(),
      attempts_per_model: settings.attempts_per_model,
      request_timeout: Duration::from_secs(settings.request_timeout_secs),
      rate_limit_backoff: Duration::from_millis(settings.rate_limit_backoff_ms),
      connect_backoff: Duration::from_millis(settings.connect_backoff_ms),
      system_prompt: settings.system_prompt.clone(),
    }
  }
}

impl std::fmt::Debug for CompletionConfig {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CompletionConfig")
      .field("api_key", &"[REDACTED]")
      .field("base_url", &self.base_url)
      .field("models", &self.models)
      .field("attempts_per_model", &self.attempts_per_model)
      .field("request_timeout", &self.request_timeout)
      .field("rate_limit_backoff", &self.rate_limit_backoff)
      .field("connect_backoff", &self.connect_backoff)
      .finish()
  }
}

/// Why a single attempt did not produce text.
#[derive(Debug, Error)]
pub enum AttemptError {
  #[error("request timed out")]
  Timeout,
  #[error("connection failed: {0}")]
  Connect(String),
  #[error("transport error: {0}")]
  Transport(String),
  #[error("HTTP {status}: {message}")]
  Status { status: StatusCode, message: String },
  #[error("unreadable response: {0}")]
  Body(String),
}

impl From<reqwest::Error> for AttemptError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      AttemptError::Timeout
    } else if e.is_connect() {
      AttemptError::Connect(e.to_string())
    } else if e.is_decode() {
      AttemptError::Body(e.to_string())
    } else {
      AttemptError::Transport(e.to_string())
    }
  }
}

/// What one attempt amounts to, as far as the retry loop is concerned.
#[derive(Clone, Debug, PartialEq)]
pub enum AttemptOutcome {
  Success(String),
  /// Worth another try on the same candidate, after `backoff`.
  Retryable { backoff: Duration },
  /// Pointless to retry this candidate.
  Fatal,
}

/// Next step of the candidate/attempt loop.
#[derive(Clone, Debug, PartialEq)]
pub enum Transition {
  Return(String),
  RetrySame { backoff: Duration },
  NextCandidate,
}

/// Transition table. `attempts_used` counts the attempt that produced `outcome`.
pub fn transition(outcome: AttemptOutcome, attempts_used: u32, budget: u32) -> Transition {
  match outcome {
    AttemptOutcome::Success(text) => Transition::Return(text),
    AttemptOutcome::Fatal => Transition::NextCandidate,
    AttemptOutcome::Retryable { backoff } if attempts_used < budget => Transition::RetrySame { backoff },
    AttemptOutcome::Retryable { .. } => Transition::NextCandidate,
  }
}

/// HTTP client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone, Debug)]
pub struct CompletionClient {
  client: reqwest::Client,
  config: CompletionConfig,
}

impl CompletionClient {
  pub fn new(config: CompletionConfig) -> Result<Self, reqwest::Error> {
    let client = reqwest::Client::builder()
      .timeout(config.request_timeout)
      .build()?;
    Ok(Self { client, config })
  }

  /// Map an attempt result onto the retry policy.
  fn outcome_of(&self, result: Result<String, AttemptError>) -> AttemptOutcome {
    match result {
      Ok(text) => AttemptOutcome::Success(text),
      Err(AttemptError::Status { status, .. }) => match status {
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => AttemptOutcome::Fatal,
        StatusCode::TOO_MANY_REQUESTS => AttemptOutcome::Retryable { backoff: self.config.rate_limit_backoff },
        _ => AttemptOutcome::Retryable { backoff: Duration::ZERO },
      },
      Err(AttemptError::Connect(_)) => AttemptOutcome::Retryable { backoff: self.config.connect_backoff },
      Err(AttemptError::Timeout | AttemptError::Transport(_) | AttemptError::Body(_)) => {
        AttemptOutcome::Retryable { backoff: Duration::ZERO }
      }
    }
  }

  /// Exactly one HTTP exchange with one model.
  async fn attempt(&self, model: &str, request: &CompletionRequest) -> Result<String, AttemptError> {
    let url = format!("{}/chat/completions", self.config.base_url);
    let body = ChatCompletionRequest {
      model,
      messages: [
        ChatMessageReq { role: "system", content: &self.config.system_prompt },
        ChatMessageReq { role: "user", content: request.prompt() },
      ],
      temperature: request.temperature(),
      max_tokens: request.max_output_tokens(),
    };

    let res = self.client.post(&url)
      .header(USER_AGENT, "research-assistant/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.config.api_key))
      .json(&body)
      .send()
      .await?;

    let status = res.status();
    if !status.is_success() {
      let body = res.text().await.unwrap_or_default();
      let message = extract_api_error(&body).unwrap_or_else(|| trunc_for_log(&body, 200));
      return Err(AttemptError::Status { status, message });
    }

    let body: ChatCompletionResponse = res.json().await?;
    if let Some(usage) = &body.usage {
      debug!(target: "completion", prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "Completion usage");
    }
    body.choices
      .into_iter()
      .next()
      .and_then(|c| c.message.content)
      .map(|t| t.trim().to_string())
      .ok_or_else(|| AttemptError::Body("no completion choice in response".into()))
  }
}

#[async_trait]
impl Completer for CompletionClient {
  #[instrument(level = "info", skip_all, fields(prompt_len = request.prompt().len(), temperature = request.temperature(), max_tokens = request.max_output_tokens()))]
  async fn complete(&self, request: &CompletionRequest) -> CompletionResult {
    let budget = self.config.attempts_per_model.max(1);

    for model in &self.config.models {
      let mut used = 0;
      loop {
        used += 1;
        let started = Instant::now();
        let result = self.attempt(model, request).await;
        let elapsed = started.elapsed();

        match &result {
          Ok(text) => info!(target: "completion", %model, attempt = used, ?elapsed, response_len = text.len(), "Completion succeeded"),
          Err(e) => warn!(target: "completion", %model, attempt = used, ?elapsed, error = %e, "Completion attempt failed"),
        }

        match transition(self.outcome_of(result), used, budget) {
          Transition::Return(text) => return CompletionResult::Success(text),
          Transition::RetrySame { backoff } => {
            if !backoff.is_zero() {
              debug!(target: "completion", %model, ?backoff, "Backing off before retry");
              tokio::time::sleep(backoff).await;
            }
          }
          Transition::NextCandidate => {
            debug!(target: "completion", %model, attempts = used, "Advancing to next candidate model");
            break;
          }
        }
      }
    }

    warn!(target: "completion", candidates = self.config.models.len(), "All candidate models exhausted");
    CompletionResult::Failure(UNREACHABLE_MESSAGE.into())
  }
}

/// Used when no credential is configured: fails immediately without network traffic.
#[derive(Clone, Debug, Default)]
pub struct OfflineCompleter;

#[async_trait]
impl Completer for OfflineCompleter {
  async fn complete(&self, _request: &CompletionRequest) -> CompletionResult {
    CompletionResult::Failure(UNREACHABLE_MESSAGE.into())
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
  model: &'a str,
  messages: [ChatMessageReq<'a>; 2],
  temperature: f64,
  max_tokens: u32,
}
#[derive(Serialize)]
struct ChatMessageReq<'a> { role: &'a str, content: &'a str }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from an OpenAI-style error body.
fn extract_api_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}
