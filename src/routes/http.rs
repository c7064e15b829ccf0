//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs its parameters and basic result info.

use std::sync::Arc;
use axum::{
  body::Bytes,
  extract::{Multipart, Path, State},
  http::StatusCode,
  Json,
  response::IntoResponse,
};
use tracing::{info, instrument, warn};

use crate::domain::{QuizMode, Scoreboard};
use crate::error::ApiError;
use crate::logic::*;
use crate::protocol::*;
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(HealthOut { ok: true, sessions: state.session_count().await })
}

#[instrument(level = "info", skip(state))]
pub async fn http_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(StatusOut { connected: do_status(&state).await })
}

/// Multipart upload; the first part named `file` is the document.
#[instrument(level = "info", skip(state, multipart))]
pub async fn http_upload_document(
  State(state): State<Arc<AppState>>,
  mut multipart: Multipart,
) -> Result<Json<DocumentOut>, ApiError> {
  while let Some(field) = multipart.next_field().await.map_err(|e| {
    warn!(target: "research_assistant", error = %e, "Malformed multipart body");
    ApiError::BadRequest(format!("Malformed upload: {}", e))
  })? {
    if field.name() != Some("file") {
      continue;
    }
    let name = field.file_name().unwrap_or("document").to_string();
    let mime = field.content_type().map(str::to_string);
    let bytes = field
      .bytes()
      .await
      .map_err(|e| ApiError::BadRequest(format!("Could not read upload: {}", e)))?;
    let out = do_upload(&state, &name, mime.as_deref(), bytes.to_vec()).await?;
    info!(target: "research_assistant", session = %out.session_id, chars = out.chars, "HTTP document uploaded");
    return Ok(Json(out));
  }
  Err(ApiError::BadRequest("Missing 'file' field.".into()))
}

#[instrument(level = "info", skip(state))]
pub async fn http_close_session(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
  state.remove_session(&id).await?;
  Ok(StatusCode::NO_CONTENT)
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_summary(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<Json<SummaryOut>, ApiError> {
  let summary = do_summary(&state, &id).await?;
  Ok(Json(SummaryOut { summary }))
}

#[instrument(level = "info", skip(state, body), fields(question_len = body.question.len()))]
pub async fn http_post_ask(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<AskIn>,
) -> Result<Json<AskOut>, ApiError> {
  let (answer, evidence) = do_ask(&state, &id, &body.question).await?;
  info!(target: "research_assistant", session = %id, evidence = evidence.len(), "HTTP ask answered");
  Ok(Json(AskOut { answer, evidence }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_history(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<Json<HistoryOut>, ApiError> {
  Ok(Json(HistoryOut { history: state.history(&id).await? }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_clear_history(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
  state.clear_history(&id).await?;
  Ok(StatusCode::NO_CONTENT)
}

/// An empty body (or one without `mode`) means the default mixed mode; anything unparsable is a 400.
#[instrument(level = "info", skip(state, body), fields(body_len = body.len()))]
pub async fn http_new_challenge(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  body: Bytes,
) -> Result<Json<ChallengeOut>, ApiError> {
  let mode = if body.iter().all(u8::is_ascii_whitespace) {
    QuizMode::default()
  } else {
    serde_json::from_slice::<ChallengeIn>(&body)
      .map_err(|e| ApiError::BadRequest(format!("Invalid challenge request: {}", e)))?
      .mode
  };
  let questions = do_new_challenge(&state, &id, mode).await?;
  Ok(Json(ChallengeOut { mode, questions }))
}

#[instrument(level = "info", skip(state, body), fields(index = body.index))]
pub async fn http_answer_mcq(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<AnswerIn>,
) -> Result<Json<McqResultOut>, ApiError> {
  let out = do_answer_mcq(&state, &id, body.index, &body.choice).await?;
  info!(target: "quiz", session = %id, index = body.index, correct = out.correct, "HTTP MCQ answer graded");
  Ok(Json(out))
}

#[instrument(level = "info", skip(state, body), fields(index = body.index, answer_len = body.answer.len()))]
pub async fn http_evaluate_open(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<EvaluateIn>,
) -> Result<Json<OpenResultOut>, ApiError> {
  let out = do_evaluate_open(&state, &id, body.index, &body.answer).await?;
  info!(target: "quiz", session = %id, index = body.index, points = ?out.points, "HTTP open answer evaluated");
  Ok(Json(out))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_score(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<Json<Scoreboard>, ApiError> {
  Ok(Json(do_score(&state, &id).await?))
}
