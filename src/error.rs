//! Errors that can cross the API boundary. Every message is short and user-facing.

use axum::{http::StatusCode, response::IntoResponse, Json};
use thiserror::Error;

use crate::extract::ExtractError;
use crate::protocol::ErrorOut;

#[derive(Debug, Error)]
pub enum ApiError {
  #[error("Unknown session: {0}")]
  UnknownSession(String),
  #[error("No active challenge. Start a new challenge first.")]
  NoChallenge,
  #[error("Question {0} does not exist in the current challenge.")]
  QuestionOutOfRange(usize),
  #[error("Question {0} is not a multiple-choice question.")]
  NotMultipleChoice(usize),
  #[error("Question {0} is not an open-ended question.")]
  NotOpenEnded(usize),
  #[error("Choice '{0}' is not one of A, B, C or D.")]
  InvalidChoice(String),
  #[error("{0}")]
  BadRequest(String),
  #[error(transparent)]
  Extract(#[from] ExtractError),
  #[error("Document processing failed. Please try again.")]
  Internal,
}

impl ApiError {
  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::UnknownSession(_) => StatusCode::NOT_FOUND,
      ApiError::Extract(ExtractError::Unsupported { .. }) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
      ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
      _ => StatusCode::BAD_REQUEST,
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> axum::response::Response {
    (self.status(), Json(ErrorOut { error: self.to_string() })).into_response()
  }
}
