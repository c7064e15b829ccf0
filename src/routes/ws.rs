//! WebSocket upgrade + message loop. Each client message is parsed as JSON and
//! forwarded to core logic. We reply with a single JSON message per request.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{debug, error, info, instrument};

use crate::error::ApiError;
use crate::logic::*;
use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::routes::MAX_UPLOAD_BYTES;
use crate::state::AppState;

#[instrument(level = "info", skip(ws, state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "research_assistant", "WebSocket upgrade requested");
  // Base64 inflates by 4/3; leave room for the JSON envelope.
  ws.max_message_size(MAX_UPLOAD_BYTES * 4 / 3 + 4096)
    .on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "research_assistant", "WebSocket connected");
  while let Some(Ok(msg)) = socket.recv().await {
    match msg {
      Message::Text(txt) => {
        let reply_msg = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => handle_client_ws(incoming, &state).await,
          Err(e) => ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) },
        };

        let out = serde_json::to_string(&reply_msg).unwrap_or_else(|e| {
          serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
        });

        if let Err(e) = socket.send(Message::Text(out)).await {
          error!(target: "research_assistant", error = %e, "WS send error");
          break;
        }
      }
      Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
      Message::Close(_) => break,
      _ => {}
    }
  }
  info!(target: "research_assistant", "WebSocket disconnected");
}

/// Dispatch one client message; any `ApiError` becomes an `error` reply.
pub async fn handle_client_ws(msg: ClientWsMessage, state: &AppState) -> ServerWsMessage {
  match dispatch(msg, state).await {
    Ok(reply) => reply,
    Err(e) => {
      debug!(target: "research_assistant", error = %e, "WS request failed");
      ServerWsMessage::Error { message: e.to_string() }
    }
  }
}

async fn dispatch(msg: ClientWsMessage, state: &AppState) -> Result<ServerWsMessage, ApiError> {
  let reply = match msg {
    ClientWsMessage::Ping => ServerWsMessage::Pong,

    ClientWsMessage::UploadDocument { name, mime, content_base64 } => {
      let bytes = STANDARD
        .decode(content_base64.trim())
        .map_err(|e| ApiError::BadRequest(format!("Invalid base64 content: {}", e)))?;
      let document = do_upload(state, &name, mime.as_deref(), bytes).await?;
      info!(target: "research_assistant", session = %document.session_id, chars = document.chars, "WS document uploaded");
      ServerWsMessage::Document { document }
    }

    ClientWsMessage::Summary { session_id } => {
      ServerWsMessage::Summary { summary: do_summary(state, &session_id).await? }
    }

    ClientWsMessage::Ask { session_id, question } => {
      let (answer, evidence) = do_ask(state, &session_id, &question).await?;
      ServerWsMessage::Answer { answer, evidence }
    }

    ClientWsMessage::ClearChat { session_id } => {
      state.clear_history(&session_id).await?;
      ServerWsMessage::ChatCleared
    }

    ClientWsMessage::NewChallenge { session_id, mode } => {
      let questions = do_new_challenge(state, &session_id, mode).await?;
      ServerWsMessage::Challenge { mode, questions }
    }

    ClientWsMessage::AnswerMcq { session_id, index, choice } => {
      let result = do_answer_mcq(state, &session_id, index, &choice).await?;
      info!(target: "quiz", session = %session_id, index, correct = result.correct, "WS MCQ answer graded");
      ServerWsMessage::McqResult { result }
    }

    ClientWsMessage::EvaluateOpen { session_id, index, answer } => {
      let result = do_evaluate_open(state, &session_id, index, &answer).await?;
      ServerWsMessage::OpenResult { result }
    }

    ClientWsMessage::Score { session_id } => {
      ServerWsMessage::Score { score: do_score(state, &session_id).await? }
    }

    ClientWsMessage::CloseSession { session_id } => {
      state.remove_session(&session_id).await?;
      ServerWsMessage::SessionClosed
    }
  };
  Ok(reply)
}
