//! Research Assistant · Document QA Backend
//!
//! - Axum HTTP + WebSocket API over uploaded PDF/TXT documents
//! - Groq (OpenAI-compatible) chat completions with model fallback and retry
//! - Works without an API key: answers fail softly, quizzes use local fallbacks
//!
//! Important env variables:
//!   PORT                  : u16 (default 3000)
//!   GROQ_API_KEY          : enables the completion service if present
//!   GROQ_BASE_URL         : default "https://api.groq.com/openai/v1"
//!   GROQ_MODELS           : comma-separated candidate models, tried in order
//!   ASSISTANT_CONFIG_PATH : path to TOML config (completion settings + prompts)
//!   LOG_LEVEL             : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT            : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod config;
mod completion;
mod evidence;
mod extract;
mod fallback;
mod quiz;
mod error;
mod state;
mod protocol;
mod logic;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Build shared application state (session store, completion client, prompts).
  let cfg = config::load_from_env();
  let state = Arc::new(AppState::new(cfg, config::api_key_from_env())?);

  // Build the HTTP router with routes, CORS and tracing layers.
  let app = build_router(state.clone());

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "research_assistant", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  Ok(())
}

async fn shutdown_signal() {
  if tokio::signal::ctrl_c().await.is_ok() {
    info!(target: "research_assistant", "Shutdown signal received");
  }
}
