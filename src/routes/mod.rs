//! Router assembly: HTTP endpoints, WebSocket upgrade, CORS, upload limit, and HTTP tracing.

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;
pub mod ws;

/// Uploads (multipart or base64 over WS) above this size are rejected.
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Build the application router with:
/// - WebSocket at `/ws`
/// - REST-ish API under `/api/v1/...`, one session per uploaded document
/// - CORS (allow any origin/method/headers)
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // WebSocket
        .route("/ws", get(ws::ws_upgrade))
        // HTTP API
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/status", get(http::http_status))
        .route("/api/v1/documents", post(http::http_upload_document))
        .route("/api/v1/sessions/:id", delete(http::http_close_session))
        .route("/api/v1/sessions/:id/summary", get(http::http_get_summary))
        .route("/api/v1/sessions/:id/ask", post(http::http_post_ask))
        .route(
            "/api/v1/sessions/:id/history",
            get(http::http_get_history).delete(http::http_clear_history),
        )
        .route("/api/v1/sessions/:id/challenge", post(http::http_new_challenge))
        .route("/api/v1/sessions/:id/challenge/answer", post(http::http_answer_mcq))
        .route("/api/v1/sessions/:id/challenge/evaluate", post(http::http_evaluate_open))
        .route("/api/v1/sessions/:id/score", get(http::http_get_score))
        // State + upload limit + CORS + HTTP tracing
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}
