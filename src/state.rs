//! Application state: in-memory session store, prompts, and the completion backend.
//!
//! This module owns:
//!   - sessions by id (document text, chat history, active challenge)
//!   - the prompts struct (from TOML or defaults)
//!   - the completion backend (real client, or offline when no API key is configured)
//!
//! Locks are only held for in-memory reads/writes, never across a model call.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::completion::{Completer, CompletionClient, CompletionConfig, OfflineCompleter};
use crate::config::{AppConfig, Prompts};
use crate::domain::{Challenge, ChatTurn};
use crate::error::ApiError;

/// Everything the service knows about one uploaded document.
#[derive(Clone, Debug)]
pub struct Session {
    pub document_name: String,
    pub document_text: String,
    pub history: Vec<ChatTurn>,
    pub challenge: Option<Challenge>,
}

#[derive(Clone)]
pub struct AppState {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    pub completer: Arc<dyn Completer>,
    pub prompts: Prompts,
}

impl AppState {
    /// Build state from loaded config. Without an API key every completion fails fast.
    #[instrument(level = "info", skip_all, fields(has_api_key = api_key.is_some()))]
    pub fn new(config: AppConfig, api_key: Option<String>) -> Result<Self, reqwest::Error> {
        let completer: Arc<dyn Completer> = match api_key {
            Some(key) => {
                let client = CompletionClient::new(CompletionConfig::from_settings(&config.completion, key))?;
                info!(
                    target: "research_assistant",
                    base_url = %config.completion.base_url,
                    models = ?config.completion.models,
                    "Completion service enabled."
                );
                Arc::new(client)
            }
            None => {
                warn!(target: "research_assistant", "GROQ_API_KEY not set; answers and quizzes will use offline fallbacks.");
                Arc::new(OfflineCompleter)
            }
        };
        Ok(Self::with_completer(completer, config.prompts))
    }

    pub fn with_completer(completer: Arc<dyn Completer>, prompts: Prompts) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            completer,
            prompts,
        }
    }

    /// Register a freshly extracted document and return its session id.
    #[instrument(level = "debug", skip(self, document_text), fields(text_len = document_text.len()))]
    pub async fn create_session(&self, document_name: &str, document_text: String) -> String {
        let id = Uuid::new_v4().to_string();
        let session = Session {
            document_name: document_name.to_string(),
            document_text,
            history: Vec::new(),
            challenge: None,
        };
        self.sessions.write().await.insert(id.clone(), session);
        info!(target: "research_assistant", session = %id, %document_name, "Session created");
        id
    }

    /// Read-only access to a session.
    pub async fn with_session<T>(
        &self,
        id: &str,
        f: impl FnOnce(&Session) -> Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(id)
            .ok_or_else(|| ApiError::UnknownSession(id.to_string()))?;
        f(session)
    }

    /// Mutable access to a session.
    pub async fn with_session_mut<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Session) -> Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| ApiError::UnknownSession(id.to_string()))?;
        f(session)
    }

    /// Drop a session with its document, history and challenge.
    #[instrument(level = "debug", skip(self))]
    pub async fn remove_session(&self, id: &str) -> Result<(), ApiError> {
        match self.sessions.write().await.remove(id) {
            Some(session) => {
                info!(
                    target: "research_assistant",
                    session = %id,
                    document_name = %session.document_name,
                    "Session closed"
                );
                Ok(())
            }
            None => Err(ApiError::UnknownSession(id.to_string())),
        }
    }

    pub async fn document_text(&self, id: &str) -> Result<String, ApiError> {
        self.with_session(id, |s| Ok(s.document_text.clone())).await
    }

    pub async fn push_turns(&self, id: &str, turns: Vec<ChatTurn>) -> Result<(), ApiError> {
        self.with_session_mut(id, |s| {
            s.history.extend(turns);
            Ok(())
        })
        .await
    }

    pub async fn history(&self, id: &str) -> Result<Vec<ChatTurn>, ApiError> {
        self.with_session(id, |s| Ok(s.history.clone())).await
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn clear_history(&self, id: &str) -> Result<(), ApiError> {
        self.with_session_mut(id, |s| {
            debug!(target: "research_assistant", turns = s.history.len(), "Clearing chat history");
            s.history.clear();
            Ok(())
        })
        .await
    }

    /// Replace the active challenge (answers and feedback start over).
    pub async fn set_challenge(&self, id: &str, challenge: Challenge) -> Result<(), ApiError> {
        self.with_session_mut(id, |s| {
            s.challenge = Some(challenge);
            Ok(())
        })
        .await
    }

    pub async fn challenge(&self, id: &str) -> Result<Challenge, ApiError> {
        self.with_session(id, |s| s.challenge.clone().ok_or(ApiError::NoChallenge))
            .await
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChatRole, QuizMode};

    fn state() -> AppState {
        AppState::with_completer(Arc::new(OfflineCompleter), Prompts::default())
    }

    #[tokio::test]
    async fn sessions_keep_history_and_challenge() {
        let st = state();
        let id = st.create_session("notes.txt", "Some text".into()).await;
        assert_eq!(st.document_text(&id).await.unwrap(), "Some text");

        st.push_turns(&id, vec![ChatTurn { role: ChatRole::User, content: "hi".into(), evidence: vec![] }])
            .await
            .unwrap();
        assert_eq!(st.history(&id).await.unwrap().len(), 1);
        st.clear_history(&id).await.unwrap();
        assert!(st.history(&id).await.unwrap().is_empty());

        assert!(matches!(st.challenge(&id).await, Err(ApiError::NoChallenge)));
        st.set_challenge(&id, Challenge::new(QuizMode::Open, vec![])).await.unwrap();
        assert_eq!(st.challenge(&id).await.unwrap().mode, QuizMode::Open);
    }

    #[tokio::test]
    async fn unknown_session_is_reported() {
        let st = state();
        assert!(matches!(st.document_text("nope").await, Err(ApiError::UnknownSession(_))));
        assert_eq!(st.session_count().await, 0);
    }

    #[tokio::test]
    async fn removed_session_is_gone() {
        let st = state();
        let id = st.create_session("notes.txt", "Some text".into()).await;
        st.remove_session(&id).await.unwrap();
        assert_eq!(st.session_count().await, 0);
        assert!(matches!(st.document_text(&id).await, Err(ApiError::UnknownSession(_))));
        assert!(matches!(st.remove_session(&id).await, Err(ApiError::UnknownSession(_))));
    }

    #[test]
    fn missing_api_key_uses_offline_backend() {
        let st = AppState::new(AppConfig::default(), None).unwrap();
        assert_eq!(st.prompts.summary, Prompts::default().summary);
    }
}
