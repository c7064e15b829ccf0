//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::{ChatTurn, OptionLabel, QuizMode, QuizQuestion, Scoreboard};

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    UploadDocument {
        name: String,
        #[serde(default)]
        mime: Option<String>,
        #[serde(rename = "contentBase64")]
        content_base64: String,
    },
    Summary {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Ask {
        #[serde(rename = "sessionId")]
        session_id: String,
        question: String,
    },
    ClearChat {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    NewChallenge {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(default)]
        mode: QuizMode,
    },
    AnswerMcq {
        #[serde(rename = "sessionId")]
        session_id: String,
        index: usize,
        choice: String,
    },
    EvaluateOpen {
        #[serde(rename = "sessionId")]
        session_id: String,
        index: usize,
        answer: String,
    },
    Score {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    CloseSession {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Document {
        document: DocumentOut,
    },
    Summary {
        summary: String,
    },
    Answer {
        answer: String,
        evidence: Vec<String>,
    },
    ChatCleared,
    Challenge {
        mode: QuizMode,
        questions: Vec<QuizQuestion>,
    },
    McqResult {
        result: McqResultOut,
    },
    OpenResult {
        result: OpenResultOut,
    },
    Score {
        score: Scoreboard,
    },
    SessionClosed,
    Error {
        message: String,
    },
}

/// Returned after a document upload, over both WS and HTTP.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentOut {
    pub session_id: String,
    pub name: String,
    pub chars: usize,
    pub preview: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McqResultOut {
    pub correct: bool,
    pub correct_answer: OptionLabel,
    pub explanation: String,
    pub score: Scoreboard,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenResultOut {
    pub feedback: String,
    pub points: Option<f32>,
    pub score: Scoreboard,
}

//
// HTTP request/response DTOs
//

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub sessions: usize,
}

#[derive(Serialize)]
pub struct StatusOut {
    pub connected: bool,
}

#[derive(Serialize)]
pub struct SummaryOut {
    pub summary: String,
}

#[derive(Debug, Deserialize)]
pub struct AskIn {
    pub question: String,
}
#[derive(Serialize)]
pub struct AskOut {
    pub answer: String,
    pub evidence: Vec<String>,
}

#[derive(Serialize)]
pub struct HistoryOut {
    pub history: Vec<ChatTurn>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChallengeIn {
    #[serde(default)]
    pub mode: QuizMode,
}
#[derive(Serialize)]
pub struct ChallengeOut {
    pub mode: QuizMode,
    pub questions: Vec<QuizQuestion>,
}

#[derive(Debug, Deserialize)]
pub struct AnswerIn {
    pub index: usize,
    pub choice: String,
}

#[derive(Debug, Deserialize)]
pub struct EvaluateIn {
    pub index: usize,
    pub answer: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorOut {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_messages_use_camel_case_ids() {
        let msg: ClientWsMessage = serde_json::from_value(json!({
            "type": "answer_mcq", "sessionId": "s1", "index": 0, "choice": "B"
        }))
        .unwrap();
        assert!(matches!(msg, ClientWsMessage::AnswerMcq { ref session_id, index: 0, .. } if session_id == "s1"));

        let msg: ClientWsMessage =
            serde_json::from_value(json!({ "type": "new_challenge", "sessionId": "s1" })).unwrap();
        assert!(matches!(msg, ClientWsMessage::NewChallenge { mode: QuizMode::Mixed, .. }));
    }

    #[test]
    fn server_messages_are_tagged() {
        let v = serde_json::to_value(ServerWsMessage::Error { message: "nope".into() }).unwrap();
        assert_eq!(v, json!({ "type": "error", "message": "nope" }));

        let v = serde_json::to_value(ServerWsMessage::ChatCleared).unwrap();
        assert_eq!(v, json!({ "type": "chat_cleared" }));
    }

    #[test]
    fn document_out_is_camel_case() {
        let v = serde_json::to_value(DocumentOut {
            session_id: "abc".into(),
            name: "a.txt".into(),
            chars: 3,
            preview: "abc".into(),
        })
        .unwrap();
        assert_eq!(v["sessionId"], "abc");
    }
}
