use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const GREETING: &str = "Hello! I'm your coding assistant. How can I help you today?";
pub const APOLOGY: &str = "Sorry, I couldn't get an answer right now. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatSender {
    User,
    Assistant,
}

/// Message body: plain text, or a structured object returned by the assistant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatPayload {
    Text(String),
    Structured(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub sender: ChatSender,
    pub payload: ChatPayload,
    pub loading: bool,
}

impl ChatMessage {
    pub fn user(text: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: ChatSender::User,
            payload: ChatPayload::Text(text.to_string()),
            loading: false,
        }
    }

    pub fn assistant(payload: ChatPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: ChatSender::Assistant,
            payload,
            loading: false,
        }
    }

    pub fn placeholder() -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: ChatSender::Assistant,
            payload: ChatPayload::Text(String::new()),
            loading: true,
        }
    }

    /// How the message should be presented
    pub fn render(&self) -> RenderedMessage {
        if self.loading {
            return RenderedMessage::Loading;
        }
        match &self.payload {
            ChatPayload::Text(text) => RenderedMessage::RichText(text.clone()),
            ChatPayload::Structured(value) => RenderedMessage::Literal(
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderedMessage {
    Loading,
    /// Markdown-formatted text
    RichText(String),
    /// Structured dump shown verbatim
    Literal(String),
}

/// Request body for POST /technical-qna
#[derive(Debug, Serialize)]
pub struct QnaRequest<'a> {
    pub question: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct QnaResponse {
    #[serde(default)]
    pub answer: Option<ChatPayload>,
}
