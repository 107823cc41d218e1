use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub timestamp: u64,
    pub sender: MessageSender,
    pub content: String,
    /// Filenames that went out with a user message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

impl ChatMessage {
    fn now(sender: MessageSender, content: String) -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis() as u64,
            sender,
            content,
            attachments: vec![],
        }
    }

    pub fn user(content: String, attachments: Vec<String>) -> Self {
        Self {
            attachments,
            ..Self::now(MessageSender::User, content)
        }
    }

    pub fn assistant(content: String) -> Self {
        Self::now(MessageSender::Assistant, content)
    }

    pub fn system(content: String) -> Self {
        Self::now(MessageSender::System, content)
    }

    pub fn error(content: String) -> Self {
        Self::now(MessageSender::Error, content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageSender {
    User,
    Assistant,
    System,
    Error,
}
