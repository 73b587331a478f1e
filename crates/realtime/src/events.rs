//! Wire contract for the conversation socket.

use serde::{Deserialize, Serialize};
use souk_conversations::{ConversationError, Message};

/// Client events received from WebSocket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Heartbeat to keep connection alive
    Ping,
    /// Start receiving live events for a conversation
    JoinConversation { conversation_id: String },
    LeaveConversation { conversation_id: String },
    /// Post into a conversation, or start one about a listing
    SendMessage {
        conversation_id: Option<String>,
        listing_id: Option<String>,
        content: String,
    },
    Typing { conversation_id: String },
    MarkRead { conversation_id: String },
}

/// Server events sent to WebSocket clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Sent once after a successful handshake
    Hello { user_id: String, session_id: String },
    Pong,
    Joined { conversation_id: String },
    Left { conversation_id: String },
    /// Full message, delivered to the conversation room
    NewMessage { message: Message },
    /// Lighter notice for the recipient's personal room
    MessageNotification {
        conversation_id: String,
        message: Message,
    },
    UserTyping {
        user_id: String,
        conversation_id: String,
    },
    MessagesRead {
        conversation_id: String,
        read_by: String,
    },
    /// Only ever sent to the connection that caused it
    Error { code: String, message: String },
}

impl ServerEvent {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn invalid_event(message: impl Into<String>) -> Self {
        Self::error("invalid_event", message)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Pong => "pong",
            Self::Joined { .. } => "joined",
            Self::Left { .. } => "left",
            Self::NewMessage { .. } => "new_message",
            Self::MessageNotification { .. } => "message_notification",
            Self::UserTyping { .. } => "user_typing",
            Self::MessagesRead { .. } => "messages_read",
            Self::Error { .. } => "error",
        }
    }
}

impl From<&ConversationError> for ServerEvent {
    /// Storage details stay in the logs.
    fn from(error: &ConversationError) -> Self {
        let message = if error.is_client_error() {
            error.to_string()
        } else {
            "Internal server error".to_string()
        };
        Self::error(error.code(), message)
    }
}
