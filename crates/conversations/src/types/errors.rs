//! Error types for the conversation system.

use thiserror::Error;

/// Result type alias for conversation operations
pub type ConversationResult<T> = Result<T, ConversationError>;

/// Main error type for the conversation system
#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Listing not found: {id}")]
    ListingNotFound { id: String },

    #[error("Conversation not found: {id}")]
    ConversationNotFound { id: String },

    #[error("Access denied: {reason}")]
    AccessDenied { reason: String },

    #[error("Cannot start a conversation on your own listing")]
    OwnListing,

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl ConversationError {
    pub fn listing_not_found(id: impl Into<String>) -> Self {
        Self::ListingNotFound { id: id.into() }
    }

    pub fn conversation_not_found(id: impl Into<String>) -> Self {
        Self::ConversationNotFound { id: id.into() }
    }

    /// Create an access denied error
    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied {
            reason: reason.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable machine readable code, shared by the REST and socket surfaces.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::AccessDenied { .. } | Self::OwnListing => "forbidden",
            Self::ListingNotFound { .. } | Self::ConversationNotFound { .. } => "not_found",
            Self::Database(_) | Self::Internal { .. } => "internal",
        }
    }

    /// Whether the message is safe to show to the caller.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Database(_) | Self::Internal { .. })
    }
}
