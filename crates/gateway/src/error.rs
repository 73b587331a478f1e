//! Error types for the gateway layer

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use souk_auth::AuthError;
use souk_conversations::ConversationError;
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

/// Body of every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Authorization failed: {0}")]
    AuthorizationFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The detail is logged, never returned.
    #[error("Internal server error")]
    InternalError(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            GatewayError::AuthorizationFailed(_) => StatusCode::FORBIDDEN,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Same codes the socket uses in `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::AuthenticationFailed(_) => "unauthorized",
            GatewayError::AuthorizationFailed(_) => "forbidden",
            GatewayError::InvalidRequest(_) => "validation",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::InternalError(_) => "internal",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if let GatewayError::InternalError(detail) = &self {
            error!(%detail, "request failed");
        }

        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code().to_string(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl From<ConversationError> for GatewayError {
    fn from(error: ConversationError) -> Self {
        match error {
            ConversationError::Validation { message } => GatewayError::InvalidRequest(message),
            ConversationError::AccessDenied { reason } => GatewayError::AuthorizationFailed(reason),
            ConversationError::OwnListing => {
                GatewayError::AuthorizationFailed(ConversationError::OwnListing.to_string())
            }
            error @ (ConversationError::ListingNotFound { .. }
            | ConversationError::ConversationNotFound { .. }) => {
                GatewayError::NotFound(error.to_string())
            }
            error @ (ConversationError::Database(_) | ConversationError::Internal { .. }) => {
                GatewayError::InternalError(error.to_string())
            }
        }
    }
}

impl From<AuthError> for GatewayError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::Database(error) => GatewayError::InternalError(error.to_string()),
            AuthError::SessionNotFound | AuthError::InvalidSession => {
                GatewayError::AuthenticationFailed("Invalid session token".to_string())
            }
            AuthError::SessionExpired => {
                GatewayError::AuthenticationFailed("Session expired".to_string())
            }
            AuthError::UserNotFound => GatewayError::AuthenticationFailed("Unknown user".to_string()),
            AuthError::UserExists => GatewayError::InvalidRequest(error.to_string()),
        }
    }
}
