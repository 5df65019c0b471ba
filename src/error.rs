//! Error taxonomy for the chat core and its HTTP boundary.

use crate::models::MessageId;
use crate::store::StoreError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("authentication required")]
    Unauthorized,

    #[error("connection is authenticated as a different user")]
    IdentityMismatch,

    #[error("message {0} not found")]
    MessageNotFound(MessageId),

    #[error("attachment index {index} out of range (message has {len})")]
    AttachmentIndexOutOfRange { index: usize, len: usize },

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Forbidden(_) | ChatError::IdentityMismatch => StatusCode::FORBIDDEN,
            ChatError::Unauthorized => StatusCode::UNAUTHORIZED,
            ChatError::MessageNotFound(_) => StatusCode::NOT_FOUND,
            ChatError::AttachmentIndexOutOfRange { .. } => StatusCode::BAD_REQUEST,
            ChatError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client errors are answered to the caller; the rest are server faults.
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if self.is_client_error() {
            self.to_string()
        } else {
            // Storage details stay in the logs.
            "internal error".to_string()
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ChatError::AttachmentIndexOutOfRange { index: 3, len: 2 }.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ChatError::MessageNotFound(1).status(), StatusCode::NOT_FOUND);
        assert_eq!(ChatError::Forbidden("x").status(), StatusCode::FORBIDDEN);
        assert!(!ChatError::Storage(StoreError::new("disk full")).is_client_error());
    }

    #[test]
    fn messages_are_readable() {
        let err = ChatError::AttachmentIndexOutOfRange { index: 3, len: 2 };
        assert_eq!(
            err.to_string(),
            "attachment index 3 out of range (message has 2)"
        );
    }
}
