//! Error types for Call Directory access

use thiserror::Error;

/// Result type for directory operations
pub type DirectoryResult<T> = Result<T, DirectoryError>;

#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The requested record does not exist
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// Missing or rejected credentials
    #[error("Unauthorized: {detail}")]
    Unauthorized { detail: String },

    /// Any other non-success response
    #[error("Directory returned {code}: {detail}")]
    Status { code: u16, detail: String },

    /// Network level failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body could not be decoded
    #[error("Failed to decode directory response: {0}")]
    Decode(String),
}

impl DirectoryError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::Unauthorized {
            detail: detail.into(),
        }
    }

    pub fn status(code: u16, detail: impl Into<String>) -> Self {
        Self::Status {
            code,
            detail: detail.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
