//! Error types for the signaling layer

use thiserror::Error;

/// Result type for signaling operations
pub type SignalingResult<T> = Result<T, SignalingError>;

/// Errors that can occur while talking to, or running, the signaling relay
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Could not open the channel (network or handshake failure)
    #[error("Failed to connect to signaling relay at {url}: {reason}")]
    Connect { url: String, reason: String },

    /// The WebSocket handshake was rejected
    #[error("Signaling handshake rejected: {reason}")]
    Handshake { reason: String },

    /// The link is closed
    #[error("Signaling channel closed")]
    Closed,

    /// A frame could not be encoded or decoded
    #[error("Signaling codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Socket level failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl SignalingError {
    /// Create a connect error
    pub fn connect(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connect {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a handshake error
    pub fn handshake(reason: impl Into<String>) -> Self {
        Self::Handshake {
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}
