//! Error types for call sessions

use thiserror::Error;

use callrelay_directory::DirectoryError;
use callrelay_signaling::{CallId, SignalingError};

use crate::state::{CallTrigger, LifecycleState};

/// Result type for call session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Failures reported by a transport session implementation
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport session could not be created or configured
    #[error("Transport initialization failed: {0}")]
    Init(String),

    /// A description or candidate was rejected
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// The transport session is already closed
    #[error("Transport session closed")]
    Closed,
}

/// Failures acquiring the local audio source
#[derive(Debug, Error)]
pub enum MediaError {
    /// The user or platform refused access
    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),

    /// No usable capture device
    #[error("No audio input available: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the call session layer
#[derive(Debug, Error)]
pub enum SessionError {
    /// The call record is missing or does not name the local user
    #[error("Call {call_id} not found")]
    CallNotFound { call_id: CallId },

    #[error(transparent)]
    MediaAccess(#[from] MediaError),

    /// The signaling channel could not be opened
    #[error("Signaling connect failed: {0}")]
    Connect(#[from] SignalingError),

    #[error("Transport initialization failed: {0}")]
    TransportInit(String),

    /// An operation was called in a state that does not allow it
    #[error("Invalid state for {operation}: {reason}")]
    InvalidState {
        operation: &'static str,
        reason: String,
    },

    /// The lifecycle transition table has no entry for this trigger
    #[error("Invalid transition from {from:?} on {trigger:?}")]
    InvalidTransition {
        from: LifecycleState,
        trigger: CallTrigger,
    },

    /// The signaling channel closed while the call was in progress
    #[error("Signaling connection lost: {reason}")]
    SignalingLost { reason: String },

    #[error("Connection could not be re-established after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// A remote description or candidate could not be applied
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    #[error("Call directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl SessionError {
    pub fn invalid_state(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            operation,
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether this error terminates the call attempt
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SessionError::InvalidState { .. }
                | SessionError::InvalidTransition { .. }
                | SessionError::Negotiation(_)
        )
    }

    /// Text shown to the user when the call fails with this error
    pub fn user_message(&self) -> String {
        match self {
            SessionError::CallNotFound { .. } => "Call not found".to_string(),
            SessionError::MediaAccess(_) => {
                "Microphone access is required. Please allow microphone permissions.".to_string()
            }
            SessionError::Connect(_) => "Could not reach the call server".to_string(),
            SessionError::TransportInit(_) => "Failed to initialize call".to_string(),
            SessionError::SignalingLost { .. } => "Signaling connection lost".to_string(),
            SessionError::ReconnectExhausted { .. } => "Connection lost. Please try again.".to_string(),
            SessionError::Directory(_) => "Failed to load call details".to_string(),
            SessionError::Configuration { .. } => "Call is misconfigured".to_string(),
            SessionError::InvalidState { .. }
            | SessionError::InvalidTransition { .. }
            | SessionError::Negotiation(_) => "Failed to start call. Please try again.".to_string(),
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Init(reason) => SessionError::TransportInit(reason),
            other => SessionError::Negotiation(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(SessionError::CallNotFound { call_id: "1".into() }.is_fatal());
        assert!(SessionError::from(MediaError::PermissionDenied("no".into())).is_fatal());
        assert!(SessionError::SignalingLost { reason: "eof".into() }.is_fatal());
        assert!(!SessionError::invalid_state("create_offer", "callee").is_fatal());
        assert!(!SessionError::from(TransportError::Negotiation("bad sdp".into())).is_fatal());
    }

    #[test]
    fn transport_init_maps_to_fatal_variant() {
        let err = SessionError::from(TransportError::Init("no api".into()));
        assert!(matches!(err, SessionError::TransportInit(_)));
        assert_eq!(err.user_message(), "Failed to initialize call");
    }
}
