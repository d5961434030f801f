//! Transport session capability surface
//!
//! The media transport is owned by an external implementation (see the
//! `callrelay-webrtc` crate). The negotiator only drives it through
//! [`TransportSession`] and observes it through [`TransportEvent`]s.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use callrelay_signaling::IceCandidate;

use crate::error::TransportError;
use crate::media::LocalMediaStream;

/// Connection state reported by the transport session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportState::New => "new",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Disconnected => "disconnected",
            TransportState::Failed => "failed",
            TransportState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Which kind of session description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Notifications emitted by a transport session
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StateChanged(TransportState),
    /// A locally gathered candidate to trickle to the partner
    LocalCandidate(IceCandidate),
}

/// One media transport session
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Attach the local audio tracks
    async fn attach_media(&self, media: &LocalMediaStream) -> Result<(), TransportError>;

    /// Produce an offer; does not apply it
    async fn create_offer(&self) -> Result<String, TransportError>;

    /// Produce an answer to the applied remote offer; does not apply it
    async fn create_answer(&self) -> Result<String, TransportError>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), TransportError>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), TransportError>;

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    fn connection_state(&self) -> TransportState;

    /// Close the session. Safe to call more than once.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Creates transport sessions together with their event stream
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
    ) -> Result<(Arc<dyn TransportSession>, mpsc::UnboundedReceiver<TransportEvent>), TransportError>;
}
