//! Signaling channel abstraction
//!
//! A channel is one persistent, bidirectional, per-user connection to the
//! relay. Inbound frames are delivered on an unbounded event stream returned
//! by [`SignalingConnector::connect`]; outbound frames go through
//! [`SignalingChannel::send`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SignalingResult;
use crate::ids::UserId;
use crate::message::{ClientMessage, JoinCall, ServerMessage};

/// Events surfaced by an open channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A decoded frame from the relay
    Message(ServerMessage),
    /// The link went down. Emitted at most once, and always last.
    Closed { reason: String },
}

/// Outbound half of an open channel
#[async_trait]
pub trait SignalingChannel: Send + Sync + std::fmt::Debug {
    /// Whether the link is currently open
    fn is_open(&self) -> bool;

    /// Fire-and-forget send. A no-op when the channel is not open.
    fn send(&self, message: ClientMessage);

    /// Close the link. Safe to call more than once.
    async fn close(&self);
}

/// Opens channels for a given local user
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    /// Open a channel for `user_id`. When `announce` is set, a `join-call`
    /// frame is sent as soon as the link is open.
    async fn connect(
        &self,
        user_id: &UserId,
        announce: Option<JoinCall>,
    ) -> SignalingResult<(Arc<dyn SignalingChannel>, mpsc::UnboundedReceiver<ChannelEvent>)>;
}
