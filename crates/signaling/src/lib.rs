//! # CallRelay signaling
//!
//! Wire protocol, per-user signaling channel and the relay server that routes
//! negotiation messages between the two participants of a call.
//!
//! The client side is abstracted behind [`SignalingConnector`] and
//! [`SignalingChannel`] so call sessions can run against the real WebSocket
//! implementation ([`WebSocketConnector`]) or an in-process fake in tests.

pub mod channel;
pub mod error;
pub mod ids;
pub mod logging;
pub mod message;
pub mod relay;
pub mod ws;

pub use channel::{ChannelEvent, SignalingChannel, SignalingConnector};
pub use error::{SignalingError, SignalingResult};
pub use ids::{CallId, RoomId, UserId};
pub use message::{ClientMessage, IceCandidate, JoinCall, NegotiationMessage, ServerMessage, SignalPayload};
pub use relay::SignalingRelay;
pub use ws::{WebSocketChannel, WebSocketConnector};
