//! Signaling wire protocol
//!
//! Every frame on the channel is a JSON object carrying a `type` tag.
//! Frames sent by a client to the relay are [`ClientMessage`]s, frames pushed
//! by the relay to a client are [`ServerMessage`]s. Negotiation payloads
//! travel inside `webrtc-signal` frames as [`NegotiationMessage`]s.
//!
//! ```text
//! caller                    relay                     callee
//!   │ join-call ──────────────▶│──── partner_joined ───▶│
//!   │ webrtc-signal(offer) ───▶│──── webrtc-signal ────▶│
//!   │◀──────── signal_ack ─────│                        │
//!   │◀──── webrtc-signal ──────│◀─ webrtc-signal(answer)│
//!   │ webrtc-signal(ice) ◀────▶│◀───▶ webrtc-signal(ice)│
//! ```

use serde::{Deserialize, Serialize};

use crate::ids::{CallId, RoomId, UserId};

/// One transport candidate, in the browser's `RTCIceCandidateInit` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Candidate with only the `candidate:` line set
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// Negotiation payload variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SignalPayload {
    #[serde(rename = "offer")]
    Offer { sdp: String },
    #[serde(rename = "answer")]
    Answer { sdp: String },
    #[serde(rename = "ice-candidate")]
    Candidate { candidate: IceCandidate },
    #[serde(rename = "call-end")]
    CallEnd,
}

impl SignalPayload {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            SignalPayload::Offer { .. } => "offer",
            SignalPayload::Answer { .. } => "answer",
            SignalPayload::Candidate { .. } => "ice-candidate",
            SignalPayload::CallEnd => "call-end",
        }
    }
}

/// An addressed negotiation message. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationMessage {
    /// Sender; the relay overwrites it with the sender's connection identity
    #[serde(rename = "from")]
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub call_id: CallId,
    #[serde(flatten)]
    pub payload: SignalPayload,
}

impl NegotiationMessage {
    pub fn new(from: UserId, to: UserId, call_id: CallId, payload: SignalPayload) -> Self {
        Self {
            from_user_id: from,
            to_user_id: to,
            call_id,
            payload,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }
}

/// Presence announcement for one call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinCall {
    pub call_id: CallId,
    pub partner_id: UserId,
}

/// Frames sent by a client to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "join-call")]
    JoinCall(JoinCall),

    #[serde(rename = "webrtc-signal")]
    WebrtcSignal { signal: NegotiationMessage },

    /// Ask the relay to notify `to_user_id` of a new call request
    #[serde(rename = "call_invite")]
    CallInvite {
        to_user_id: UserId,
        call_id: CallId,
        caller_name: String,
    },

    /// Accept or decline an invitation
    #[serde(rename = "call_response")]
    CallResponse {
        call_id: CallId,
        to_user_id: UserId,
        accepted: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        responder_name: Option<String>,
    },

    #[serde(rename = "ping")]
    Ping,
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::JoinCall(_) => "join-call",
            ClientMessage::WebrtcSignal { .. } => "webrtc-signal",
            ClientMessage::CallInvite { .. } => "call_invite",
            ClientMessage::CallResponse { .. } => "call_response",
            ClientMessage::Ping => "ping",
        }
    }
}

impl From<NegotiationMessage> for ClientMessage {
    fn from(signal: NegotiationMessage) -> Self {
        ClientMessage::WebrtcSignal { signal }
    }
}

/// Frames pushed by the relay to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "webrtc-signal")]
    WebrtcSignal { signal: NegotiationMessage },

    /// Unsolicited notification of a new call request
    #[serde(rename = "call_invite")]
    CallInvite {
        call_id: CallId,
        caller_id: UserId,
        caller_name: String,
    },

    /// The invited user accepted
    #[serde(rename = "call_response")]
    CallResponse {
        call_id: CallId,
        from_user_id: UserId,
        accepted: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
    },

    /// The invited user declined
    #[serde(rename = "call_rejected")]
    CallRejected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<CallId>,
        rejected_by_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    #[serde(rename = "partner_joined")]
    PartnerJoined { call_id: CallId, user_id: UserId },

    #[serde(rename = "signal_ack")]
    SignalAck,

    /// The addressed user has no open channel
    #[serde(rename = "delivery_failed")]
    DeliveryFailed { to_user_id: UserId, reason: String },

    #[serde(rename = "user_status")]
    UserStatus { user_id: UserId, is_online: bool },

    #[serde(rename = "pong")]
    Pong,
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::WebrtcSignal { .. } => "webrtc-signal",
            ServerMessage::CallInvite { .. } => "call_invite",
            ServerMessage::CallResponse { .. } => "call_response",
            ServerMessage::CallRejected { .. } => "call_rejected",
            ServerMessage::PartnerJoined { .. } => "partner_joined",
            ServerMessage::SignalAck => "signal_ack",
            ServerMessage::DeliveryFailed { .. } => "delivery_failed",
            ServerMessage::UserStatus { .. } => "user_status",
            ServerMessage::Pong => "pong",
        }
    }
}
