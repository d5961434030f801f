//! Pre-call handshake
//!
//! Invitations travel over the same signaling channel a call later uses.
//! The directory owns the call record; this module only keeps track of the
//! invitations addressed to the local user that still await a decision.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use callrelay_directory::{CallDirectory, CallRecord};
use callrelay_signaling::{CallId, ClientMessage, RoomId, ServerMessage, SignalingChannel, UserId};

use crate::error::{SessionError, SessionResult};
use crate::types::LocalUser;

/// What an inbound invitation frame means for the local user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteEvent {
    Incoming {
        call_id: CallId,
        caller_id: UserId,
        caller_name: String,
    },
    Accepted {
        call_id: CallId,
        by: UserId,
        room_id: Option<RoomId>,
    },
    Declined {
        call_id: Option<CallId>,
        by_name: String,
    },
    /// Not answered within the invite timeout
    Missed { call_id: CallId, caller_id: UserId },
}

#[derive(Debug, Clone)]
struct PendingInvite {
    caller_id: UserId,
    received_at: Instant,
}

pub struct InviteCenter {
    local: LocalUser,
    directory: Arc<dyn CallDirectory>,
    channel: Arc<dyn SignalingChannel>,
    timeout: Duration,
    pending: HashMap<CallId, PendingInvite>,
}

impl InviteCenter {
    pub fn new(
        local: LocalUser,
        directory: Arc<dyn CallDirectory>,
        channel: Arc<dyn SignalingChannel>,
        timeout: Duration,
    ) -> Self {
        Self {
            local,
            directory,
            channel,
            timeout,
            pending: HashMap::new(),
        }
    }

    /// Invitations awaiting a local decision
    pub fn pending(&self) -> Vec<CallId> {
        self.pending.keys().cloned().collect()
    }

    /// Create a call to `receiver_id` and notify them
    pub async fn invite(&self, receiver_id: &UserId) -> SessionResult<CallRecord> {
        let record = self.directory.create_invitation(receiver_id).await?;
        info!("Inviting {} to call {}", receiver_id, record.call_id);

        self.channel.send(ClientMessage::CallInvite {
            to_user_id: receiver_id.clone(),
            call_id: record.call_id.clone(),
            caller_name: self.local.name.clone(),
        });
        Ok(record)
    }

    /// Interpret one inbound frame; `None` for frames unrelated to invitations
    pub fn on_message(&mut self, message: &ServerMessage) -> Option<InviteEvent> {
        match message {
            ServerMessage::CallInvite {
                call_id,
                caller_id,
                caller_name,
            } => {
                info!("Incoming call {} from {} ({})", call_id, caller_name, caller_id);
                self.pending.insert(
                    call_id.clone(),
                    PendingInvite {
                        caller_id: caller_id.clone(),
                        received_at: Instant::now(),
                    },
                );
                Some(InviteEvent::Incoming {
                    call_id: call_id.clone(),
                    caller_id: caller_id.clone(),
                    caller_name: caller_name.clone(),
                })
            }
            ServerMessage::CallResponse {
                call_id,
                from_user_id,
                accepted: true,
                room_id,
            } => Some(InviteEvent::Accepted {
                call_id: call_id.clone(),
                by: from_user_id.clone(),
                room_id: room_id.clone(),
            }),
            ServerMessage::CallRejected {
                call_id,
                rejected_by_name,
                ..
            } => Some(InviteEvent::Declined {
                call_id: call_id.clone(),
                by_name: rejected_by_name.clone(),
            }),
            _ => None,
        }
    }

    /// Accept a pending invitation; returns the updated record with its room id
    pub async fn accept(&mut self, call_id: &CallId) -> SessionResult<CallRecord> {
        let invite = self.take_live(call_id, "accept")?;

        let record = self.directory.accept_call(call_id).await?;
        info!("Accepted call {} from {}", call_id, invite.caller_id);

        self.channel.send(ClientMessage::CallResponse {
            call_id: call_id.clone(),
            to_user_id: invite.caller_id,
            accepted: true,
            room_id: record.room_id.clone(),
            responder_name: Some(self.local.name.clone()),
        });
        Ok(record)
    }

    pub fn decline(&mut self, call_id: &CallId) -> SessionResult<()> {
        let invite = self.take_live(call_id, "decline")?;
        info!("Declined call {} from {}", call_id, invite.caller_id);

        self.channel.send(ClientMessage::CallResponse {
            call_id: call_id.clone(),
            to_user_id: invite.caller_id,
            accepted: false,
            room_id: None,
            responder_name: Some(self.local.name.clone()),
        });
        Ok(())
    }

    /// Drop invitations older than the timeout and report them as missed
    pub fn expire(&mut self, now: Instant) -> Vec<InviteEvent> {
        let timeout = self.timeout;
        let expired: Vec<CallId> = self
            .pending
            .iter()
            .filter(|(_, invite)| now.saturating_duration_since(invite.received_at) >= timeout)
            .map(|(id, _)| id.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|call_id| {
                let invite = self.pending.remove(&call_id)?;
                debug!("Invite {} from {} missed", call_id, invite.caller_id);
                Some(InviteEvent::Missed {
                    call_id,
                    caller_id: invite.caller_id,
                })
            })
            .collect()
    }

    fn take_live(&mut self, call_id: &CallId, operation: &'static str) -> SessionResult<PendingInvite> {
        let invite = self
            .pending
            .remove(call_id)
            .ok_or_else(|| SessionError::invalid_state(operation, format!("no pending invite {}", call_id)))?;
        if invite.received_at.elapsed() >= self.timeout {
            return Err(SessionError::invalid_state(operation, format!("invite {} expired", call_id)));
        }
        Ok(invite)
    }
}
