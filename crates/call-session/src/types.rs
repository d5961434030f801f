//! Per-call data owned by the controller

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use callrelay_directory::CallRecord;
use callrelay_signaling::{CallId, RoomId, UserId};

use crate::error::{SessionError, SessionResult};
use crate::state::LifecycleState;

/// Which side of the negotiation the local endpoint plays
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Role {
    /// Creates the offer
    Caller,
    /// Answers the offer
    Callee,
}

impl Role {
    /// `Caller` iff `local` is the record's caller
    pub fn for_participant(record: &CallRecord, local: &UserId) -> Role {
        if &record.caller_id == local {
            Role::Caller
        } else {
            Role::Callee
        }
    }
}

/// The local participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalUser {
    pub id: UserId,
    pub name: String,
}

impl LocalUser {
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// The resolved remote participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partner {
    pub id: UserId,
    pub name: String,
}

/// One call attempt
#[derive(Debug, Clone)]
pub struct CallSession {
    pub call_id: CallId,
    pub room_id: Option<RoomId>,
    pub caller_id: UserId,
    pub receiver_id: UserId,
    pub role: Role,
    pub state: LifecycleState,
    /// Set the first time the transport connects
    pub started_at: Option<Instant>,
}

impl CallSession {
    /// Build a session from a directory record. Fails if `local` is not a participant.
    pub fn from_record(record: &CallRecord, local: &UserId) -> SessionResult<Self> {
        if !record.is_participant(local) {
            return Err(SessionError::CallNotFound {
                call_id: record.call_id.clone(),
            });
        }

        Ok(Self {
            call_id: record.call_id.clone(),
            room_id: record.room_id.clone(),
            caller_id: record.caller_id.clone(),
            receiver_id: record.receiver_id.clone(),
            role: Role::for_participant(record, local),
            state: LifecycleState::Initializing,
            started_at: None,
        })
    }

    /// The other participant's id
    pub fn partner_id(&self) -> &UserId {
        match self.role {
            Role::Caller => &self.receiver_id,
            Role::Callee => &self.caller_id,
        }
    }

    /// The local participant's id
    pub fn local_id(&self) -> &UserId {
        match self.role {
            Role::Caller => &self.caller_id,
            Role::Callee => &self.receiver_id,
        }
    }

    /// Whole seconds since the transport first connected, zero if it never did
    pub fn elapsed_seconds(&self) -> u64 {
        self.started_at.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }
}
