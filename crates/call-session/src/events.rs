//! Events published by a call for UI display

use std::time::Duration;

use callrelay_signaling::{CallId, UserId};

use crate::state::LifecycleState;
use crate::types::{Partner, Role};

/// Incremental status of one call
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    StateChanged {
        call_id: CallId,
        from: LifecycleState,
        to: LifecycleState,
    },
    /// Partner resolved, role decided
    AwaitingPartner { partner: Partner, role: Role },
    /// The partner's channel announced itself for this call
    PartnerJoined { user_id: UserId },
    Negotiating,
    Connected,
    Reconnecting { attempt: u32, retry_in: Duration },
    /// The partner declined before negotiation started
    Declined { by: String },
    MuteChanged { muted: bool },
    Ended { duration_seconds: u64 },
    Failed { reason: String },
}

/// The single terminal result of a call attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Ended { duration_seconds: u64 },
    Failed { reason: String },
}

impl CallOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, CallOutcome::Failed { .. })
    }
}

impl From<&CallOutcome> for CallEvent {
    fn from(outcome: &CallOutcome) -> Self {
        match outcome {
            CallOutcome::Ended { duration_seconds } => CallEvent::Ended {
                duration_seconds: *duration_seconds,
            },
            CallOutcome::Failed { reason } => CallEvent::Failed { reason: reason.clone() },
        }
    }
}
