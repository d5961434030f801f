//! Call lifecycle state machine
//!
//! ```text
//! Initializing ──PartnerResolved──▶ AwaitingPartner ──SetupComplete──▶ Negotiating
//!                                        │                              │    ▲
//!                                     Declined            TransportConnected RetryStarted
//!                                        ▼                              ▼    │
//!                                      Ended ◀──Hangup── Connected ──TransportFailed──▶ Reconnecting
//!                                                                                  │
//!                                                                        RetriesExhausted
//!                                                                                  ▼
//!                                                                               Failed
//! ```
//!
//! `Hangup` and `FatalError` are accepted from every non-terminal state.
//! Anything not in [`TRANSITIONS`] is rejected.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SessionError, SessionResult};

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum LifecycleState {
    Initializing,
    AwaitingPartner,
    Negotiating,
    Connected,
    Reconnecting,
    Failed,
    Ended,
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Failed | LifecycleState::Ended)
    }

    /// A transport session exists in these states
    pub fn is_in_call(&self) -> bool {
        matches!(
            self,
            LifecycleState::Negotiating | LifecycleState::Connected | LifecycleState::Reconnecting
        )
    }
}

/// What caused a lifecycle transition
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallTrigger {
    /// Call record fetched and partner resolved
    PartnerResolved,
    /// Channel connected, media acquired, negotiator initialized
    SetupComplete,
    TransportConnected,
    TransportFailed,
    /// A reconnect attempt re-initialized the negotiator
    RetryStarted,
    RetriesExhausted,
    /// The partner declined before negotiation started
    Declined,
    /// Local hangup, remote call-end, or the transport closed
    Hangup,
    FatalError,
}

use CallTrigger as T;
use LifecycleState as S;

/// (from, trigger, to)
pub const TRANSITIONS: &[(LifecycleState, CallTrigger, LifecycleState)] = &[
    (S::Initializing, T::PartnerResolved, S::AwaitingPartner),
    (S::Initializing, T::Hangup, S::Ended),
    (S::Initializing, T::FatalError, S::Failed),
    (S::AwaitingPartner, T::SetupComplete, S::Negotiating),
    (S::AwaitingPartner, T::Declined, S::Ended),
    (S::AwaitingPartner, T::Hangup, S::Ended),
    (S::AwaitingPartner, T::FatalError, S::Failed),
    (S::Negotiating, T::TransportConnected, S::Connected),
    (S::Negotiating, T::TransportFailed, S::Reconnecting),
    (S::Negotiating, T::Hangup, S::Ended),
    (S::Negotiating, T::FatalError, S::Failed),
    (S::Connected, T::TransportFailed, S::Reconnecting),
    (S::Connected, T::Hangup, S::Ended),
    (S::Connected, T::FatalError, S::Failed),
    (S::Reconnecting, T::RetryStarted, S::Negotiating),
    (S::Reconnecting, T::TransportConnected, S::Connected),
    (S::Reconnecting, T::RetriesExhausted, S::Failed),
    (S::Reconnecting, T::Hangup, S::Ended),
    (S::Reconnecting, T::FatalError, S::Failed),
];

/// Look up the target state for `trigger` in `from`
pub fn next_state(from: LifecycleState, trigger: CallTrigger) -> Option<LifecycleState> {
    TRANSITIONS
        .iter()
        .find(|(f, t, _)| *f == from && *t == trigger)
        .map(|(_, _, to)| *to)
}

/// Current lifecycle state of one call
#[derive(Debug, Clone)]
pub struct CallStateMachine {
    state: LifecycleState,
}

impl Default for CallStateMachine {
    fn default() -> Self {
        Self {
            state: LifecycleState::Initializing,
        }
    }
}

impl CallStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn can_apply(&self, trigger: CallTrigger) -> bool {
        next_state(self.state, trigger).is_some()
    }

    /// Apply `trigger`, returning the new state
    pub fn apply(&mut self, trigger: CallTrigger) -> SessionResult<LifecycleState> {
        let to = next_state(self.state, trigger).ok_or(SessionError::InvalidTransition {
            from: self.state,
            trigger,
        })?;
        debug!("Call state {:?} -> {:?} ({:?})", self.state, to, trigger);
        self.state = to;
        Ok(to)
    }
}
