//! Actor front end for a running call
//!
//! [`CallHandle::spawn`] moves a [`CallSessionController`] onto its own task.
//! User actions arrive as commands and are serialized with the controller's
//! own inputs on that task. A hangup during setup abandons it. Dropping
//! every handle hangs the call up.

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use callrelay_signaling::CallId;

use crate::controller::CallSessionController;
use crate::error::{SessionError, SessionResult};
use crate::events::{CallEvent, CallOutcome};

const COMMAND_CAPACITY: usize = 16;

#[derive(Debug)]
enum CallCommand {
    ToggleMute(oneshot::Sender<bool>),
    Hangup(oneshot::Sender<CallOutcome>),
}

pub struct CallHandle {
    call_id: CallId,
    commands: mpsc::Sender<CallCommand>,
    events: broadcast::Sender<CallEvent>,
    outcome: watch::Receiver<Option<CallOutcome>>,
    task: JoinHandle<()>,
}

impl CallHandle {
    /// Start the call on a new task.
    ///
    /// Subscribe on the controller before spawning to observe the setup events.
    pub fn spawn(mut controller: CallSessionController, call_id: CallId) -> Self {
        let (commands, mut command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (outcome_tx, outcome) = watch::channel(None);
        let events = controller.event_sender();
        let id = call_id.clone();

        let task = tokio::spawn(async move {
            // Setup may wait on the user or the network; a hangup cancels it
            let interrupted = {
                let setup = set_up(&mut controller, id);
                tokio::pin!(setup);
                loop {
                    tokio::select! {
                        _ = &mut setup => break None,
                        command = command_rx.recv() => match command {
                            Some(CallCommand::ToggleMute(reply)) => {
                                // No media yet
                                let _ = reply.send(false);
                            }
                            Some(CallCommand::Hangup(reply)) => break Some(Some(reply)),
                            None => break Some(None),
                        },
                    }
                }
            };
            if let Some(reply) = interrupted {
                info!("Hangup during setup in {:?}", controller.state());
                let outcome = controller.end().await;
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }

            while !controller.is_finished() {
                tokio::select! {
                    command = command_rx.recv() => match command {
                        Some(CallCommand::ToggleMute(reply)) => {
                            let _ = reply.send(controller.toggle_mute());
                        }
                        Some(CallCommand::Hangup(reply)) => {
                            let _ = reply.send(controller.end().await);
                        }
                        None => {
                            debug!("All call handles dropped, hanging up");
                            controller.end().await;
                        }
                    },
                    input = controller.next_input() => controller.handle_input(input).await,
                }
            }

            let result = controller
                .outcome()
                .cloned()
                .unwrap_or(CallOutcome::Ended { duration_seconds: 0 });
            info!("Call task finished: {:?}", result);
            let _ = outcome_tx.send(Some(result));
        });

        Self {
            call_id,
            commands,
            events,
            outcome,
            task,
        }
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// Toggle the microphone; returns the new muted state
    pub async fn toggle_mute(&self) -> SessionResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(CallCommand::ToggleMute(reply))
            .await
            .map_err(|_| SessionError::invalid_state("toggle_mute", "call already finished"))?;
        rx.await
            .map_err(|_| SessionError::invalid_state("toggle_mute", "call already finished"))
    }

    /// Hang up and wait for the outcome. Never fails.
    pub async fn hangup(&self) -> CallOutcome {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(CallCommand::Hangup(reply)).await.is_ok() {
            if let Ok(outcome) = rx.await {
                return outcome;
            }
        }
        self.outcome().await
    }

    /// Wait until the call finishes
    pub async fn outcome(&self) -> CallOutcome {
        let mut outcome = self.outcome.clone();
        loop {
            if let Some(result) = outcome.borrow_and_update().clone() {
                return result;
            }
            if outcome.changed().await.is_err() {
                // Task gone without publishing; it was aborted
                return CallOutcome::Failed {
                    reason: "Call task stopped".to_string(),
                };
            }
        }
    }

    /// Stop the task without reporting. Prefer [`CallHandle::hangup`].
    pub fn abort(&self) {
        self.task.abort();
    }
}

async fn set_up(controller: &mut CallSessionController, call_id: CallId) {
    if controller.start(call_id).await.is_ok() {
        let _ = controller.begin_negotiation().await;
    }
}
