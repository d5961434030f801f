//! Session negotiator
//!
//! Maps the call role and inbound negotiation messages onto transport
//! session operations, and builds the outbound messages.
//!
//! Remote candidates that arrive before the remote description is applied
//! are queued and flushed, in arrival order, right after it is applied.
//! Messages that do not fit the current role or state are reported as
//! [`RemoteOutcome::Ignored`] and never abort the call.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use callrelay_signaling::{CallId, IceCandidate, NegotiationMessage, SignalPayload, UserId};

use crate::error::{SessionError, SessionResult};
use crate::media::LocalMediaStream;
use crate::transport::{SessionDescription, TransportEvent, TransportFactory, TransportSession, TransportState};
use crate::types::Role;

/// Addressing for every message this negotiator produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalRoute {
    pub call_id: CallId,
    pub local: UserId,
    pub remote: UserId,
}

impl SignalRoute {
    pub fn message(&self, payload: SignalPayload) -> NegotiationMessage {
        NegotiationMessage::new(self.local.clone(), self.remote.clone(), self.call_id.clone(), payload)
    }
}

/// Result of handling one inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome {
    /// Send this message back to the partner
    Reply(NegotiationMessage),
    /// Applied to the transport session, nothing to send
    Applied,
    /// Candidate held until the remote description is set
    Queued,
    /// Not applicable in the current role or state
    Ignored(String),
    /// The partner ended the call; the transport session is closed
    Closed,
}

pub struct SessionNegotiator {
    factory: Arc<dyn TransportFactory>,
    route: SignalRoute,
    role: Option<Role>,
    transport: Option<Arc<dyn TransportSession>>,
    media: Option<Arc<LocalMediaStream>>,
    offer_created: bool,
    remote_description_set: bool,
    pending_candidates: VecDeque<IceCandidate>,
    generation: u64,
}

impl SessionNegotiator {
    pub fn new(factory: Arc<dyn TransportFactory>, route: SignalRoute) -> Self {
        Self {
            factory,
            route,
            role: None,
            transport: None,
            media: None,
            offer_created: false,
            remote_description_set: false,
            pending_candidates: VecDeque::new(),
            generation: 0,
        }
    }

    pub fn route(&self) -> &SignalRoute {
        &self.route
    }

    /// Incremented by every successful `initialize`
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_initialized(&self) -> bool {
        self.transport.is_some()
    }

    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn local_media(&self) -> Option<&Arc<LocalMediaStream>> {
        self.media.as_ref()
    }

    pub fn transport_state(&self) -> Option<TransportState> {
        self.transport.as_ref().map(|t| t.connection_state())
    }

    /// Create a transport session, attach `media` and return its event stream.
    /// Any previous transport session is closed first; the media is kept.
    pub async fn initialize(
        &mut self,
        role: Role,
        media: Arc<LocalMediaStream>,
    ) -> SessionResult<mpsc::UnboundedReceiver<TransportEvent>> {
        if self.transport.is_some() {
            self.reset().await;
        }
        self.media = Some(media.clone());

        let (transport, events) = self
            .factory
            .create()
            .await
            .map_err(|e| SessionError::TransportInit(e.to_string()))?;

        if let Err(e) = transport.attach_media(&media).await {
            let _ = transport.close().await;
            return Err(SessionError::TransportInit(e.to_string()));
        }

        self.transport = Some(transport);
        self.role = Some(role);
        self.offer_created = false;
        self.remote_description_set = false;
        self.pending_candidates.clear();
        self.generation += 1;

        info!(
            "Negotiator initialized for call {} as {:?} (generation {})",
            self.route.call_id, role, self.generation
        );
        Ok(events)
    }

    /// Produce and apply the local offer. Caller only, once per initialization.
    pub async fn create_offer(&mut self) -> SessionResult<NegotiationMessage> {
        if self.role != Some(Role::Caller) {
            return Err(SessionError::invalid_state("create_offer", "only the caller creates offers"));
        }
        if self.offer_created || self.remote_description_set {
            return Err(SessionError::invalid_state("create_offer", "offer already created"));
        }
        let transport = self
            .transport
            .clone()
            .ok_or_else(|| SessionError::invalid_state("create_offer", "not initialized"))?;

        let sdp = transport.create_offer().await?;
        transport
            .set_local_description(SessionDescription::offer(sdp.clone()))
            .await?;
        self.offer_created = true;

        debug!("Created offer for call {}", self.route.call_id);
        Ok(self.route.message(SignalPayload::Offer { sdp }))
    }

    /// Dispatch one inbound message
    pub async fn handle_remote(&mut self, message: NegotiationMessage) -> SessionResult<RemoteOutcome> {
        if message.call_id != self.route.call_id {
            return Ok(self.ignore(format!("message for call {}", message.call_id)));
        }
        if message.from_user_id != self.route.remote {
            return Ok(self.ignore(format!("unexpected sender {}", message.from_user_id)));
        }

        if let SignalPayload::CallEnd = message.payload {
            info!("Partner ended call {}", self.route.call_id);
            self.reset().await;
            return Ok(RemoteOutcome::Closed);
        }

        let Some(transport) = self.transport.clone() else {
            return Ok(self.ignore(format!("{} before initialization", message.kind())));
        };

        match message.payload {
            SignalPayload::Offer { sdp } => {
                if self.role != Some(Role::Callee) {
                    return Ok(self.ignore("offer received by caller"));
                }
                if self.remote_description_set {
                    return Ok(self.ignore("offer already applied"));
                }

                transport.set_remote_description(SessionDescription::offer(sdp)).await?;
                self.remote_description_set = true;
                self.flush_candidates(&transport).await;

                let answer = transport.create_answer().await?;
                transport
                    .set_local_description(SessionDescription::answer(answer.clone()))
                    .await?;

                debug!("Answered offer for call {}", self.route.call_id);
                Ok(RemoteOutcome::Reply(self.route.message(SignalPayload::Answer { sdp: answer })))
            }

            SignalPayload::Answer { sdp } => {
                if self.role != Some(Role::Caller) {
                    return Ok(self.ignore("answer received by callee"));
                }
                if !self.offer_created || self.remote_description_set {
                    return Ok(self.ignore("answer without an outstanding offer"));
                }

                transport.set_remote_description(SessionDescription::answer(sdp)).await?;
                self.remote_description_set = true;
                self.flush_candidates(&transport).await;
                Ok(RemoteOutcome::Applied)
            }

            SignalPayload::Candidate { candidate } => {
                if !self.remote_description_set {
                    self.pending_candidates.push_back(candidate);
                    debug!(
                        "Queued remote candidate ({} pending)",
                        self.pending_candidates.len()
                    );
                    return Ok(RemoteOutcome::Queued);
                }
                transport.add_remote_candidate(candidate).await?;
                Ok(RemoteOutcome::Applied)
            }

            SignalPayload::CallEnd => Ok(RemoteOutcome::Closed),
        }
    }

    /// Outbound message for a locally gathered candidate
    pub fn candidate_message(&self, candidate: IceCandidate) -> NegotiationMessage {
        self.route.message(SignalPayload::Candidate { candidate })
    }

    pub fn call_end_message(&self) -> NegotiationMessage {
        self.route.message(SignalPayload::CallEnd)
    }

    /// Close the transport session but keep the local media
    pub async fn reset(&mut self) {
        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                debug!("Transport close reported: {}", e);
            }
        }
        self.offer_created = false;
        self.remote_description_set = false;
        self.pending_candidates.clear();
    }

    /// Close the transport session and stop the local media. Idempotent.
    pub async fn teardown(&mut self) {
        self.reset().await;
        if let Some(media) = self.media.take() {
            media.stop();
        }
    }

    async fn flush_candidates(&mut self, transport: &Arc<dyn TransportSession>) {
        if self.pending_candidates.is_empty() {
            return;
        }
        debug!("Applying {} queued candidates", self.pending_candidates.len());
        while let Some(candidate) = self.pending_candidates.pop_front() {
            if let Err(e) = transport.add_remote_candidate(candidate).await {
                warn!("Queued candidate rejected: {}", e);
            }
        }
    }

    fn ignore(&self, reason: impl Into<String>) -> RemoteOutcome {
        let reason = reason.into();
        warn!("Ignoring signal on call {}: {}", self.route.call_id, reason);
        RemoteOutcome::Ignored(reason)
    }
}
