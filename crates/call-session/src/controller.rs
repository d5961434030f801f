//! Call session controller
//!
//! Orchestrates one call end to end. The controller is the single subscriber
//! of its signaling channel and of its transport session: both are pumped
//! into one input queue, together with its own timers, and every input is
//! handled on the controller's loop. Inbound signaling, transport
//! notifications, timers and user actions therefore never race.
//!
//! ```text
//!  SignalingChannel ──▶ pump ──┐
//!  TransportSession ──▶ pump ──┼──▶ input queue ──▶ handle_input ──▶ CallEvent broadcast
//!  offer / retry timers ───────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use callrelay_directory::{CallDirectory, HttpCallDirectory};
use callrelay_signaling::{
    CallId, ChannelEvent, ClientMessage, JoinCall, NegotiationMessage, ServerMessage, SignalPayload,
    SignalingChannel, SignalingConnector, WebSocketConnector,
};

use crate::config::CallConfig;
use crate::error::{SessionError, SessionResult};
use crate::events::{CallEvent, CallOutcome};
use crate::media::MediaProvider;
use crate::negotiator::{RemoteOutcome, SessionNegotiator, SignalRoute};
use crate::reconnect::ReconnectPolicy;
use crate::state::{CallStateMachine, CallTrigger, LifecycleState};
use crate::transport::{TransportEvent, TransportFactory, TransportState};
use crate::types::{CallSession, LocalUser, Partner, Role};

const EVENT_CAPACITY: usize = 64;

/// External collaborators of a call
#[derive(Clone)]
pub struct CallDependencies {
    pub directory: Arc<dyn CallDirectory>,
    pub connector: Arc<dyn SignalingConnector>,
    pub media: Arc<dyn MediaProvider>,
    pub transport: Arc<dyn TransportFactory>,
}

impl CallDependencies {
    /// Production wiring: REST directory and WebSocket signaling from `config`
    pub fn from_config(
        config: &CallConfig,
        token: impl Into<String>,
        media: Arc<dyn MediaProvider>,
        transport: Arc<dyn TransportFactory>,
    ) -> SessionResult<Self> {
        config.validate()?;
        let directory = HttpCallDirectory::new(config.directory_url.clone(), token)?;
        let mut connector =
            WebSocketConnector::new(config.signaling_url.clone()).with_connect_timeout(config.connect_timeout());
        if let Some(interval) = config.keepalive_interval() {
            connector = connector.with_keepalive(interval);
        }

        Ok(Self {
            directory: Arc::new(directory),
            connector: Arc::new(connector),
            media,
            transport,
        })
    }
}

/// Everything the controller's loop reacts to
#[derive(Debug)]
pub enum ControllerInput {
    Signaling(ChannelEvent),
    Transport { generation: u64, event: TransportEvent },
    SendOffer { generation: u64 },
    ReconnectDue { attempt: u32, generation: u64 },
}

pub struct CallSessionController {
    config: CallConfig,
    deps: CallDependencies,
    local: LocalUser,
    machine: CallStateMachine,
    session: Option<CallSession>,
    partner: Option<Partner>,
    negotiator: Option<SessionNegotiator>,
    channel: Option<Arc<dyn SignalingChannel>>,
    policy: ReconnectPolicy,
    joined_reported: bool,
    events: broadcast::Sender<CallEvent>,
    input_tx: mpsc::UnboundedSender<ControllerInput>,
    input_rx: mpsc::UnboundedReceiver<ControllerInput>,
    tasks: Vec<JoinHandle<()>>,
    outcome: Option<CallOutcome>,
}

impl CallSessionController {
    pub fn new(config: CallConfig, deps: CallDependencies, local: LocalUser) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let policy = config.reconnect_policy();

        Self {
            config,
            deps,
            local,
            machine: CallStateMachine::new(),
            session: None,
            partner: None,
            negotiator: None,
            channel: None,
            policy,
            joined_reported: false,
            events,
            input_tx,
            input_rx,
            tasks: Vec::new(),
            outcome: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<CallEvent> {
        self.events.clone()
    }

    pub fn state(&self) -> LifecycleState {
        self.machine.state()
    }

    pub fn session(&self) -> Option<&CallSession> {
        self.session.as_ref()
    }

    pub fn partner(&self) -> Option<&Partner> {
        self.partner.as_ref()
    }

    pub fn outcome(&self) -> Option<&CallOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.machine.state().is_terminal()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.policy.attempts()
    }

    pub fn is_muted(&self) -> bool {
        self.negotiator
            .as_ref()
            .and_then(|n| n.local_media())
            .map(|m| m.is_muted())
            .unwrap_or(false)
    }

    /// Fetch the call record, resolve the partner and decide the role
    pub async fn start(&mut self, call_id: CallId) -> SessionResult<()> {
        if self.state() != LifecycleState::Initializing {
            return Err(SessionError::invalid_state("start", format!("call is {:?}", self.state())));
        }
        info!("Starting call {} for {}", call_id, self.local.id);

        let record = match self.deps.directory.find_call(&call_id).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                return Err(self.fail(SessionError::CallNotFound { call_id }).await);
            }
            Err(e) => return Err(self.fail(SessionError::Directory(e)).await),
        };

        let mut session = match CallSession::from_record(&record, &self.local.id) {
            Ok(session) => session,
            Err(e) => return Err(self.fail(e).await),
        };

        let partner_id = session.partner_id().clone();
        let partner_name = match self.deps.directory.user_profile(&partner_id).await {
            Ok(profile) => profile.name,
            Err(e) => {
                warn!("Could not load partner {}: {}", partner_id, e);
                self.config.partner_placeholder_name.clone()
            }
        };
        let partner = Partner {
            id: partner_id.clone(),
            name: partner_name,
        };

        let route = SignalRoute {
            call_id: session.call_id.clone(),
            local: self.local.id.clone(),
            remote: partner_id,
        };
        self.negotiator = Some(SessionNegotiator::new(self.deps.transport.clone(), route));

        let role = session.role;
        session.state = self.machine.state();
        self.session = Some(session);
        self.partner = Some(partner.clone());
        self.transition(CallTrigger::PartnerResolved)?;

        info!("Call {} partner {} ({}), role {:?}", call_id, partner.id, partner.name, role);
        self.emit(CallEvent::AwaitingPartner { partner, role });
        Ok(())
    }

    /// Connect the signaling channel, acquire media and initialize the negotiator
    pub async fn begin_negotiation(&mut self) -> SessionResult<()> {
        if self.state() != LifecycleState::AwaitingPartner {
            return Err(SessionError::invalid_state(
                "begin_negotiation",
                format!("call is {:?}", self.state()),
            ));
        }
        let (call_id, partner_id, role) = match self.session.as_ref() {
            Some(s) => (s.call_id.clone(), s.partner_id().clone(), s.role),
            None => return Err(SessionError::invalid_state("begin_negotiation", "no session")),
        };

        let announce = JoinCall {
            call_id: call_id.clone(),
            partner_id,
        };
        let (channel, mut channel_events) = match self.deps.connector.connect(&self.local.id, Some(announce)).await {
            Ok(connected) => connected,
            Err(e) => return Err(self.fail(SessionError::Connect(e)).await),
        };
        self.channel = Some(channel);

        // A decline may already be waiting; it ends the call before media is touched
        while let Ok(event) = channel_events.try_recv() {
            if let ChannelEvent::Message(ServerMessage::CallRejected {
                call_id: rejected_call,
                rejected_by_name,
                ..
            }) = &event
            {
                if rejected_call.as_ref().map_or(true, |id| id == &call_id) {
                    self.declined(rejected_by_name.clone()).await;
                    return Ok(());
                }
            }
            let _ = self.input_tx.send(ControllerInput::Signaling(event));
        }
        self.spawn_signaling_pump(channel_events);

        let media = match self.deps.media.acquire(&self.config.audio).await {
            Ok(media) => media,
            Err(e) => return Err(self.fail(SessionError::MediaAccess(e)).await),
        };

        let initialized = match self.negotiator.as_mut() {
            Some(negotiator) => negotiator
                .initialize(role, media.clone())
                .await
                .map(|events| (events, negotiator.generation())),
            None => Err(SessionError::invalid_state("begin_negotiation", "no negotiator")),
        };
        let (transport_events, generation) = match initialized {
            Ok(ok) => ok,
            Err(e) => {
                media.stop();
                return Err(self.fail(e).await);
            }
        };
        self.spawn_transport_pump(generation, transport_events);

        self.transition(CallTrigger::SetupComplete)?;
        self.emit(CallEvent::Negotiating);

        if role == Role::Caller {
            let delay = self.config.offer_delay();
            debug!("Offer scheduled in {:?}", delay);
            self.schedule(delay, ControllerInput::SendOffer { generation });
        }
        Ok(())
    }

    /// Flip the local audio enabled flag; returns the new muted state
    pub fn toggle_mute(&mut self) -> bool {
        let Some(media) = self.negotiator.as_ref().and_then(|n| n.local_media()).cloned() else {
            return false;
        };
        if media.audio_tracks().is_empty() {
            debug!("No audio tracks to mute");
            return false;
        }
        let muted = !media.is_muted();
        media.set_muted(muted);
        info!("Microphone {}", if muted { "muted" } else { "unmuted" });
        self.emit(CallEvent::MuteChanged { muted });
        muted
    }

    /// Local hangup. Never fails; returns the terminal outcome.
    pub async fn end(&mut self) -> CallOutcome {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        info!("Local hangup");
        if let (Some(channel), Some(negotiator)) = (&self.channel, &self.negotiator) {
            if channel.is_open() {
                channel.send(negotiator.call_end_message().into());
            }
        }
        self.terminate(CallTrigger::Hangup, None).await
    }

    /// Wait for the next input. Cancel safe.
    pub async fn next_input(&mut self) -> ControllerInput {
        loop {
            if let Some(input) = self.input_rx.recv().await {
                return input;
            }
        }
    }

    /// Handle one input and return
    pub async fn step(&mut self) {
        let input = self.next_input().await;
        self.handle_input(input).await;
    }

    /// Drive the call until it ends
    pub async fn run(&mut self) -> CallOutcome {
        while !self.is_finished() {
            self.step().await;
        }
        self.outcome
            .clone()
            .unwrap_or(CallOutcome::Ended { duration_seconds: 0 })
    }

    pub async fn handle_input(&mut self, input: ControllerInput) {
        if self.is_finished() {
            debug!("Call finished, dropping {:?}", input);
            return;
        }

        match input {
            ControllerInput::Signaling(ChannelEvent::Message(message)) => {
                self.handle_server_message(message).await;
            }
            ControllerInput::Signaling(ChannelEvent::Closed { reason }) => {
                warn!("Signaling channel closed mid-call: {}", reason);
                self.fail(SessionError::SignalingLost { reason }).await;
            }
            ControllerInput::Transport { generation, event } => {
                if generation != self.current_generation() {
                    debug!("Dropping event from stale transport {}: {:?}", generation, event);
                    return;
                }
                self.handle_transport_event(event).await;
            }
            ControllerInput::SendOffer { generation } => {
                if generation == self.current_generation() && self.state() == LifecycleState::Negotiating {
                    self.send_offer().await;
                }
            }
            ControllerInput::ReconnectDue { attempt, generation } => {
                self.reconnect_due(attempt, generation).await;
            }
        }
    }

    async fn handle_server_message(&mut self, message: ServerMessage) {
        let own_call = self.session.as_ref().map(|s| s.call_id.clone());

        match message {
            ServerMessage::WebrtcSignal { signal } => self.handle_signal(signal).await,

            ServerMessage::CallRejected {
                call_id,
                rejected_by_name,
                ..
            } => {
                let ours = match (&call_id, &own_call) {
                    (Some(rejected), Some(own)) => rejected == own,
                    _ => true,
                };
                if ours && self.state() == LifecycleState::Negotiating && self.session_started_at().is_none() {
                    self.declined(rejected_by_name).await;
                } else {
                    debug!("Ignoring call_rejected from {} in {:?}", rejected_by_name, self.state());
                }
            }

            ServerMessage::PartnerJoined { call_id, user_id } => {
                if Some(&call_id) == own_call.as_ref() {
                    info!("Partner {} joined call {}", user_id, call_id);
                    self.emit(CallEvent::PartnerJoined { user_id });
                }
            }

            ServerMessage::DeliveryFailed { to_user_id, reason } => {
                warn!("Signal to {} not delivered: {}", to_user_id, reason);
            }

            other => debug!("Ignoring {} during call", other.kind()),
        }
    }

    async fn handle_signal(&mut self, signal: NegotiationMessage) {
        let role = self.session.as_ref().map(|s| s.role);
        if !self.state().is_in_call() {
            debug!("Dropping {} in {:?}", signal.kind(), self.state());
            return;
        }

        // A fresh offer after a failure means the caller restarted negotiation
        if role == Some(Role::Callee) && matches!(signal.payload, SignalPayload::Offer { .. }) {
            let needs_restart = self.state() == LifecycleState::Reconnecting
                || self.negotiator.as_ref().map_or(false, |n| n.remote_description_set());
            if needs_restart {
                info!("Renegotiating on new offer");
                if let Err(e) = self.restart_transport().await {
                    self.fail(e).await;
                    return;
                }
            }
        }

        let Some(negotiator) = self.negotiator.as_mut() else {
            return;
        };
        match negotiator.handle_remote(signal).await {
            Ok(RemoteOutcome::Reply(reply)) => self.send_signal(reply),
            Ok(RemoteOutcome::Closed) => {
                self.terminate(CallTrigger::Hangup, None).await;
            }
            Ok(RemoteOutcome::Applied) | Ok(RemoteOutcome::Queued) | Ok(RemoteOutcome::Ignored(_)) => {}
            Err(e) if e.is_fatal() => {
                self.fail(e).await;
            }
            Err(e) => warn!("Signal not applied: {}", e),
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                if let Some(negotiator) = &self.negotiator {
                    let message = negotiator.candidate_message(candidate);
                    self.send_signal(message);
                }
            }
            TransportEvent::StateChanged(TransportState::Connected) => self.on_transport_connected(),
            TransportEvent::StateChanged(TransportState::Failed) => self.on_transport_failed().await,
            TransportEvent::StateChanged(TransportState::Closed) => {
                info!("Transport closed");
                self.terminate(CallTrigger::Hangup, None).await;
            }
            TransportEvent::StateChanged(other) => debug!("Transport {}", other),
        }
    }

    fn on_transport_connected(&mut self) {
        if !self.machine.can_apply(CallTrigger::TransportConnected) {
            return;
        }
        if self.transition(CallTrigger::TransportConnected).is_err() {
            return;
        }

        if let Some(session) = self.session.as_mut() {
            if session.started_at.is_none() {
                session.started_at = Some(Instant::now());
            }
        }
        info!("Call connected");
        self.emit(CallEvent::Connected);

        if !self.joined_reported {
            self.joined_reported = true;
            if let Some(call_id) = self.session.as_ref().map(|s| s.call_id.clone()) {
                let directory = self.deps.directory.clone();
                tokio::spawn(async move {
                    if let Err(e) = directory.mark_joined(&call_id).await {
                        warn!("Failed to mark call {} joined: {}", call_id, e);
                    }
                });
            }
        }
    }

    async fn on_transport_failed(&mut self) {
        let state = self.state();
        if !matches!(
            state,
            LifecycleState::Negotiating | LifecycleState::Connected | LifecycleState::Reconnecting
        ) {
            return;
        }

        let Some(next) = self.policy.next_attempt() else {
            let err = SessionError::ReconnectExhausted {
                attempts: self.policy.attempts(),
            };
            error!("Call failed: {}", err);
            let trigger = if state == LifecycleState::Reconnecting {
                CallTrigger::RetriesExhausted
            } else {
                CallTrigger::FatalError
            };
            self.terminate(trigger, Some(err.user_message())).await;
            return;
        };

        if state != LifecycleState::Reconnecting && self.transition(CallTrigger::TransportFailed).is_err() {
            return;
        }

        warn!(
            "Transport failed, reconnect attempt {}/{} in {:?}",
            next.attempt,
            self.policy.max_attempts(),
            next.delay
        );
        self.emit(CallEvent::Reconnecting {
            attempt: next.attempt,
            retry_in: next.delay,
        });
        let generation = self.current_generation();
        self.schedule(
            next.delay,
            ControllerInput::ReconnectDue {
                attempt: next.attempt,
                generation,
            },
        );
    }

    async fn reconnect_due(&mut self, attempt: u32, generation: u64) {
        if self.state() != LifecycleState::Reconnecting || generation != self.current_generation() {
            debug!("Reconnect attempt {} no longer needed", attempt);
            return;
        }
        let transport_state = self.negotiator.as_ref().and_then(|n| n.transport_state());
        if transport_state != Some(TransportState::Failed) {
            info!("Transport is {:?}, skipping reconnect attempt {}", transport_state, attempt);
            return;
        }

        info!("Reconnect attempt {}", attempt);
        if let Err(e) = self.restart_transport().await {
            self.fail(e).await;
        }
    }

    /// Re-initialize the negotiator with the existing media
    async fn restart_transport(&mut self) -> SessionResult<()> {
        let role = self
            .session
            .as_ref()
            .map(|s| s.role)
            .ok_or_else(|| SessionError::invalid_state("restart_transport", "no session"))?;
        let negotiator = self
            .negotiator
            .as_mut()
            .ok_or_else(|| SessionError::invalid_state("restart_transport", "no negotiator"))?;
        let media = negotiator
            .local_media()
            .cloned()
            .ok_or_else(|| SessionError::invalid_state("restart_transport", "no local media"))?;

        let events = negotiator.initialize(role, media).await?;
        let generation = negotiator.generation();
        self.spawn_transport_pump(generation, events);

        if self.state() == LifecycleState::Reconnecting {
            self.transition(CallTrigger::RetryStarted)?;
            self.emit(CallEvent::Negotiating);
        }
        if role == Role::Caller {
            self.schedule(self.config.offer_delay(), ControllerInput::SendOffer { generation });
        }
        Ok(())
    }

    async fn send_offer(&mut self) {
        let Some(negotiator) = self.negotiator.as_mut() else {
            return;
        };
        match negotiator.create_offer().await {
            Ok(offer) => self.send_signal(offer),
            Err(e @ SessionError::InvalidState { .. }) => warn!("Offer skipped: {}", e),
            Err(e) => {
                error!("Failed to create offer: {}", e);
                self.fail(e).await;
            }
        }
    }

    async fn declined(&mut self, by: String) {
        info!("Call declined by {}", by);
        self.emit(CallEvent::Declined { by });
        let trigger = if self.state() == LifecycleState::AwaitingPartner {
            CallTrigger::Declined
        } else {
            CallTrigger::Hangup
        };
        self.terminate(trigger, None).await;
    }

    /// Terminate with `Failed` and hand the error back for propagation
    async fn fail(&mut self, err: SessionError) -> SessionError {
        error!("Call failed: {}", err);
        self.terminate(CallTrigger::FatalError, Some(err.user_message())).await;
        err
    }

    /// Tear everything down, report the duration and publish the outcome
    async fn terminate(&mut self, trigger: CallTrigger, failure: Option<String>) -> CallOutcome {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }

        let duration_seconds = self.session.as_ref().map(|s| s.elapsed_seconds()).unwrap_or(0);
        let fallback = if failure.is_some() {
            CallTrigger::FatalError
        } else {
            CallTrigger::Hangup
        };
        if self.transition(trigger).is_err() {
            let _ = self.transition(fallback);
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(negotiator) = self.negotiator.as_mut() {
            negotiator.teardown().await;
        }
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }

        if let Some(call_id) = self.session.as_ref().map(|s| s.call_id.clone()) {
            let report = self.deps.directory.end_call(&call_id, duration_seconds);
            match tokio::time::timeout(self.config.report_timeout(), report).await {
                Ok(Ok(())) => debug!("Reported call {} ({}s)", call_id, duration_seconds),
                Ok(Err(e)) => warn!("Failed to report end of call {}: {}", call_id, e),
                Err(_) => warn!("Timed out reporting end of call {}", call_id),
            }
        }

        let outcome = match failure {
            Some(reason) => CallOutcome::Failed { reason },
            None => CallOutcome::Ended { duration_seconds },
        };
        info!("Call finished: {:?}", outcome);
        self.emit(CallEvent::from(&outcome));
        self.outcome = Some(outcome.clone());
        outcome
    }

    fn transition(&mut self, trigger: CallTrigger) -> SessionResult<LifecycleState> {
        let from = self.machine.state();
        let to = self.machine.apply(trigger)?;
        if let Some(session) = self.session.as_mut() {
            session.state = to;
        }
        let call_id = self.session.as_ref().map(|s| s.call_id.clone()).unwrap_or_else(|| CallId::new(""));
        self.emit(CallEvent::StateChanged { call_id, from, to });
        Ok(to)
    }

    fn send_signal(&self, message: NegotiationMessage) {
        if let Some(channel) = &self.channel {
            debug!("Sending {} to {}", message.kind(), message.to_user_id);
            channel.send(ClientMessage::from(message));
        }
    }

    fn emit(&self, event: CallEvent) {
        let _ = self.events.send(event);
    }

    fn current_generation(&self) -> u64 {
        self.negotiator.as_ref().map(|n| n.generation()).unwrap_or(0)
    }

    fn session_started_at(&self) -> Option<Instant> {
        self.session.as_ref().and_then(|s| s.started_at)
    }

    fn schedule(&mut self, delay: Duration, input: ControllerInput) {
        let tx = self.input_tx.clone();
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(input);
        }));
    }

    fn spawn_signaling_pump(&mut self, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
        let tx = self.input_tx.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if tx.send(ControllerInput::Signaling(event)).is_err() {
                    break;
                }
            }
        }));
    }

    fn spawn_transport_pump(&mut self, generation: u64, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        let tx = self.input_tx.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if tx.send(ControllerInput::Transport { generation, event }).is_err() {
                    break;
                }
            }
        }));
    }
}

impl Drop for CallSessionController {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}
