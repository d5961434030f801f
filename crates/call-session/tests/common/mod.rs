//! In-process fakes for call session tests
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use callrelay_directory::{CallRecord, CallStatus, InMemoryCallDirectory, UserProfile};
use callrelay_session::{
    AudioConstraints, CallConfig, CallDependencies, CallEvent, CallSessionController, LocalAudioTrack,
    LocalMediaStream, LocalUser, MediaError, MediaProvider, SdpKind, SessionDescription, TransportError,
    TransportEvent, TransportFactory, TransportSession, TransportState,
};
use callrelay_signaling::{
    CallId, ChannelEvent, ClientMessage, IceCandidate, JoinCall, NegotiationMessage, ServerMessage, SignalPayload,
    SignalingChannel, SignalingConnector, SignalingError, SignalingResult, UserId,
};

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum TransportOp {
    AttachMedia(usize),
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpKind),
    SetRemote(SdpKind, String),
    AddCandidate(String),
    Close,
}

pub struct FakeTransport {
    pub id: usize,
    ops: Mutex<Vec<TransportOp>>,
    state: Mutex<TransportState>,
    remote_set: AtomicBool,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl FakeTransport {
    pub fn ops(&self) -> Vec<TransportOp> {
        self.ops.lock().clone()
    }

    /// Pretend the connection moved to `state`
    pub fn emit_state(&self, state: TransportState) {
        *self.state.lock() = state;
        let _ = self.events.send(TransportEvent::StateChanged(state));
    }

    pub fn emit_candidate(&self, candidate: &str) {
        let _ = self
            .events
            .send(TransportEvent::LocalCandidate(IceCandidate::new(candidate)));
    }

    pub fn is_closed(&self) -> bool {
        *self.state.lock() == TransportState::Closed
    }

    fn record(&self, op: TransportOp) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.ops.lock().push(op);
        Ok(())
    }
}

#[async_trait]
impl TransportSession for FakeTransport {
    async fn attach_media(&self, media: &LocalMediaStream) -> Result<(), TransportError> {
        self.record(TransportOp::AttachMedia(media.audio_tracks().len()))
    }

    async fn create_offer(&self) -> Result<String, TransportError> {
        self.record(TransportOp::CreateOffer)?;
        Ok(format!("offer-{}", self.id))
    }

    async fn create_answer(&self) -> Result<String, TransportError> {
        if !self.remote_set.load(Ordering::SeqCst) {
            return Err(TransportError::Negotiation("no remote offer".into()));
        }
        self.record(TransportOp::CreateAnswer)?;
        Ok(format!("answer-{}", self.id))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), TransportError> {
        self.record(TransportOp::SetLocal(description.kind))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), TransportError> {
        self.record(TransportOp::SetRemote(description.kind, description.sdp))?;
        self.remote_set.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        if !self.remote_set.load(Ordering::SeqCst) {
            return Err(TransportError::Negotiation("candidate before remote description".into()));
        }
        self.record(TransportOp::AddCandidate(candidate.candidate))
    }

    fn connection_state(&self) -> TransportState {
        *self.state.lock()
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            return Ok(());
        }
        self.ops.lock().push(TransportOp::Close);
        self.emit_state(TransportState::Closed);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeTransportFactory {
    created: Mutex<Vec<Arc<FakeTransport>>>,
    fail: AtomicBool,
}

impl FakeTransportFactory {
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.created.lock().len()
    }

    pub fn get(&self, index: usize) -> Arc<FakeTransport> {
        self.created.lock()[index].clone()
    }

    pub fn latest(&self) -> Arc<FakeTransport> {
        self.created.lock().last().cloned().expect("no transport created")
    }
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn create(
        &self,
    ) -> Result<(Arc<dyn TransportSession>, mpsc::UnboundedReceiver<TransportEvent>), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Init("transport unavailable".into()));
        }
        let (events, rx) = mpsc::unbounded_channel();
        let mut created = self.created.lock();
        let transport = Arc::new(FakeTransport {
            id: created.len() + 1,
            ops: Mutex::new(Vec::new()),
            state: Mutex::new(TransportState::New),
            remote_set: AtomicBool::new(false),
            events,
        });
        created.push(transport.clone());
        Ok((transport, rx))
    }
}

// ---------------------------------------------------------------------------
// Signaling
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct FakeChannel {
    sent: Mutex<Vec<ClientMessage>>,
    open: AtomicBool,
    closes: AtomicUsize,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl FakeChannel {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
            closes: AtomicUsize::new(0),
            events,
        });
        (channel, rx)
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().clone()
    }

    /// Only the negotiation messages, in send order
    pub fn signals(&self) -> Vec<NegotiationMessage> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                ClientMessage::WebrtcSignal { signal } => Some(signal),
                _ => None,
            })
            .collect()
    }

    pub fn deliver(&self, message: ServerMessage) {
        let _ = self.events.send(ChannelEvent::Message(message));
    }

    /// Simulate the relay going away
    pub fn drop_link(&self, reason: &str) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.events.send(ChannelEvent::Closed {
            reason: reason.to_string(),
        });
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalingChannel for FakeChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&self, message: ClientMessage) {
        if self.is_open() {
            self.sent.lock().push(message);
        }
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeConnector {
    channel: Mutex<Option<Arc<FakeChannel>>>,
    preload: Mutex<VecDeque<ServerMessage>>,
    fail: AtomicBool,
}

impl FakeConnector {
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Frames waiting on the channel the moment it opens
    pub fn preload(&self, message: ServerMessage) {
        self.preload.lock().push_back(message);
    }

    pub fn channel(&self) -> Arc<FakeChannel> {
        self.channel.lock().clone().expect("channel not connected")
    }

    pub fn is_connected(&self) -> bool {
        self.channel.lock().is_some()
    }
}

#[async_trait]
impl SignalingConnector for FakeConnector {
    async fn connect(
        &self,
        user_id: &UserId,
        announce: Option<JoinCall>,
    ) -> SignalingResult<(Arc<dyn SignalingChannel>, mpsc::UnboundedReceiver<ChannelEvent>)> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SignalingError::connect(format!("fake://{}", user_id), "connection refused"));
        }
        let (channel, rx) = FakeChannel::new();
        if let Some(join) = announce {
            channel.send(ClientMessage::JoinCall(join));
        }
        for message in self.preload.lock().drain(..) {
            channel.deliver(message);
        }
        *self.channel.lock() = Some(channel.clone());
        Ok((channel, rx))
    }
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeMediaProvider {
    acquired: AtomicUsize,
    deny: AtomicBool,
    trackless: AtomicBool,
    last: Mutex<Option<Arc<LocalMediaStream>>>,
}

impl FakeMediaProvider {
    pub fn set_deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    /// Hand out streams without audio tracks
    pub fn set_trackless(&self, trackless: bool) {
        self.trackless.store(trackless, Ordering::SeqCst);
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn last(&self) -> Arc<LocalMediaStream> {
        self.last.lock().clone().expect("no media acquired")
    }
}

#[async_trait]
impl MediaProvider for FakeMediaProvider {
    async fn acquire(&self, _constraints: &AudioConstraints) -> Result<Arc<LocalMediaStream>, MediaError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied("user dismissed the prompt".into()));
        }
        let count = self.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        let tracks = if self.trackless.load(Ordering::SeqCst) {
            Vec::new()
        } else {
            vec![Arc::new(LocalAudioTrack::new(format!("mic-{}", count)))]
        };
        let stream = Arc::new(LocalMediaStream::new(tracks));
        *self.last.lock() = Some(stream.clone());
        Ok(stream)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub const CALL_ID: &str = "42";

/// One endpoint's fakes plus a directory holding call 42 from alice to bob
pub struct Harness {
    pub local: LocalUser,
    pub directory: InMemoryCallDirectory,
    pub connector: Arc<FakeConnector>,
    pub media: Arc<FakeMediaProvider>,
    pub transport: Arc<FakeTransportFactory>,
}

impl Harness {
    pub fn new(local: &str) -> Self {
        let directory = InMemoryCallDirectory::new(local);
        directory.insert_user(UserProfile::new("alice", "Alice"));
        directory.insert_user(UserProfile::new("bob", "Bob"));
        Self::with_directory(local, directory)
    }

    pub fn with_directory(local: &str, directory: InMemoryCallDirectory) -> Self {
        let mut record = CallRecord::pending(CallId::from(CALL_ID), "alice".into(), "bob".into());
        record.status = CallStatus::Accepted;
        directory.insert_call(record);

        let name = if local == "alice" { "Alice" } else { "Bob" };
        Self {
            local: LocalUser::new(local, name),
            directory,
            connector: Arc::new(FakeConnector::default()),
            media: Arc::new(FakeMediaProvider::default()),
            transport: Arc::new(FakeTransportFactory::default()),
        }
    }

    pub fn deps(&self) -> CallDependencies {
        CallDependencies {
            directory: Arc::new(self.directory.clone()),
            connector: self.connector.clone(),
            media: self.media.clone(),
            transport: self.transport.clone(),
        }
    }

    pub fn controller(&self, config: CallConfig) -> CallSessionController {
        CallSessionController::new(config, self.deps(), self.local.clone())
    }

    pub fn partner_id(&self) -> UserId {
        if self.local.id.as_str() == "alice" {
            UserId::from("bob")
        } else {
            UserId::from("alice")
        }
    }

    /// A negotiation frame from the partner, as the relay delivers it
    pub fn from_partner(&self, payload: SignalPayload) -> ServerMessage {
        ServerMessage::WebrtcSignal {
            signal: NegotiationMessage::new(self.partner_id(), self.local.id.clone(), CallId::from(CALL_ID), payload),
        }
    }
}

/// Step the controller until `done` holds
pub async fn step_until(
    controller: &mut CallSessionController,
    mut done: impl FnMut(&CallSessionController) -> bool,
) {
    for _ in 0..64 {
        if done(controller) {
            return;
        }
        if tokio::time::timeout(Duration::from_secs(120), controller.step())
            .await
            .is_err()
        {
            panic!("controller stalled in {:?}", controller.state());
        }
    }
    panic!("condition not reached, controller in {:?}", controller.state());
}

/// Everything published so far
pub fn drain(events: &mut broadcast::Receiver<CallEvent>) -> Vec<CallEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
