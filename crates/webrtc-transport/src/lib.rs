//! # CallRelay WebRTC transport
//!
//! [`TransportFactory`] and [`TransportSession`] backed by webrtc-rs.
//!
//! Each session is one `RTCPeerConnection` built from a shared [`API`] with
//! the default codecs and interceptors. Every local audio track becomes an
//! Opus [`TrackLocalStaticSample`]; writing samples into those tracks is the
//! job of whoever owns the capture device (see
//! [`WebRtcTransport::audio_tracks`]).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use callrelay_session::{
    CallConfig, IceServerConfig, LocalMediaStream, SdpKind, SessionDescription, TransportError, TransportEvent,
    TransportFactory, TransportSession, TransportState,
};
use callrelay_signaling::IceCandidate;

const STREAM_ID: &str = "callrelay";

fn to_rtc_ice_server(server: &IceServerConfig) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

fn map_state(state: RTCPeerConnectionState) -> TransportState {
    match state {
        RTCPeerConnectionState::Connecting => TransportState::Connecting,
        RTCPeerConnectionState::Connected => TransportState::Connected,
        RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
        RTCPeerConnectionState::Failed => TransportState::Failed,
        RTCPeerConnectionState::Closed => TransportState::Closed,
        _ => TransportState::New,
    }
}

fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_owned(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
        rtcp_feedback: vec![],
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription, TransportError> {
    let parsed = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
    };
    parsed.map_err(|e| TransportError::Negotiation(format!("invalid SDP: {}", e)))
}

/// Creates one peer connection per call attempt
pub struct WebRtcTransportFactory {
    api: API,
    ice_servers: Vec<IceServerConfig>,
}

impl WebRtcTransportFactory {
    pub fn new(ice_servers: Vec<IceServerConfig>) -> Result<Self, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| TransportError::Init(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| TransportError::Init(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, ice_servers })
    }

    /// Factory using the ICE servers of a call configuration
    pub fn from_config(config: &CallConfig) -> Result<Self, TransportError> {
        Self::new(config.ice_servers.clone())
    }

    pub fn ice_servers(&self) -> &[IceServerConfig] {
        &self.ice_servers
    }

    fn configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self.ice_servers.iter().map(to_rtc_ice_server).collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
    ) -> Result<(Arc<dyn TransportSession>, mpsc::UnboundedReceiver<TransportEvent>), TransportError> {
        let peer_connection = self
            .api
            .new_peer_connection(self.configuration())
            .await
            .map_err(|e| TransportError::Init(format!("Failed to create peer connection: {}", e)))?;
        let peer_connection = Arc::new(peer_connection);
        let (events, rx) = mpsc::unbounded_channel();

        let state_events = events.clone();
        peer_connection.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            debug!("Peer connection state: {}", state);
            let _ = state_events.send(TransportEvent::StateChanged(map_state(state)));
            Box::pin(async {})
        }));

        let candidate_events = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = candidate_events.clone();
            Box::pin(async move {
                // `None` marks the end of gathering
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = events.send(TransportEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }));
                    }
                    Err(e) => warn!("Dropping local candidate: {}", e),
                }
            })
        }));

        let transport = WebRtcTransport {
            peer_connection,
            tracks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        };
        Ok((Arc::new(transport), rx))
    }
}

/// One `RTCPeerConnection`
pub struct WebRtcTransport {
    peer_connection: Arc<RTCPeerConnection>,
    tracks: Mutex<Vec<Arc<TrackLocalStaticSample>>>,
    closed: AtomicBool,
}

impl WebRtcTransport {
    /// Outgoing Opus tracks, one per attached local audio track
    pub fn audio_tracks(&self) -> Vec<Arc<TrackLocalStaticSample>> {
        self.tracks.lock().clone()
    }

    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl TransportSession for WebRtcTransport {
    async fn attach_media(&self, media: &LocalMediaStream) -> Result<(), TransportError> {
        self.ensure_open()?;
        for local in media.audio_tracks() {
            let track = Arc::new(TrackLocalStaticSample::new(
                opus_capability(),
                local.id().to_owned(),
                STREAM_ID.to_owned(),
            ));
            self.peer_connection
                .add_track(track.clone() as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| TransportError::Init(format!("Failed to add track: {}", e)))?;
            self.tracks.lock().push(track);
        }
        debug!("Attached {} audio track(s)", media.audio_tracks().len());
        Ok(())
    }

    async fn create_offer(&self) -> Result<String, TransportError> {
        self.ensure_open()?;
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| TransportError::Negotiation(format!("Failed to create offer: {}", e)))?;
        Ok(offer.sdp)
    }

    async fn create_answer(&self) -> Result<String, TransportError> {
        self.ensure_open()?;
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| TransportError::Negotiation(format!("Failed to create answer: {}", e)))?;
        Ok(answer.sdp)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.peer_connection
            .set_local_description(to_rtc_description(description)?)
            .await
            .map_err(|e| TransportError::Negotiation(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.peer_connection
            .set_remote_description(to_rtc_description(description)?)
            .await
            .map_err(|e| TransportError::Negotiation(format!("Failed to set remote description: {}", e)))
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.ensure_open()?;
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| TransportError::Negotiation(format!("Failed to add ICE candidate: {}", e)))
    }

    fn connection_state(&self) -> TransportState {
        if self.closed.load(Ordering::SeqCst) {
            return TransportState::Closed;
        }
        map_state(self.peer_connection.connection_state())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Closing peer connection");
        self.peer_connection
            .close()
            .await
            .map_err(|e| TransportError::Negotiation(format!("Failed to close peer connection: {}", e)))
    }
}
