//! WebSocket signaling channel
//!
//! Connects to `{base_url}/ws/{user_id}`. A writer task owns the sink and is
//! fed through an unbounded mpsc, so [`SignalingChannel::send`] never blocks.
//! A reader task decodes frames into [`ChannelEvent`]s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, SignalingChannel, SignalingConnector};
use crate::error::{SignalingError, SignalingResult};
use crate::ids::UserId;
use crate::message::{ClientMessage, JoinCall, ServerMessage};

/// Opens WebSocket channels against one relay
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    base_url: String,
    keepalive: Option<Duration>,
    connect_timeout: Option<Duration>,
}

impl WebSocketConnector {
    /// `base_url` is the relay root, e.g. `ws://localhost:8000`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            keepalive: None,
            connect_timeout: None,
        }
    }

    /// Send an application-level `ping` frame on this interval
    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive = Some(interval);
        self
    }

    /// Give up on the WebSocket handshake after `timeout`
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Full endpoint for a user
    pub fn endpoint_for(&self, user_id: &UserId) -> String {
        format!("{}/ws/{}", self.base_url, user_id)
    }
}

#[async_trait]
impl SignalingConnector for WebSocketConnector {
    async fn connect(
        &self,
        user_id: &UserId,
        announce: Option<JoinCall>,
    ) -> SignalingResult<(Arc<dyn SignalingChannel>, mpsc::UnboundedReceiver<ChannelEvent>)> {
        let url = self.endpoint_for(user_id);
        debug!("Opening signaling channel to {}", url);

        let handshake = tokio_tungstenite::connect_async(url.as_str());
        let connected = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, handshake)
                .await
                .map_err(|_| SignalingError::connect(&url, format!("timed out after {:?}", limit)))?,
            None => handshake.await,
        };
        let (stream, _response) = connected.map_err(|e| SignalingError::connect(&url, e.to_string()))?;

        info!("Signaling channel open for user {}", user_id);

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        let channel = Arc::new(WebSocketChannel {
            user_id: user_id.clone(),
            outbound: out_tx.clone(),
            open: open.clone(),
        });

        if let Some(join) = announce {
            channel.send(ClientMessage::JoinCall(join));
        }

        // Writer
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let is_close = matches!(frame, Message::Close(_));
                if let Err(e) = sink.send(frame).await {
                    debug!("Signaling writer stopped: {}", e);
                    break;
                }
                if is_close {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Keepalive
        if let Some(interval) = self.keepalive {
            let keepalive_tx = out_tx.clone();
            let keepalive_open = open.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if !keepalive_open.load(Ordering::SeqCst) {
                        break;
                    }
                    match encode(&ClientMessage::Ping) {
                        Some(frame) => {
                            if keepalive_tx.send(frame).is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            });
        }

        // Reader
        let reader_user = user_id.clone();
        tokio::spawn(async move {
            let reason = loop {
                match source.next().await {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerMessage>(text.as_str()) {
                            Ok(message) => {
                                debug!("Signaling <- {} for {}", message.kind(), reader_user);
                                if event_tx.send(ChannelEvent::Message(message)).is_err() {
                                    break "receiver dropped".to_string();
                                }
                            }
                            Err(e) => {
                                warn!("Dropping malformed signaling frame: {}", e);
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by relay".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break e.to_string(),
                    None => break "stream ended".to_string(),
                }
            };

            let reason = if open.swap(false, Ordering::SeqCst) {
                reason
            } else {
                "closed locally".to_string()
            };
            info!("Signaling channel for {} closed: {}", reader_user, reason);
            let _ = event_tx.send(ChannelEvent::Closed { reason });
        });

        Ok((channel, event_rx))
    }
}

/// Outbound half of a WebSocket channel
#[derive(Debug)]
pub struct WebSocketChannel {
    user_id: UserId,
    outbound: mpsc::UnboundedSender<Message>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl SignalingChannel for WebSocketChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&self, message: ClientMessage) {
        if !self.is_open() {
            debug!("Signaling channel closed, dropping {}", message.kind());
            return;
        }
        debug!("Signaling -> {} from {}", message.kind(), self.user_id);
        if let Some(frame) = encode(&message) {
            let _ = self.outbound.send(frame);
        }
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            debug!("Closing signaling channel for {}", self.user_id);
            let _ = self.outbound.send(Message::Close(None));
        }
    }
}

fn encode(message: &ClientMessage) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Message::text(json)),
        Err(e) => {
            warn!("Failed to encode {}: {}", message.kind(), e);
            None
        }
    }
}
