//! Signaling relay server
//!
//! A pure message relay. Each user holds at most one WebSocket connection at
//! `/ws/{user_id}`; a newer connection replaces the older one. The relay does
//! not interpret SDP or candidates, it only stamps the sender identity and
//! routes frames to the addressed user.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::{SignalingError, SignalingResult};
use crate::ids::UserId;
use crate::message::{ClientMessage, JoinCall, ServerMessage};

const WS_PATH_PREFIX: &str = "/ws/";

struct Peer {
    conn_id: u64,
    tx: mpsc::UnboundedSender<Message>,
}

/// Online users and their outbound queues
#[derive(Default)]
struct Registry {
    peers: DashMap<UserId, Peer>,
    next_conn_id: AtomicU64,
}

impl Registry {
    fn register(&self, user: &UserId, tx: mpsc::UnboundedSender<Message>) -> u64 {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
        if self.peers.insert(user.clone(), Peer { conn_id, tx }).is_some() {
            info!("User {} reconnected, replacing previous connection", user);
        }
        conn_id
    }

    /// Remove `user` only if `conn_id` is still its current connection
    fn unregister(&self, user: &UserId, conn_id: u64) -> bool {
        self.peers.remove_if(user, |_, peer| peer.conn_id == conn_id).is_some()
    }

    fn deliver(&self, user: &UserId, message: &ServerMessage) -> bool {
        let Some(frame) = encode(message) else {
            return false;
        };
        match self.peers.get(user) {
            Some(peer) => peer.tx.send(frame).is_ok(),
            None => false,
        }
    }

    fn broadcast_except(&self, sender: &UserId, message: &ServerMessage) {
        let Some(frame) = encode(message) else {
            return;
        };
        for peer in self.peers.iter() {
            if peer.key() != sender {
                let _ = peer.tx.send(frame.clone());
            }
        }
    }
}

/// WebSocket signaling relay
pub struct SignalingRelay {
    listener: TcpListener,
    registry: Arc<Registry>,
}

impl SignalingRelay {
    /// Bind the relay listener
    pub async fn bind(addr: &str) -> SignalingResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            registry: Arc::new(Registry::default()),
        })
    }

    pub fn local_addr(&self) -> SignalingResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Number of users with an open connection
    pub fn online_count(&self) -> usize {
        self.registry.peers.len()
    }

    /// Accept connections until the listener fails
    pub async fn run(self) -> SignalingResult<()> {
        let addr = self.local_addr()?;
        info!("Signaling relay listening on ws://{}", addr);

        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            let registry = self.registry.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, registry).await {
                    debug!("Connection from {} ended with error: {}", peer_addr, e);
                }
            });
        }
    }

    /// Run the relay on a background task
    pub fn spawn(self) -> JoinHandle<SignalingResult<()>> {
        tokio::spawn(async move {
            let result = self.run().await;
            if let Err(ref e) = result {
                error!("Signaling relay stopped: {}", e);
            }
            result
        })
    }
}

/// Extract the user id from `/ws/{user_id}`
fn user_from_path(path: &str) -> Option<UserId> {
    let id = path.strip_prefix(WS_PATH_PREFIX)?.trim_end_matches('/');
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(UserId::from(id))
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    registry: Arc<Registry>,
) -> SignalingResult<()> {
    let mut user: Option<UserId> = None;

    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            match user_from_path(request.uri().path()) {
                Some(id) => {
                    user = Some(id);
                    Ok(response)
                }
                None => {
                    let mut rejection = ErrorResponse::new(Some("expected /ws/{user_id}".to_string()));
                    *rejection.status_mut() = StatusCode::NOT_FOUND;
                    Err(rejection)
                }
            }
        },
    )
    .await
    .map_err(|e| SignalingError::handshake(e.to_string()))?;

    let user = user.ok_or_else(|| SignalingError::handshake("missing user id"))?;
    info!("User {} connected from {}", user, peer_addr);

    let (mut sink, mut source) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let conn_id = registry.register(&user, tx);

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    registry.broadcast_except(
        &user,
        &ServerMessage::UserStatus {
            user_id: user.clone(),
            is_online: true,
        },
    );

    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(message) => route(&registry, &user, message),
                Err(e) => warn!("Ignoring malformed frame from {}: {}", user, e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Read error from {}: {}", user, e);
                break;
            }
        }
    }

    if registry.unregister(&user, conn_id) {
        info!("User {} disconnected", user);
        registry.broadcast_except(
            &user,
            &ServerMessage::UserStatus {
                user_id: user.clone(),
                is_online: false,
            },
        );
    }
    writer.abort();
    Ok(())
}

fn route(registry: &Registry, sender: &UserId, message: ClientMessage) {
    debug!("Relay <- {} from {}", message.kind(), sender);

    match message {
        ClientMessage::JoinCall(JoinCall { call_id, partner_id }) => {
            let notified = registry.deliver(
                &partner_id,
                &ServerMessage::PartnerJoined {
                    call_id: call_id.clone(),
                    user_id: sender.clone(),
                },
            );
            debug!(
                "User {} joined call {} (partner {} notified: {})",
                sender, call_id, partner_id, notified
            );
        }

        ClientMessage::WebrtcSignal { mut signal } => {
            signal.from_user_id = sender.clone();
            let target = signal.to_user_id.clone();
            let kind = signal.kind();
            if registry.deliver(&target, &ServerMessage::WebrtcSignal { signal }) {
                debug!("Relayed {} from {} to {}", kind, sender, target);
                registry.deliver(sender, &ServerMessage::SignalAck);
            } else {
                warn!("Could not relay {} from {}: {} is offline", kind, sender, target);
                registry.deliver(
                    sender,
                    &ServerMessage::DeliveryFailed {
                        to_user_id: target,
                        reason: "user offline".to_string(),
                    },
                );
            }
        }

        ClientMessage::CallInvite {
            to_user_id,
            call_id,
            caller_name,
        } => {
            let delivered = registry.deliver(
                &to_user_id,
                &ServerMessage::CallInvite {
                    call_id,
                    caller_id: sender.clone(),
                    caller_name,
                },
            );
            if !delivered {
                registry.deliver(
                    sender,
                    &ServerMessage::DeliveryFailed {
                        to_user_id,
                        reason: "user offline".to_string(),
                    },
                );
            }
        }

        ClientMessage::CallResponse {
            call_id,
            to_user_id,
            accepted,
            room_id,
            responder_name,
        } => {
            let notification = if accepted {
                ServerMessage::CallResponse {
                    call_id,
                    from_user_id: sender.clone(),
                    accepted: true,
                    room_id,
                }
            } else {
                let name = responder_name.unwrap_or_else(|| sender.to_string());
                ServerMessage::CallRejected {
                    call_id: Some(call_id),
                    message: Some(format!("{} declined your call", name)),
                    rejected_by_name: name,
                }
            };
            registry.deliver(&to_user_id, &notification);
        }

        ClientMessage::Ping => {
            registry.deliver(sender, &ServerMessage::Pong);
        }
    }
}

fn encode(message: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Message::text(json)),
        Err(e) => {
            error!("Failed to encode {}: {}", message.kind(), e);
            None
        }
    }
}
