//! WebSocket relay with credential check and fan-out.
//!
//! Architecture:
//! ```text
//! Editor A ──┐                              ┌──► Editor A (echo)
//!             ├── auth ──► credential table  │
//! Editor B ──┘      │                        ├──► Editor B
//!                   ▼                        │
//!            broadcast channel ──────────────┴──► Editor C
//! ```
//!
//! The relay keeps no document state. Once a connection authenticates it
//! subscribes to the shared broadcast channel and every frame it sends is
//! forwarded verbatim to every authenticated connection, itself included;
//! editors drop their own echoes. When a connection drops, the relay
//! announces a `disconnect` for the last participant id it carried.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;

use crate::protocol::{Message, ProtocolError};
use crate::session::ParticipantId;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum simultaneous connections
    pub max_clients: usize,
    /// Frames buffered per subscriber before it lags
    pub broadcast_capacity: usize,
    /// username → password
    pub credentials: HashMap<String, String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        let credentials = [("alice", "1234"), ("bob", "abcd")]
            .into_iter()
            .map(|(user, pass)| (user.to_string(), pass.to_string()))
            .collect();
        Self {
            bind_addr: "127.0.0.1:9000".to_string(),
            max_clients: 10,
            broadcast_capacity: 256,
            credentials,
        }
    }
}

impl RelayConfig {
    pub fn with_bind_addr(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            ..Self::default()
        }
    }

    fn accepts(&self, username: &str, password: &str) -> bool {
        self.credentials
            .get(username)
            .is_some_and(|expected| expected == password)
    }
}

/// Relay statistics.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub refused_connections: u64,
    pub authenticated: u64,
    pub failed_auth: u64,
    pub relayed_frames: u64,
}

/// Relay errors.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Shared per-relay state handed to each connection task.
#[derive(Clone)]
struct Shared {
    config: Arc<RelayConfig>,
    sender: broadcast::Sender<Arc<String>>,
    stats: Arc<RwLock<RelayStats>>,
}

/// The relay server.
pub struct Relay {
    shared: Shared,
    active: Arc<AtomicUsize>,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        let (sender, _) = broadcast::channel(config.broadcast_capacity.max(1));
        Self {
            shared: Shared {
                config: Arc::new(config),
                sender,
                stats: Arc::new(RwLock::new(RelayStats::default())),
            },
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    pub fn config(&self) -> &RelayConfig {
        &self.shared.config
    }

    pub async fn stats(&self) -> RelayStats {
        self.shared.stats.read().await.clone()
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), RelayError> {
        let listener = TcpListener::bind(&self.shared.config.bind_addr).await?;
        log::info!("Relay listening on {}", self.shared.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayError> {
        loop {
            let (stream, addr) = listener.accept().await?;

            if self.active.load(Ordering::SeqCst) >= self.shared.config.max_clients {
                log::warn!("Refusing {addr}: {} clients connected", self.shared.config.max_clients);
                self.shared.stats.write().await.refused_connections += 1;
                drop(stream);
                continue;
            }

            log::debug!("New TCP connection from {addr}");
            self.active.fetch_add(1, Ordering::SeqCst);
            {
                let mut s = self.shared.stats.write().await;
                s.total_connections += 1;
                s.active_connections += 1;
            }

            let shared = self.shared.clone();
            let active = self.active.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, &shared).await {
                    log::error!("Connection error from {addr}: {e}");
                }
                active.fetch_sub(1, Ordering::SeqCst);
                shared.stats.write().await.active_connections -= 1;
            });
        }
    }
}

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// What the relay remembers about one connection.
#[derive(Default)]
struct Peer {
    /// Subscribed only once the connection authenticates.
    feed: Option<broadcast::Receiver<Arc<String>>>,
    last_participant: Option<ParticipantId>,
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    shared: &Shared,
) -> Result<(), RelayError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    log::info!("WebSocket connection established from {addr}");

    let mut peer = Peer::default();
    let outcome = relay_frames(&mut ws_sender, &mut ws_receiver, addr, shared, &mut peer).await;

    if let Some(user_id) = peer.last_participant {
        log::info!("Announcing departure of {user_id}");
        let frame = Message::Disconnect { user_id }.encode()?;
        let _ = shared.sender.send(Arc::new(frame));
    }

    outcome
}

async fn relay_frames(
    ws_sender: &mut WsSink,
    ws_receiver: &mut WsSource,
    addr: SocketAddr,
    shared: &Shared,
    peer: &mut Peer,
) -> Result<(), RelayError> {
    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => match Message::decode(text.as_str()) {
                        Ok(Message::Auth { username, password }) => {
                            let accepted = shared.config.accepts(&username, &password);
                            // Subscribe before acknowledging so no frame sent after
                            // the ack can be missed.
                            if accepted && peer.feed.is_none() {
                                peer.feed = Some(shared.sender.subscribe());
                            }
                            let reply = if accepted {
                                Message::auth_ok()
                            } else {
                                Message::auth_failed()
                            };
                            ws_sender.send(WsMessage::Text(reply.encode()?.into())).await?;

                            let mut s = shared.stats.write().await;
                            if accepted {
                                log::info!("{username} authenticated from {addr}");
                                s.authenticated += 1;
                            } else {
                                log::warn!("Failed login for {username:?} from {addr}");
                                s.failed_auth += 1;
                            }
                        }
                        Ok(msg) => {
                            if peer.feed.is_none() {
                                log::debug!("Ignoring {} from unauthenticated {addr}", msg.kind());
                                continue;
                            }
                            peer.last_participant = match &msg {
                                Message::Disconnect { .. } => None,
                                other => other.sender().cloned(),
                            };
                            let _ = shared.sender.send(Arc::new(text.as_str().to_string()));
                            shared.stats.write().await.relayed_frames += 1;
                        }
                        Err(e) => log::warn!("Dropping frame from {addr}: {e}"),
                    },
                    Some(Ok(WsMessage::Close(_))) | None => {
                        log::info!("Connection closed from {addr}");
                        return Ok(());
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        ws_sender.send(WsMessage::Pong(data)).await?;
                    }
                    Some(Err(e)) => {
                        log::warn!("WebSocket error from {addr}: {e}");
                        return Ok(());
                    }
                    _ => {}
                }
            }

            frame = async {
                match peer.feed.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                match frame {
                    Ok(frame) => {
                        ws_sender.send(WsMessage::Text(String::clone(&frame).into())).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("Connection {addr} lagged by {n} frames");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                }
            }
        }
    }
}
