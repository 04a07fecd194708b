//! Editor-side connection lifecycle.
//!
//! ```text
//!              open             credentials           auth_resp ok
//! Disconnected ───► AwaitingCredentials ───► AwaitingAuth ───► Authorized
//!      ▲                                          │                │
//!      │              auth_resp fail              ▼                │ close
//!      │                                       Rejected            │
//!      └──────────── reconnect after fixed delay ◄─────────────────┘
//! ```
//!
//! [`Collaborator`] is the synchronous core: it owns the session, the
//! surface, the sync engine and the presence renderer, and turns inbound
//! frames and local events into surface mutations and outbound messages.
//! [`ConnectionManager`] drives it over a WebSocket with one `select!` loop.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use cowrite_core::{offset_to_position, EditingSurface, FormatCommand, Range, TextInput};
use futures_util::{Sink, SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};

use crate::presence::PresenceRenderer;
use crate::protocol::{Message, ProtocolError};
use crate::session::{ParticipantId, SessionContext};
use crate::store::SnapshotStore;
use crate::sync::{cursor_message, selection_message, CaretRestore, SyncEngine};

// ───────────────────────────────────────────────────────────────────
// Configuration
// ───────────────────────────────────────────────────────────────────

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay WebSocket URL
    pub relay_url: String,
    /// Fixed delay before reconnecting after a close
    pub reconnect_delay: Duration,
    /// Snapshot store key
    pub snapshot_key: String,
    /// Caret preservation policy for remote updates
    pub caret_restore: CaretRestore,
    /// Capacity of the event and local-event channels
    pub channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://localhost:9000".to_string(),
            reconnect_delay: Duration::from_secs(2),
            snapshot_key: "autosave".to_string(),
            caret_restore: CaretRestore::NodeIdentity,
            channel_capacity: 256,
        }
    }
}

impl ClientConfig {
    pub fn with_relay_url(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            ..Self::default()
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// States and events
// ───────────────────────────────────────────────────────────────────

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    AwaitingCredentials,
    AwaitingAuth,
    Authorized,
    Rejected,
}

/// Status line shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusText {
    Connecting,
    Connected,
    Reconnecting,
    Unauthorized,
}

impl fmt::Display for StatusText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Connecting => "Status: Connecting...",
            Self::Connected => "Status: Connected",
            Self::Reconnecting => "Status: Disconnected (Reconnecting...)",
            Self::Unauthorized => "Status: Unauthorized",
        };
        f.write_str(text)
    }
}

/// Events emitted for the application shell.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Status(StatusText),
    /// The surface became editable or read-only
    Editable(bool),
    WordCount(usize),
    /// A remote update replaced the document
    ContentReplaced { from: ParticipantId },
    /// A remote caret, selection or departure was rendered
    PresenceChanged { participant: ParticipantId },
    /// Credentials were rejected; shown as a blocking notice
    AuthFailed,
}

/// Why an inbound message was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Unauthorized,
    SelfEcho,
    Malformed,
    /// A client-only message such as `auth` arrived from the relay
    Unexpected,
}

/// Outcome of dispatching one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Applied,
    Unchanged,
    Dropped(DropReason),
    AuthAccepted,
    AuthRejected,
}

/// Input from the local editing surface.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalEvent {
    Input(TextInput),
    /// Select between two linear offsets
    Select { start: usize, end: usize },
    /// The caret moved without an edit
    CaretMoved,
    Format(FormatCommand),
    /// The editor is going away
    Unload,
}

/// Username and password for the relay handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Source of credentials, asked once per connection.
///
/// `None` abandons the attempt; the socket is closed and the reconnect
/// cycle asks again.
pub trait CredentialProvider {
    fn request(&mut self) -> impl Future<Output = Option<Credentials>> + Send;
}

/// Answers every request with the same credentials.
#[derive(Debug, Clone)]
pub struct StaticCredentials(pub Credentials);

impl CredentialProvider for StaticCredentials {
    fn request(&mut self) -> impl Future<Output = Option<Credentials>> + Send {
        let credentials = self.0.clone();
        async move { Some(credentials) }
    }
}

/// Client errors.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Credentials rejected by the relay")]
    AuthRejected,

    #[error("Connection manager stopped")]
    Stopped,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

// ───────────────────────────────────────────────────────────────────
// Collaborator
// ───────────────────────────────────────────────────────────────────

/// The editor's protocol state machine, free of any I/O.
pub struct Collaborator<S: EditingSurface, St> {
    session: SessionContext,
    surface: S,
    sync: SyncEngine<St>,
    presence: PresenceRenderer<S>,
    state: ConnectionState,
    events: Vec<ClientEvent>,
}

impl<S: EditingSurface, St: SnapshotStore> Collaborator<S, St> {
    /// Wire up a session. The surface starts read-only and is loaded
    /// from the snapshot store.
    pub fn new(session: SessionContext, mut surface: S, store: St, config: &ClientConfig) -> Self {
        surface.set_editable(false);
        let sync = SyncEngine::new(&mut surface, store, config.snapshot_key.clone())
            .with_caret_restore(config.caret_restore);
        let events = vec![ClientEvent::WordCount(sync.word_count())];
        Self {
            session,
            surface,
            sync,
            presence: PresenceRenderer::new(),
            state: ConnectionState::Disconnected,
            events,
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn sync(&self) -> &SyncEngine<St> {
        &self.sync
    }

    pub fn presence(&self) -> &PresenceRenderer<S> {
        &self.presence
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Take the events produced since the last call.
    pub fn drain_events(&mut self) -> Vec<ClientEvent> {
        std::mem::take(&mut self.events)
    }

    /// A connection attempt is starting.
    pub fn on_connecting(&mut self) {
        self.events.push(ClientEvent::Status(StatusText::Connecting));
    }

    /// The socket opened; credentials are needed next.
    pub fn on_open(&mut self) {
        self.state = ConnectionState::AwaitingCredentials;
    }

    /// Build the handshake message for the given credentials.
    pub fn auth_message(&mut self, credentials: Credentials) -> Message {
        self.state = ConnectionState::AwaitingAuth;
        Message::auth(credentials.username, credentials.password)
    }

    /// The socket closed for any reason.
    pub fn on_close(&mut self) {
        self.session.set_authorized(false);
        self.surface.set_editable(false);
        if self.state != ConnectionState::Rejected {
            self.state = ConnectionState::Disconnected;
            self.events.push(ClientEvent::Status(StatusText::Reconnecting));
        }
        self.events.push(ClientEvent::Editable(false));
    }

    /// Decode and dispatch one text frame.
    pub fn handle_inbound(&mut self, frame: &str) -> Dispatch {
        match Message::decode(frame) {
            Ok(msg) => self.handle_message(msg),
            Err(e) => {
                log::warn!("Dropping inbound frame: {e}");
                Dispatch::Dropped(DropReason::Malformed)
            }
        }
    }

    /// Dispatch one inbound message by type.
    pub fn handle_message(&mut self, msg: Message) -> Dispatch {
        match msg {
            Message::AuthResp { .. } => self.handle_auth_resp(msg.is_accepted()),
            Message::Auth { .. } => Dispatch::Dropped(DropReason::Unexpected),
            msg => {
                if !self.session.is_authorized() {
                    log::trace!("Dropping {} while unauthorized", msg.kind());
                    return Dispatch::Dropped(DropReason::Unauthorized);
                }
                if msg.sender().is_some_and(|id| self.session.is_self(id)) {
                    return Dispatch::Dropped(DropReason::SelfEcho);
                }
                self.apply_remote(msg)
            }
        }
    }

    fn handle_auth_resp(&mut self, accepted: bool) -> Dispatch {
        self.session.set_authorized(accepted);
        self.surface.set_editable(accepted);
        if accepted {
            log::info!("Authorized as {}", self.session.participant_id());
            self.state = ConnectionState::Authorized;
            self.events.push(ClientEvent::Status(StatusText::Connected));
            self.events.push(ClientEvent::Editable(true));
            Dispatch::AuthAccepted
        } else {
            log::warn!("Relay rejected credentials");
            self.state = ConnectionState::Rejected;
            self.events.push(ClientEvent::Status(StatusText::Unauthorized));
            self.events.push(ClientEvent::Editable(false));
            self.events.push(ClientEvent::AuthFailed);
            Dispatch::AuthRejected
        }
    }

    fn apply_remote(&mut self, msg: Message) -> Dispatch {
        match msg {
            Message::Update { user_id, content } => {
                if !self.sync.apply_remote_update(&mut self.surface, &content) {
                    return Dispatch::Unchanged;
                }
                log::debug!("Applied update from {user_id} ({} bytes)", content.len());
                self.events.push(ClientEvent::ContentReplaced { from: user_id });
                self.events.push(ClientEvent::WordCount(self.sync.word_count()));
                Dispatch::Applied
            }
            Message::Cursor {
                user_id,
                color,
                cursor,
            } => {
                self.presence
                    .render_cursor(&mut self.surface, &user_id, cursor, &color);
                self.events.push(ClientEvent::PresenceChanged {
                    participant: user_id,
                });
                Dispatch::Applied
            }
            Message::Selection {
                user_id,
                color,
                start_offset,
                end_offset,
            } => {
                self.presence.render_selection(
                    &mut self.surface,
                    &user_id,
                    start_offset,
                    end_offset,
                    &color,
                );
                self.events.push(ClientEvent::PresenceChanged {
                    participant: user_id,
                });
                Dispatch::Applied
            }
            Message::Disconnect { user_id } => {
                if !self.presence.remove_participant(&mut self.surface, &user_id) {
                    return Dispatch::Unchanged;
                }
                self.events.push(ClientEvent::PresenceChanged {
                    participant: user_id,
                });
                Dispatch::Applied
            }
            Message::Auth { .. } | Message::AuthResp { .. } => {
                Dispatch::Dropped(DropReason::Unexpected)
            }
        }
    }

    /// Apply a local event and return the messages to send.
    pub fn handle_local(&mut self, event: LocalEvent) -> Vec<Message> {
        match event {
            LocalEvent::Input(input) => {
                match self.surface.input(&input) {
                    Ok(true) => {}
                    Ok(false) => return Vec::new(),
                    Err(e) => {
                        log::debug!("Local input refused: {e}");
                        return Vec::new();
                    }
                }
                let out = self.sync.apply_local_edit(&self.session, &self.surface);
                if !out.is_empty() {
                    self.events.push(ClientEvent::WordCount(self.sync.word_count()));
                }
                out
            }
            LocalEvent::Select { start, end } => {
                let tree = self.surface.tree();
                let range = offset_to_position(tree, start)
                    .zip(offset_to_position(tree, end))
                    .map(|(s, e)| Range::new(s, e));
                self.surface.set_selection(range);
                self.presence_messages()
            }
            LocalEvent::CaretMoved => self.presence_messages(),
            LocalEvent::Format(command) => {
                match self
                    .sync
                    .apply_format_command(&self.session, &mut self.surface, &command)
                {
                    Ok(out) => {
                        if !out.is_empty() {
                            self.events.push(ClientEvent::WordCount(self.sync.word_count()));
                        }
                        out
                    }
                    Err(e) => {
                        log::debug!("Format command {} failed: {e}", command.name());
                        Vec::new()
                    }
                }
            }
            LocalEvent::Unload => {
                if !self.session.is_authorized() {
                    return Vec::new();
                }
                vec![Message::Disconnect {
                    user_id: self.session.participant_id().clone(),
                }]
            }
        }
    }

    fn presence_messages(&self) -> Vec<Message> {
        if !self.session.is_authorized() {
            return Vec::new();
        }
        cursor_message(&self.session, &self.surface)
            .into_iter()
            .chain(selection_message(&self.session, &self.surface))
            .collect()
    }
}

// ───────────────────────────────────────────────────────────────────
// Connection manager
// ───────────────────────────────────────────────────────────────────

/// Cloneable sender of local events into a running manager.
#[derive(Debug, Clone)]
pub struct EditorHandle {
    tx: mpsc::Sender<LocalEvent>,
}

impl EditorHandle {
    pub async fn send(&self, event: LocalEvent) -> Result<(), ClientError> {
        self.tx.send(event).await.map_err(|_| ClientError::Stopped)
    }

    pub async fn unload(&self) -> Result<(), ClientError> {
        self.send(LocalEvent::Unload).await
    }
}

/// How one connection ended.
enum Session {
    Closed,
    Unloaded,
}

/// Owns the socket and drives a [`Collaborator`] through connect,
/// handshake, dispatch and reconnect.
pub struct ConnectionManager<S: EditingSurface, St, C> {
    config: ClientConfig,
    collaborator: Collaborator<S, St>,
    credentials: C,
    local_tx: mpsc::Sender<LocalEvent>,
    local_rx: mpsc::Receiver<LocalEvent>,
    event_tx: mpsc::Sender<ClientEvent>,
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
}

impl<S, St, C> ConnectionManager<S, St, C>
where
    S: EditingSurface,
    St: SnapshotStore,
    C: CredentialProvider,
{
    pub fn new(config: ClientConfig, collaborator: Collaborator<S, St>, credentials: C) -> Self {
        let capacity = config.channel_capacity.max(1);
        let (local_tx, local_rx) = mpsc::channel(capacity);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        Self {
            config,
            collaborator,
            credentials,
            local_tx,
            local_rx,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    pub fn handle(&self) -> EditorHandle {
        EditorHandle {
            tx: self.local_tx.clone(),
        }
    }

    pub fn collaborator(&self) -> &Collaborator<S, St> {
        &self.collaborator
    }

    /// Connect and keep reconnecting until the editor unloads or the
    /// relay rejects the credentials. Returns the collaborator on unload.
    pub async fn run(mut self) -> Result<Collaborator<S, St>, ClientError> {
        loop {
            self.collaborator.on_connecting();
            forward_events(&mut self.collaborator, &self.event_tx);

            let url = self.config.relay_url.clone();
            match tokio_tungstenite::connect_async(url.as_str()).await {
                Ok((ws_stream, _)) => {
                    log::info!("Connected to relay {url}");
                    let outcome = self.drive(ws_stream).await;
                    if matches!(outcome, Session::Unloaded) {
                        return Ok(self.collaborator);
                    }
                }
                Err(e) => log::warn!("Failed to connect to {url}: {e}"),
            }

            let rejected = self.collaborator.state() == ConnectionState::Rejected;
            self.collaborator.on_close();
            forward_events(&mut self.collaborator, &self.event_tx);
            if rejected {
                return Err(ClientError::AuthRejected);
            }

            log::info!("Reconnecting in {:?}", self.config.reconnect_delay);
            if self.wait_reconnect().await {
                return Ok(self.collaborator);
            }
        }
    }

    /// Sleep out the reconnect delay. Local events still reach the
    /// surface; anything they would send is dropped. Returns `true` on
    /// unload.
    async fn wait_reconnect(&mut self) -> bool {
        let deadline = Instant::now() + self.config.reconnect_delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return false,
                event = self.local_rx.recv() => match event {
                    Some(LocalEvent::Unload) | None => return true,
                    Some(event) => {
                        let dropped = self.collaborator.handle_local(event);
                        if !dropped.is_empty() {
                            log::debug!(
                                "Dropped {} outbound messages while offline",
                                dropped.len()
                            );
                        }
                        forward_events(&mut self.collaborator, &self.event_tx);
                    }
                }
            }
        }
    }

    async fn drive<T>(&mut self, ws_stream: tokio_tungstenite::WebSocketStream<T>) -> Session
    where
        T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let (mut writer, mut reader) = ws_stream.split();
        self.collaborator.on_open();

        // Credentials are awaited alongside the socket so a close or an
        // unload during the prompt is still noticed.
        let credentials = {
            let request = self.credentials.request();
            tokio::pin!(request);
            loop {
                tokio::select! {
                    credentials = &mut request => break credentials,
                    frame = reader.next() => match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            self.collaborator.handle_inbound(text.as_str());
                            forward_events(&mut self.collaborator, &self.event_tx);
                        }
                        Some(Ok(WsMessage::Close(_))) | None => return Session::Closed,
                        Some(Err(e)) => {
                            log::warn!("WebSocket error: {e}");
                            return Session::Closed;
                        }
                        _ => {}
                    },
                    event = self.local_rx.recv() => match event {
                        Some(LocalEvent::Unload) | None => {
                            let _ = writer.close().await;
                            return Session::Unloaded;
                        }
                        Some(event) => {
                            self.collaborator.handle_local(event);
                            forward_events(&mut self.collaborator, &self.event_tx);
                        }
                    },
                }
            }
        };

        let Some(credentials) = credentials else {
            log::warn!("No credentials supplied, closing connection");
            let _ = writer.close().await;
            return Session::Closed;
        };
        let auth = self.collaborator.auth_message(credentials);
        if let Err(e) = send_message(&mut writer, &auth).await {
            log::warn!("Failed to send auth: {e}");
            return Session::Closed;
        }

        loop {
            tokio::select! {
                frame = reader.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        let dispatch = self.collaborator.handle_inbound(text.as_str());
                        log::trace!("Inbound dispatch: {dispatch:?}");
                        forward_events(&mut self.collaborator, &self.event_tx);
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        log::info!("Relay closed the connection");
                        return Session::Closed;
                    }
                    Some(Err(e)) => {
                        log::warn!("WebSocket error: {e}");
                        return Session::Closed;
                    }
                    _ => {}
                },
                event = self.local_rx.recv() => {
                    let unload = matches!(event, Some(LocalEvent::Unload) | None);
                    let outbound = self
                        .collaborator
                        .handle_local(event.unwrap_or(LocalEvent::Unload));
                    forward_events(&mut self.collaborator, &self.event_tx);
                    for msg in &outbound {
                        if let Err(e) = send_message(&mut writer, msg).await {
                            log::warn!("Failed to send {}: {e}", msg.kind());
                            return Session::Closed;
                        }
                    }
                    if unload {
                        let _ = writer.close().await;
                        return Session::Unloaded;
                    }
                }
            }
        }
    }
}

async fn send_message<W>(writer: &mut W, msg: &Message) -> Result<(), ClientError>
where
    W: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    let frame = msg.encode()?;
    writer.send(WsMessage::Text(frame.into())).await?;
    Ok(())
}

fn forward_events<S: EditingSurface, St: SnapshotStore>(
    collaborator: &mut Collaborator<S, St>,
    tx: &mpsc::Sender<ClientEvent>,
) {
    for event in collaborator.drain_events() {
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                log::warn!("Event channel full, dropping {event:?}");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }
}
