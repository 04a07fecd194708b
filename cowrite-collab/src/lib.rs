//! # cowrite-collab — Real-time collaboration layer for cowrite
//!
//! Keeps one rich-text document in sync between editors through a
//! WebSocket relay, with remote carets and selections drawn live.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────┐     WebSocket      ┌─────────────┐
//! │ ConnectionManager │ ◄────────────────► │    Relay    │
//! │   (per editor)    │     JSON frames    │  (central)  │
//! └─────────┬─────────┘                    └──────┬──────┘
//!           │                                     │
//!           ▼                                     ▼
//! ┌───────────────────┐                   ┌───────────────┐
//! │   Collaborator    │                   │   broadcast   │
//! │ SyncEngine        │                   │   (fan-out)   │
//! │ PresenceRenderer  │                   └───────────────┘
//! │ EditingSurface    │
//! └───────────────────┘
//! ```
//!
//! Replication is last-applied-wins: every `update` carries the whole
//! document and replaces whatever the receiver had.
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire messages
//! - [`session`] — participant identity and authorization flag
//! - [`sync`] — snapshot ownership and caret-preserving remote updates
//! - [`presence`] — remote caret markers and selection highlights
//! - [`store`] — snapshot persistence
//! - [`client`] — handshake, dispatch and reconnect
//! - [`relay`] — credential-checking fan-out server

pub mod client;
pub mod presence;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod store;
pub mod sync;

// Re-exports for convenience
pub use client::{
    ClientConfig, ClientError, ClientEvent, Collaborator, ConnectionManager, ConnectionState,
    CredentialProvider, Credentials, Dispatch, DropReason, EditorHandle, LocalEvent,
    StaticCredentials, StatusText,
};
pub use presence::{PresenceRenderer, RemoteParticipant};
pub use protocol::{Message, ProtocolError};
pub use relay::{Relay, RelayConfig, RelayError, RelayStats};
pub use session::{Color, ParticipantId, SessionContext};
pub use store::{FileStore, MemoryStore, SnapshotStore, StoreError};
pub use sync::{count_words, CaretRestore, SyncEngine};
