//! JSON wire protocol between editors and the relay.
//!
//! Every frame is a text WebSocket message holding one JSON object,
//! internally tagged on `type`:
//!
//! ```text
//! {"type":"auth","username":"alice","password":"1234"}          client → relay
//! {"type":"auth_resp","status":"ok"}                            relay → client
//! {"type":"update","userId":"k3j9x0a1b","content":"<p>hi</p>"}  both
//! {"type":"cursor","userId":…,"color":"#3fa7d6","cursor":{"x":8,"y":0}}
//! {"type":"selection","userId":…,"color":…,"startOffset":2,"endOffset":5}
//! {"type":"disconnect","userId":…}
//! ```
//!
//! Delivery is fire-and-forget: no sequence numbers, no acknowledgements.

use cowrite_core::CaretPosition;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::ParticipantId;

/// `auth_resp` status meaning the credentials were accepted.
pub const AUTH_OK: &str = "ok";

/// `auth_resp` status sent on rejection.
pub const AUTH_FAIL: &str = "fail";

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Credential handshake, sent once per connection.
    Auth { username: String, password: String },

    /// Relay verdict on [`Message::Auth`].
    AuthResp { status: String },

    /// Full document replacement.
    Update {
        #[serde(rename = "userId")]
        user_id: ParticipantId,
        content: String,
    },

    /// Caret coordinates of the sender.
    Cursor {
        #[serde(rename = "userId")]
        user_id: ParticipantId,
        color: String,
        cursor: CaretPosition,
    },

    /// Linear selection of the sender. Order of the offsets is not enforced.
    Selection {
        #[serde(rename = "userId")]
        user_id: ParticipantId,
        color: String,
        #[serde(rename = "startOffset")]
        start_offset: usize,
        #[serde(rename = "endOffset")]
        end_offset: usize,
    },

    /// The sender left the session.
    Disconnect {
        #[serde(rename = "userId")]
        user_id: ParticipantId,
    },
}

impl Message {
    pub fn auth(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Auth {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn auth_ok() -> Self {
        Self::AuthResp {
            status: AUTH_OK.to_string(),
        }
    }

    pub fn auth_failed() -> Self {
        Self::AuthResp {
            status: AUTH_FAIL.to_string(),
        }
    }

    /// Whether an `auth_resp` accepts the connection. Any status other
    /// than `ok` is a rejection.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::AuthResp { status } if status == AUTH_OK)
    }

    /// Participant that originated the message, if it carries one.
    pub fn sender(&self) -> Option<&ParticipantId> {
        match self {
            Self::Update { user_id, .. }
            | Self::Cursor { user_id, .. }
            | Self::Selection { user_id, .. }
            | Self::Disconnect { user_id } => Some(user_id),
            Self::Auth { .. } | Self::AuthResp { .. } => None,
        }
    }

    /// Whether the message belongs to the credential handshake.
    pub fn is_handshake(&self) -> bool {
        matches!(self, Self::Auth { .. } | Self::AuthResp { .. })
    }

    /// Protocol `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::AuthResp { .. } => "auth_resp",
            Self::Update { .. } => "update",
            Self::Cursor { .. } => "cursor",
            Self::Selection { .. } => "selection",
            Self::Disconnect { .. } => "disconnect",
        }
    }

    /// Serialize to a JSON frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parse a JSON frame.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Failed to encode message: {0}")]
    Encode(String),
}
