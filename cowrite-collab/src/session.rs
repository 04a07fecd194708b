//! Local participant identity.
//!
//! A [`SessionContext`] is created once per process: a random
//! participant id, a display colour and the `authorized` flag that gates
//! every outbound write and every inbound non-handshake message.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of generated participant ids.
const ID_LEN: usize = 9;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Opaque participant identifier, unique per session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Generate a short random id (9 base-36 characters).
    pub fn random() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        let mut n = id.as_u128();
        let mut out = String::with_capacity(ID_LEN);
        for _ in 0..ID_LEN {
            out.push(BASE36[(n % 36) as usize] as char);
            n /= 36;
        }
        Self(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A `#rrggbb` display colour.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Color(String);

impl Color {
    /// Derive a vivid colour from a UUID.
    ///
    /// The hue comes from the UUID hash; saturation and lightness are
    /// fixed so every participant is readable on a light background.
    pub fn from_uuid(id: Uuid) -> Self {
        let hue = (id.as_u128() % 360) as f32 / 360.0;
        let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.5);
        let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        Self(format!("#{:02x}{:02x}{:02x}", channel(r), channel(g), channel(b)))
    }

    pub fn random() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Same colour at reduced opacity (`#rrggbb55`), used for selection
    /// highlights.
    pub fn tinted(&self) -> String {
        tint(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Color {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Append the highlight alpha to a colour string.
pub fn tint(color: &str) -> String {
    format!("{color}55")
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l);
    }

    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;

    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    match t {
        t if t < 1.0 / 6.0 => p + (q - p) * 6.0 * t,
        t if t < 1.0 / 2.0 => q,
        t if t < 2.0 / 3.0 => p + (q - p) * (2.0 / 3.0 - t) * 6.0,
        _ => p,
    }
}

/// Identity and authorization state of the local participant.
#[derive(Debug, Clone)]
pub struct SessionContext {
    participant_id: ParticipantId,
    color: Color,
    authorized: bool,
}

impl SessionContext {
    /// Fresh identity with a random id and colour, unauthorized.
    pub fn new() -> Self {
        Self::with_identity(ParticipantId::random(), Color::random())
    }

    pub fn with_identity(participant_id: ParticipantId, color: Color) -> Self {
        Self {
            participant_id,
            color,
            authorized: false,
        }
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    pub fn color(&self) -> &Color {
        &self.color
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized
    }

    pub fn set_authorized(&mut self, authorized: bool) {
        self.authorized = authorized;
    }

    /// Whether a message id names this participant.
    pub fn is_self(&self, id: &ParticipantId) -> bool {
        *id == self.participant_id
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}
