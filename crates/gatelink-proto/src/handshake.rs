//! Typed payloads exchanged while establishing or restoring a session.

use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;
use crate::opcode::OpCode;
use crate::payload::Payload;

/// Data of a HELLO frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Heartbeat cadence in milliseconds.
    pub heartbeat_interval: u64,
}

impl Hello {
    /// Extract the HELLO data from a payload.
    ///
    /// # Errors
    ///
    /// Fails if the payload is not a HELLO, or the interval is missing or zero.
    /// A session cannot be kept alive without a usable interval.
    pub fn from_payload(payload: &Payload) -> Result<Self, ProtoError> {
        if payload.op != OpCode::Hello {
            return Err(ProtoError::Validation(format!(
                "expected HELLO, got {}",
                payload.op
            )));
        }
        let interval = payload
            .d
            .get("heartbeat_interval")
            .and_then(serde_json::Value::as_u64)
            .ok_or(ProtoError::MissingField("heartbeat_interval"))?;
        if interval == 0 {
            return Err(ProtoError::Validation(
                "heartbeat_interval must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            heartbeat_interval: interval,
        })
    }
}

/// Fields of the READY dispatch the client keeps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ready {
    /// Session to resume later.
    pub session_id: String,
    /// Gateway URL to use for resuming, when the server provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_gateway_url: Option<String>,
}

/// Client properties sent with IDENTIFY.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProperties {
    /// Operating system name.
    pub os: String,
    /// Client library name.
    pub browser: String,
    /// Client library name.
    pub device: String,
}

impl ConnectionProperties {
    /// Properties for this host, naming the client twice.
    #[must_use]
    pub fn for_client(client_name: impl Into<String>) -> Self {
        let client_name = client_name.into();
        Self {
            os: std::env::consts::OS.to_string(),
            browser: client_name.clone(),
            device: client_name,
        }
    }
}

/// IDENTIFY data: starts a new session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identify {
    /// Authentication token.
    pub token: String,
    /// Client properties.
    pub properties: ConnectionProperties,
    /// Requested event intents.
    pub intents: Intents,
}

impl std::fmt::Debug for Identify {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identify")
            .field("token", &"<redacted>")
            .field("properties", &self.properties)
            .field("intents", &self.intents)
            .finish()
    }
}

/// RESUME data: restores an existing session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resume {
    /// Authentication token.
    pub token: String,
    /// Session being resumed.
    pub session_id: String,
    /// Last sequence number received.
    pub seq: Option<u64>,
}

impl std::fmt::Debug for Resume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resume")
            .field("token", &"<redacted>")
            .field("session_id", &self.session_id)
            .field("seq", &self.seq)
            .finish()
    }
}

/// Bitmask of event groups the client subscribes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Intents(pub u32);

impl Intents {
    /// No intents.
    pub const NONE: Self = Self(0);
    /// Guild create/update/delete, roles, channels.
    pub const GUILDS: Self = Self(1 << 0);
    /// Guild member add/update/remove (privileged).
    pub const GUILD_MEMBERS: Self = Self(1 << 1);
    /// Guild messages.
    pub const GUILD_MESSAGES: Self = Self(1 << 9);
    /// Guild message reactions.
    pub const GUILD_MESSAGE_REACTIONS: Self = Self(1 << 10);
    /// Direct messages.
    pub const DIRECT_MESSAGES: Self = Self(1 << 12);
    /// Message content (privileged).
    pub const MESSAGE_CONTENT: Self = Self(1 << 15);

    /// Raw bit value.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether all bits of `other` are set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Intents {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Intents {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}
