//! Gateway operation codes.

use std::fmt;

/// Operation code carried in the `op` field of every envelope.
///
/// The known set is closed. Anything else decodes to [`OpCode::Unknown`] so
/// control logic never mistakes an unrecognised code for a valid one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// An event was dispatched (receive).
    Dispatch,
    /// Liveness ping (send/receive).
    Heartbeat,
    /// Start a new session (send).
    Identify,
    /// Update the client's presence (send).
    PresenceUpdate,
    /// Join, leave or move between voice channels (send).
    VoiceStateUpdate,
    /// Resume a previous session (send).
    Resume,
    /// The server asks the client to reconnect and resume (receive).
    Reconnect,
    /// Request offline members of a large guild (send).
    RequestGuildMembers,
    /// The session was invalidated (receive).
    InvalidSession,
    /// First message after connecting, carries the heartbeat interval (receive).
    Hello,
    /// Acknowledgement of a heartbeat (receive).
    HeartbeatAck,
    /// A code outside the known set.
    Unknown(u64),
}

impl OpCode {
    /// Every known opcode, in wire order.
    pub const KNOWN: [Self; 11] = [
        Self::Dispatch,
        Self::Heartbeat,
        Self::Identify,
        Self::PresenceUpdate,
        Self::VoiceStateUpdate,
        Self::Resume,
        Self::Reconnect,
        Self::RequestGuildMembers,
        Self::InvalidSession,
        Self::Hello,
        Self::HeartbeatAck,
    ];

    /// Map a raw wire value onto the closed set.
    #[must_use]
    pub const fn from_code(code: u64) -> Self {
        match code {
            0 => Self::Dispatch,
            1 => Self::Heartbeat,
            2 => Self::Identify,
            3 => Self::PresenceUpdate,
            4 => Self::VoiceStateUpdate,
            6 => Self::Resume,
            7 => Self::Reconnect,
            8 => Self::RequestGuildMembers,
            9 => Self::InvalidSession,
            10 => Self::Hello,
            11 => Self::HeartbeatAck,
            other => Self::Unknown(other),
        }
    }

    /// The raw wire value.
    #[must_use]
    pub const fn code(self) -> u64 {
        match self {
            Self::Dispatch => 0,
            Self::Heartbeat => 1,
            Self::Identify => 2,
            Self::PresenceUpdate => 3,
            Self::VoiceStateUpdate => 4,
            Self::Resume => 6,
            Self::Reconnect => 7,
            Self::RequestGuildMembers => 8,
            Self::InvalidSession => 9,
            Self::Hello => 10,
            Self::HeartbeatAck => 11,
            Self::Unknown(code) => code,
        }
    }

    /// Whether this code belongs to the known set.
    #[must_use]
    pub const fn is_known(self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl From<u64> for OpCode {
    fn from(code: u64) -> Self {
        Self::from_code(code)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dispatch => write!(f, "DISPATCH"),
            Self::Heartbeat => write!(f, "HEARTBEAT"),
            Self::Identify => write!(f, "IDENTIFY"),
            Self::PresenceUpdate => write!(f, "PRESENCE_UPDATE"),
            Self::VoiceStateUpdate => write!(f, "VOICE_STATE_UPDATE"),
            Self::Resume => write!(f, "RESUME"),
            Self::Reconnect => write!(f, "RECONNECT"),
            Self::RequestGuildMembers => write!(f, "REQUEST_GUILD_MEMBERS"),
            Self::InvalidSession => write!(f, "INVALID_SESSION"),
            Self::Hello => write!(f, "HELLO"),
            Self::HeartbeatAck => write!(f, "HEARTBEAT_ACK"),
            Self::Unknown(code) => write!(f, "UNKNOWN({code})"),
        }
    }
}
