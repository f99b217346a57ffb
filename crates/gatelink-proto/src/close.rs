//! Gateway close event codes.

use std::fmt;

/// Close code attached to a transport close frame.
///
/// Only the normal closure code and the gateway's own 4xxx range are named.
/// Classification into resume / fresh identify / stop lives with the client's
/// reconnect policy, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000: normal closure.
    Normal,
    /// 4000: unknown error, try reconnecting.
    UnknownError,
    /// 4001: an invalid opcode or payload for an opcode was sent.
    UnknownOpcode,
    /// 4002: an undecodable payload was sent.
    DecodeError,
    /// 4003: a payload was sent before identifying.
    NotAuthenticated,
    /// 4004: the token sent with identify is incorrect.
    AuthenticationFailed,
    /// 4005: more than one identify was sent.
    AlreadyAuthenticated,
    /// 4007: the sequence sent when resuming was invalid.
    InvalidSeq,
    /// 4008: payloads were sent too quickly.
    RateLimited,
    /// 4009: the session timed out.
    SessionTimedOut,
    /// 4010: an invalid shard was sent when identifying.
    InvalidShard,
    /// 4011: the session would handle too many guilds without sharding.
    ShardingRequired,
    /// 4012: an invalid gateway version was requested.
    InvalidApiVersion,
    /// 4013: an invalid intent was sent.
    InvalidIntent,
    /// 4014: a disallowed intent was sent.
    DisallowedIntent,
    /// Any other code.
    Other(u16),
}

impl CloseCode {
    /// Map a raw close code.
    #[must_use]
    pub const fn from_code(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            4000 => Self::UnknownError,
            4001 => Self::UnknownOpcode,
            4002 => Self::DecodeError,
            4003 => Self::NotAuthenticated,
            4004 => Self::AuthenticationFailed,
            4005 => Self::AlreadyAuthenticated,
            4007 => Self::InvalidSeq,
            4008 => Self::RateLimited,
            4009 => Self::SessionTimedOut,
            4010 => Self::InvalidShard,
            4011 => Self::ShardingRequired,
            4012 => Self::InvalidApiVersion,
            4013 => Self::InvalidIntent,
            4014 => Self::DisallowedIntent,
            other => Self::Other(other),
        }
    }

    /// The raw close code.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::UnknownError => 4000,
            Self::UnknownOpcode => 4001,
            Self::DecodeError => 4002,
            Self::NotAuthenticated => 4003,
            Self::AuthenticationFailed => 4004,
            Self::AlreadyAuthenticated => 4005,
            Self::InvalidSeq => 4007,
            Self::RateLimited => 4008,
            Self::SessionTimedOut => 4009,
            Self::InvalidShard => 4010,
            Self::ShardingRequired => 4011,
            Self::InvalidApiVersion => 4012,
            Self::InvalidIntent => 4013,
            Self::DisallowedIntent => 4014,
            Self::Other(code) => code,
        }
    }

    /// Whether this is the normal closure code.
    #[must_use]
    pub const fn is_normal(self) -> bool {
        matches!(self, Self::Normal)
    }

    /// Short human-readable description.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Normal => "normal closure",
            Self::UnknownError => "unknown error",
            Self::UnknownOpcode => "unknown opcode",
            Self::DecodeError => "decode error",
            Self::NotAuthenticated => "not authenticated",
            Self::AuthenticationFailed => "authentication failed",
            Self::AlreadyAuthenticated => "already authenticated",
            Self::InvalidSeq => "invalid sequence",
            Self::RateLimited => "rate limited",
            Self::SessionTimedOut => "session timed out",
            Self::InvalidShard => "invalid shard",
            Self::ShardingRequired => "sharding required",
            Self::InvalidApiVersion => "invalid API version",
            Self::InvalidIntent => "invalid intent",
            Self::DisallowedIntent => "disallowed intent",
            Self::Other(_) => "unrecognised close code",
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        Self::from_code(code)
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.description())
    }
}
