//! Events delivered to the consumer.

use std::fmt;
use std::time::Duration;

use serde_json::Value;

use super::policy::ReconnectAction;

/// A server-pushed event.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchEvent {
    /// Event name, e.g. `READY` or `MESSAGE_CREATE`.
    pub name: String,
    /// Sequence number assigned by the server.
    pub sequence: Option<u64>,
    /// Event data.
    pub data: Value,
}

/// How the client stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// User stop or normal closure.
    Graceful,
    /// The server closed with a code reconnecting cannot fix, or the
    /// reconnect budget ran out (`code` is `None` then).
    Abnormal {
        /// Close code, when one was sent.
        code: Option<u16>,
        /// Description of the close.
        reason: String,
    },
    /// Startup or handshake contract could not be met.
    Fatal(String),
}

impl Termination {
    /// Process exit status for this termination.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Graceful => 0,
            Self::Abnormal { .. } => 1,
            Self::Fatal(_) => 50,
        }
    }

    /// Whether this was a clean stop.
    #[must_use]
    pub const fn is_graceful(&self) -> bool {
        matches!(self, Self::Graceful)
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graceful => write!(f, "stopped gracefully"),
            Self::Abnormal {
                code: Some(code),
                reason,
            } => write!(f, "stopped by close {code}: {reason}"),
            Self::Abnormal { code: None, reason } => write!(f, "stopped: {reason}"),
            Self::Fatal(reason) => write!(f, "fatal: {reason}"),
        }
    }
}

/// Events emitted by the gateway client.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// Transport opened.
    Connected,
    /// A dispatch arrived.
    Dispatch(DispatchEvent),
    /// Connection lost.
    Disconnected {
        /// Reason for disconnection.
        reason: String,
    },
    /// Next attempt scheduled.
    Reconnecting {
        /// Consecutive attempt number.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
        /// Whether the attempt will resume or identify.
        action: ReconnectAction,
    },
    /// The client stopped.
    Stopped(Termination),
}
