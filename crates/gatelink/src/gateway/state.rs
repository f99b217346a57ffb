//! Connection lifecycle states.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle phase of the gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started.
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Transport open, waiting for HELLO.
    AwaitingHello,
    /// IDENTIFY or RESUME being sent.
    Authenticating,
    /// Receiving dispatches.
    Active,
    /// Tearing down before the next attempt.
    Reconnecting,
    /// Terminated; `start()` may be called again.
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingHello => "awaiting_hello",
            Self::Authenticating => "authenticating",
            Self::Active => "active",
            Self::Reconnecting => "reconnecting",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Atomic wrapper so observers can read the state without locking.
#[derive(Debug)]
pub struct AtomicConnectionState(AtomicU8);

impl AtomicConnectionState {
    /// Create a new atomic state.
    #[must_use]
    pub const fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    /// Load the current state.
    #[must_use]
    pub fn load(&self) -> ConnectionState {
        match self.0.load(Ordering::SeqCst) {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::AwaitingHello,
            3 => ConnectionState::Authenticating,
            4 => ConnectionState::Active,
            5 => ConnectionState::Reconnecting,
            _ => ConnectionState::Stopped,
        }
    }

    /// Store a new state.
    pub fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_discriminants() {
        assert_eq!(ConnectionState::Disconnected as u8, 0);
        assert_eq!(ConnectionState::Connecting as u8, 1);
        assert_eq!(ConnectionState::AwaitingHello as u8, 2);
        assert_eq!(ConnectionState::Authenticating as u8, 3);
        assert_eq!(ConnectionState::Active as u8, 4);
        assert_eq!(ConnectionState::Reconnecting as u8, 5);
        assert_eq!(ConnectionState::Stopped as u8, 6);
    }

    #[test]
    fn test_atomic_connection_state() {
        let state = AtomicConnectionState::new(ConnectionState::Disconnected);
        for next in [
            ConnectionState::Connecting,
            ConnectionState::AwaitingHello,
            ConnectionState::Authenticating,
            ConnectionState::Active,
            ConnectionState::Reconnecting,
            ConnectionState::Stopped,
        ] {
            state.store(next);
            assert_eq!(state.load(), next);
        }
    }
}
