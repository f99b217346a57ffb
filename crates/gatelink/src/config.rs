//! Client configuration.

use std::path::Path;
use std::time::Duration;

use gatelink_proto::{ConnectionProperties, Identify, Intents, Resume};

use crate::error::ClientError;
use crate::gateway::policy::ReconnectPolicy;
use crate::gateway::reconnect::ReconnectConfig;
use crate::gateway::session::Session;

/// Protocol version requested in the gateway URL.
pub const DEFAULT_API_VERSION: u8 = 10;

/// Default capacity of the consumer event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Default upper bound of the pause after an invalid session.
pub const DEFAULT_INVALID_SESSION_DELAY: Duration = Duration::from_secs(5);

/// Default client name reported in IDENTIFY properties.
pub const DEFAULT_CLIENT_NAME: &str = "gatelink";

/// Everything the gateway client needs besides the endpoint.
#[derive(Clone)]
pub struct ClientConfig {
    /// Authentication token. Never logged.
    pub token: String,
    /// Event intents requested on IDENTIFY.
    pub intents: Intents,
    /// Name reported as browser and device.
    pub client_name: String,
    /// Protocol version appended to the gateway URL.
    pub api_version: u8,
    /// Capacity of the consumer event channel.
    pub event_capacity: usize,
    /// Backoff between attempts.
    pub reconnect: ReconnectConfig,
    /// Failure classification rules.
    pub policy: ReconnectPolicy,
    /// Upper bound of the random pause after an invalid session.
    pub invalid_session_delay: Duration,
    /// Delay the first heartbeat by a random fraction of the interval.
    pub heartbeat_jitter: bool,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("token", &"<redacted>")
            .field("intents", &self.intents)
            .field("client_name", &self.client_name)
            .field("api_version", &self.api_version)
            .field("event_capacity", &self.event_capacity)
            .field("reconnect", &self.reconnect)
            .field("policy", &self.policy)
            .field("invalid_session_delay", &self.invalid_session_delay)
            .field("heartbeat_jitter", &self.heartbeat_jitter)
            .finish()
    }
}

impl ClientConfig {
    /// Create a configuration with defaults for everything but the token and
    /// intents.
    #[must_use]
    pub fn new(token: impl Into<String>, intents: Intents) -> Self {
        Self {
            token: token.into(),
            intents,
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            api_version: DEFAULT_API_VERSION,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            reconnect: ReconnectConfig::default(),
            policy: ReconnectPolicy::default(),
            invalid_session_delay: DEFAULT_INVALID_SESSION_DELAY,
            heartbeat_jitter: true,
        }
    }

    /// Set the client name.
    #[must_use]
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    /// Set the protocol version.
    #[must_use]
    pub const fn with_api_version(mut self, version: u8) -> Self {
        self.api_version = version;
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub const fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the backoff configuration.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the failure classification rules.
    #[must_use]
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the invalid-session pause bound.
    #[must_use]
    pub const fn with_invalid_session_delay(mut self, delay: Duration) -> Self {
        self.invalid_session_delay = delay;
        self
    }

    /// Enable or disable first-heartbeat jitter.
    #[must_use]
    pub const fn with_heartbeat_jitter(mut self, enabled: bool) -> Self {
        self.heartbeat_jitter = enabled;
        self
    }

    /// Check the configuration before starting.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when a field is unusable.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.token.trim().is_empty() {
            return Err(ClientError::Config("token must not be empty".into()));
        }
        if self.event_capacity == 0 {
            return Err(ClientError::Config("event capacity must be greater than 0".into()));
        }
        if self.reconnect.initial_delay > self.reconnect.max_delay {
            return Err(ClientError::Config(
                "initial reconnect delay exceeds max delay".into(),
            ));
        }
        if !self.reconnect.backoff_multiplier.is_finite() || self.reconnect.backoff_multiplier < 1.0
        {
            return Err(ClientError::Config(
                "backoff multiplier must be a finite value of at least 1".into(),
            ));
        }
        Ok(())
    }

    /// IDENTIFY data for a fresh session.
    #[must_use]
    pub fn identify(&self) -> Identify {
        Identify {
            token: self.token.clone(),
            properties: ConnectionProperties::for_client(&self.client_name),
            intents: self.intents,
        }
    }

    /// RESUME data for `session`, if it has an id.
    #[must_use]
    pub fn resume(&self, session: &Session) -> Option<Resume> {
        session.session_id().map(|id| Resume {
            token: self.token.clone(),
            session_id: id.to_string(),
            seq: session.sequence(),
        })
    }
}

/// Read a token from `path`, trimming surrounding whitespace.
///
/// # Errors
///
/// Fails if the file cannot be read or holds only whitespace.
pub fn load_token(path: impl AsRef<Path>) -> Result<String, ClientError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)?;
    let token = raw.trim();
    if token.is_empty() {
        return Err(ClientError::Config(format!(
            "token file {} is empty",
            path.display()
        )));
    }
    Ok(token.to_string())
}
