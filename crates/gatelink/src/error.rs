//! Error types for gatelink.

use thiserror::Error;

/// Errors surfaced by the client.
///
/// Connection-level trouble after the handshake does not show up here; it is
/// routed through the reconnect policy instead.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Bootstrap request could not be sent or its body could not be read.
    #[error("bootstrap request failed: {0}")]
    BootstrapTransport(#[from] reqwest::Error),

    /// Bootstrap endpoint answered with a non-success status.
    #[error("bootstrap returned HTTP {status}: {body}")]
    BootstrapStatus {
        /// HTTP status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },

    /// Bootstrap body was not a valid endpoint description.
    #[error("bootstrap response malformed: {0}")]
    BootstrapBody(String),

    /// Gateway transport failed.
    #[error("gateway connection failed: {0}")]
    GatewayConnection(String),

    /// Handshake contract was violated.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// `start()` called while the client is already running.
    #[error("client is already running")]
    AlreadyRunning,

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] gatelink_proto::ProtoError),
}
