//! Bootstrap response: where to connect and how many sessions may start.

use serde::{Deserialize, Serialize};

/// Session-start quota returned by the bootstrap call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartLimit {
    /// Total identifies allowed per reset window.
    pub total: u32,
    /// Identifies left in the current window.
    pub remaining: u32,
    /// Milliseconds until the window resets.
    pub reset_after: u64,
    /// Identifies allowed per 5 seconds.
    pub max_concurrency: u32,
}

impl SessionStartLimit {
    /// Whether the quota for the current window is spent.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

/// Resolved gateway endpoint. Fetched once per process and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayEndpoint {
    /// WebSocket URL without query parameters.
    pub url: String,
    /// Recommended shard count.
    pub shards: u32,
    /// Session-start quota.
    pub session_start_limit: SessionStartLimit,
}

impl GatewayEndpoint {
    /// An endpoint with an unlimited-looking quota, for connecting to a known
    /// URL without a bootstrap call.
    #[must_use]
    pub fn direct(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            shards: 1,
            session_start_limit: SessionStartLimit {
                total: 1000,
                remaining: 1000,
                reset_after: 0,
                max_concurrency: 1,
            },
        }
    }
}
