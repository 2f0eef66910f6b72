use std::time::Duration;

use clustersh_common::PEERS_COMMAND;
use serde::Deserialize;

use crate::node::BackoffConfig;

/// Session tuning, fixed at construction.
///
/// # Example
///
/// ```
/// use clustersh_session::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig {
///     timeout_ms: 500,
///     refresh_interval_ms: None,
///     ..SessionConfig::default()
/// };
/// assert_eq!(config.timeout(), Duration::from_millis(500));
/// assert!(config.refresh_interval().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Per-node bound for one broadcast call, connection setup included
    pub timeout_ms: u64,
    /// Per-node bound for a membership query during discovery
    pub discovery_timeout_ms: u64,
    /// Only contact the seeds; never crawl to learned peers
    pub seed_only: bool,
    /// Rediscover before a command once this much time has passed since the
    /// last discovery. `None` disables automatic rediscovery.
    pub refresh_interval_ms: Option<u64>,
    pub backoff: BackoffConfig,
    /// Request command answered with a membership report
    pub membership_command: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            discovery_timeout_ms: 5000,
            seed_only: false,
            refresh_interval_ms: Some(3000),
            backoff: BackoffConfig::default(),
            membership_command: PEERS_COMMAND.to_string(),
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval_ms.map(Duration::from_millis)
    }
}
