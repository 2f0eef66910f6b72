use std::fmt;
use std::time::Duration;

use clustersh_client::NodeEndpoint;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Liveness of a node as of the last discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Liveness {
    /// Answered the last membership query
    Up,
    /// Reported by its peers as out of the cluster, or no longer reported
    Down,
    /// Could not be reached; retried with backoff on later discoveries
    Unreachable,
    /// Rejected the session's credentials; excluded until they are refreshed
    AuthFailed,
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Liveness::Up => "up",
            Liveness::Down => "down",
            Liveness::Unreachable => "unreachable",
            Liveness::AuthFailed => "auth-failed",
        };
        f.write_str(s)
    }
}

/// Exponential backoff for retrying unreachable nodes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay after the first failure (in milliseconds)
    pub base_ms: u64,
    /// Maximum delay cap (in milliseconds)
    pub max_ms: u64,
    /// Exponential backoff multiplier
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 1000,
            max_ms: 60_000,
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Calculate delay with exponential backoff based on consecutive failures
    pub fn calculate_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let multiplier = self.multiplier.powi(consecutive_failures as i32 - 1);
        let backoff_ms = (self.base_ms as f64 * multiplier) as u64;
        Duration::from_millis(backoff_ms.min(self.max_ms))
    }
}

/// What the session believes about one node.
#[derive(Debug, Clone)]
pub struct NodeState {
    pub endpoint: NodeEndpoint,
    pub liveness: Liveness,
    pub node_id: Option<String>,
    pub consecutive_failures: u32,
    /// Earliest time discovery contacts this node again
    pub next_retry_at: Option<Instant>,
    pub last_error: Option<String>,
}

impl NodeState {
    /// A node not contacted yet. It counts as unreachable until it answers.
    pub fn new(endpoint: NodeEndpoint) -> Self {
        Self {
            endpoint,
            liveness: Liveness::Unreachable,
            node_id: None,
            consecutive_failures: 0,
            next_retry_at: None,
            last_error: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.endpoint.address
    }

    pub fn is_up(&self) -> bool {
        self.liveness == Liveness::Up
    }

    pub fn mark_up(&mut self, node_id: Option<String>) {
        self.liveness = Liveness::Up;
        if node_id.is_some() {
            self.node_id = node_id;
        }
        self.consecutive_failures = 0;
        self.next_retry_at = None;
        self.last_error = None;
    }

    pub fn mark_unreachable(&mut self, error: impl Into<String>, backoff: &BackoffConfig, now: Instant) {
        self.liveness = Liveness::Unreachable;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.next_retry_at = Some(now + backoff.calculate_delay(self.consecutive_failures));
        self.last_error = Some(error.into());
    }

    pub fn mark_auth_failed(&mut self, error: impl Into<String>) {
        self.liveness = Liveness::AuthFailed;
        self.next_retry_at = None;
        self.last_error = Some(error.into());
    }

    pub fn mark_down(&mut self) {
        self.liveness = Liveness::Down;
    }

    /// Whether discovery should contact this node at `now`.
    pub fn should_contact(&self, now: Instant) -> bool {
        match self.liveness {
            Liveness::AuthFailed => false,
            _ => self.next_retry_at.map_or(true, |at| now >= at),
        }
    }
}
