//! Cluster session: membership discovery, concurrent broadcast and the
//! session-scoped cache.
//!
//! A [`ClusterSession`] owns one connection slot per node, the published
//! [`ClusterView`] and the [`SessionCache`]. Views and cache contents are
//! replaced as whole values, so concurrent readers always see a consistent
//! snapshot.

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod error;
pub mod membership;
pub mod node;
pub mod session;
#[cfg(any(test, feature = "sim"))]
pub mod simulation;
pub mod stats;
pub mod view;

pub use aggregate::AggregatedResponse;
pub use cache::{CacheKey, SessionCache};
pub use config::SessionConfig;
pub use error::{NodeError, Result, SessionError};
pub use membership::{AnyReporterPolicy, MajorityPolicy, MembershipPolicy, MembershipReport, PeerReport};
pub use node::{BackoffConfig, Liveness, NodeState};
pub use session::ClusterSession;
pub use stats::{CallStats, NodeCallStats};
pub use view::ClusterView;

pub use tokio_util::sync::CancellationToken;
