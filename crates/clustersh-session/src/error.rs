use clustersh_client::{CallError, ConnectError};
use thiserror::Error;

use crate::node::Liveness;

/// Why one node has no payload in an [`AggregatedResponse`](crate::AggregatedResponse).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("{0}")]
    Connect(#[from] ConnectError),

    #[error("{0}")]
    Call(#[from] CallError),

    /// Not contacted because the view does not hold the node Up.
    #[error("node is {0}")]
    Unavailable(Liveness),

    #[error("not a member of the cluster view")]
    NotMember,

    /// The operator interrupted the command before the node answered.
    #[error("cancelled")]
    Cancelled,
}

impl NodeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, NodeError::Call(CallError::Timeout(_)))
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            NodeError::Connect(ConnectError::AuthFailed { .. }) | NodeError::Unavailable(Liveness::AuthFailed)
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("no reachable nodes")]
    NoReachableNodes,

    #[error("no seed endpoints configured")]
    NoSeeds,

    #[error("no node matches '{0}'")]
    UnknownSelector(String),

    #[error("'{selector}' is ambiguous: matches {}", .candidates.join(", "))]
    AmbiguousSelector { selector: String, candidates: Vec<String> },
}

pub type Result<T> = std::result::Result<T, SessionError>;
