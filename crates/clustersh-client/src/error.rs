use clustersh_common::WireError;
use thiserror::Error;

/// Failure to establish a node connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// Transport or TLS failure. Worth retrying later.
    #[error("cannot reach {address}: {reason}")]
    Network { address: String, reason: String },

    /// The node rejected the credentials. Retrying will not help.
    #[error("authentication failed on {address}: {reason}")]
    AuthFailed { address: String, reason: String },
}

impl ConnectError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConnectError::Network { .. })
    }

    pub fn network(address: &str, reason: impl ToString) -> Self {
        ConnectError::Network {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Failure of a single request on an open connection.
///
/// Every variant leaves the connection `Failed`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// Bytes that do not form a valid reply.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The node answered with an error.
    #[error("node error: {0}")]
    Remote(String),

    #[error("disconnected: {0}")]
    Disconnected(String),

    /// The connection was already failed before the call.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
}

impl From<WireError> for CallError {
    fn from(err: WireError) -> Self {
        if err.is_protocol() {
            return CallError::Protocol(err.to_string());
        }
        match err {
            WireError::Timeout(ms) => CallError::Timeout(ms),
            other => CallError::Disconnected(other.to_string()),
        }
    }
}
