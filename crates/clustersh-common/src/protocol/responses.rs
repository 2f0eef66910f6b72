//! Response types returned by a node.

use serde::{Deserialize, Serialize};

use super::value::Payload;
use super::RequestId;

/// Outcome reported by the node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error,
    /// Credentials or session token rejected.
    AuthFailed,
}

/// A response returned from a node.
///
/// # Fields
///
/// - `id`: The request ID this response corresponds to
/// - `result`: Response body (present on success)
/// - `error`: Error message (present on failure)
/// - `status`: Whether the node handled the request
///
/// # Example
///
/// ```
/// use clustersh_common::{payload, Response, Status};
///
/// let success = Response::success(123, payload! { "objects" => 10 });
/// assert_eq!(success.status, Status::Ok);
///
/// let error = Response::error(123, "unknown command");
/// assert!(!error.is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub id: RequestId,
    pub result: Option<Payload>,
    pub error: Option<String>,
    pub status: Status,
}

impl Response {
    /// Creates a successful response.
    ///
    /// # Arguments
    ///
    /// * `id` - The request identifier (must match the request's ID)
    /// * `result` - The response body
    pub fn success(id: RequestId, result: Payload) -> Self {
        Response {
            id,
            result: Some(result),
            error: None,
            status: Status::Ok,
        }
    }

    /// Creates an error response.
    pub fn error(id: RequestId, error: impl Into<String>) -> Self {
        Response {
            id,
            result: None,
            error: Some(error.into()),
            status: Status::Error,
        }
    }

    /// Creates a response rejecting the caller's credentials.
    pub fn auth_failed(id: RequestId, error: impl Into<String>) -> Self {
        Response {
            id,
            result: None,
            error: Some(error.into()),
            status: Status::AuthFailed,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Error text, falling back to a generic message when the node sent none.
    pub fn error_message(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| format!("node returned status {:?}", self.status))
    }
}
