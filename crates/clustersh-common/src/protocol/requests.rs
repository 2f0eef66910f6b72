use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use super::value::{Payload, Value};

pub type RequestId = u64;

/// Command name a node answers with a session token.
pub const LOGIN_COMMAND: &str = "login";
/// Command name a node answers with its membership report.
pub const PEERS_COMMAND: &str = "peers";

static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A request sent to one node.
///
/// `command` is opaque to the transport. Apart from [`LOGIN_COMMAND`] and
/// [`PEERS_COMMAND`] the node alone decides what it means.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub command: String,
    pub args: Payload,
    pub timeout_ms: Option<u64>,
    /// Session token obtained at login, attached by the connection.
    pub session: Option<String>,
}

impl Request {
    pub fn new(command: impl Into<String>, args: Payload) -> Self {
        Request {
            id: generate_request_id(),
            command: command.into(),
            args,
            timeout_ms: None,
            session: None,
        }
    }

    /// Request without arguments.
    pub fn command(command: impl Into<String>) -> Self {
        Self::new(command, Payload::new())
    }

    /// Builds the login exchange sent once per connection.
    pub fn login(user: &str, password: &str) -> Self {
        let mut args = Payload::new();
        args.insert("user".to_string(), Value::from(user));
        args.insert("password".to_string(), Value::from(password));
        Self::new(LOGIN_COMMAND, args)
    }

    /// Builds the membership query used by discovery.
    pub fn peers() -> Self {
        Self::command(PEERS_COMMAND)
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn with_session(mut self, token: impl Into<String>) -> Self {
        self.session = Some(token.into());
        self
    }

    /// Copy of this request with a fresh id, for sending the same command
    /// to another node.
    pub fn reissue(&self) -> Self {
        Request {
            id: generate_request_id(),
            ..self.clone()
        }
    }
}

fn generate_request_id() -> RequestId {
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let counter = REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst);

    // Upper 32 bits from the clock, lower 32 bits from the counter
    (timestamp & 0xFFFFFFFF00000000) | (counter & 0xFFFFFFFF)
}
