//! Credentials and login sessions.
//!
//! A node connection logs in once, right after the transport is established,
//! by sending a `login` request with the configured user and password. The
//! node answers with a session token and a time to live; the token is attached
//! to every later request on that connection.
//!
//! Certificate authentication needs no login exchange: the client identity is
//! presented during the TLS handshake (see [`crate::transport::tls`]).
//!
//! # Example
//!
//! ```
//! use clustersh_common::auth::Credentials;
//!
//! let creds = Credentials::password("admin", "secret");
//! assert!(creds.requires_login());
//! assert_eq!(creds.to_string(), "admin:*****");
//!
//! let none = Credentials::none();
//! assert!(!none.requires_login());
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use crate::protocol::{Payload, Value};

/// Credentials presented to every node of a cluster.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    user: Option<String>,
    password: Option<String>,
}

impl Credentials {
    /// User/password credentials sent in the login exchange.
    pub fn password(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            password: Some(password.into()),
        }
    }

    /// No login exchange. Used for open clusters and certificate auth.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn requires_login(&self) -> bool {
        self.user.is_some()
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn secret(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }

    /// Checks a presented password without leaking timing information.
    ///
    /// # Example
    ///
    /// ```
    /// use clustersh_common::auth::Credentials;
    ///
    /// let creds = Credentials::password("admin", "correct");
    /// assert!(creds.verify("admin", "correct"));
    /// assert!(!creds.verify("admin", "wrong"));
    /// ```
    pub fn verify(&self, user: &str, password: &str) -> bool {
        match (&self.user, &self.password) {
            (Some(u), Some(p)) => u == user && constant_time_eq(p, password),
            (None, _) => true,
            (Some(_), None) => false,
        }
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user {
            Some(user) => write!(f, "{}:*****", user),
            None => write!(f, "none"),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credentials({})", self)
    }
}

/// Session granted by a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub token: String,
    /// `None` when the node granted a session without expiry.
    pub expires_at: Option<Instant>,
}

impl SessionToken {
    /// Reads `session_token` and `session_ttl_s` from a login reply.
    ///
    /// Returns `None` when the reply carries no token.
    pub fn from_login_reply(reply: &Payload, now: Instant) -> Option<Self> {
        let token = reply.get("session_token").and_then(Value::as_str)?.to_string();
        let expires_at = reply
            .get("session_ttl_s")
            .and_then(Value::as_i64)
            .filter(|ttl| *ttl > 0)
            .map(|ttl| now + Duration::from_secs(ttl as u64));
        Some(Self { token, expires_at })
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Performs constant-time string comparison.
///
/// Always walks both strings fully so the comparison time does not depend on
/// where the first difference is.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.bytes().zip(b.bytes()) {
        result |= byte_a ^ byte_b;
    }

    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload;

    #[test]
    fn test_password_credentials() {
        let creds = Credentials::password("admin", "pw");
        assert!(creds.requires_login());
        assert_eq!(creds.user(), Some("admin"));
        assert_eq!(creds.secret(), "pw");
        assert!(creds.verify("admin", "pw"));
        assert!(!creds.verify("root", "pw"));
    }

    #[test]
    fn test_no_credentials_accept_anything() {
        let creds = Credentials::none();
        assert!(!creds.requires_login());
        assert!(creds.verify("anyone", ""));
    }

    #[test]
    fn test_display_masks_password() {
        let creds = Credentials::password("admin", "hunter2");
        assert_eq!(format!("{}", creds), "admin:*****");
        assert!(!format!("{:?}", creds).contains("hunter2"));
        assert_eq!(Credentials::none().to_string(), "none");
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("hello", "hello"));
        assert!(constant_time_eq("", ""));
        assert!(!constant_time_eq("hello", "world"));
        assert!(!constant_time_eq("short", "longer"));
    }

    #[test]
    fn test_session_token_from_reply() {
        let now = Instant::now();
        let reply = payload! { "session_token" => "abc", "session_ttl_s" => 60 };
        let token = SessionToken::from_login_reply(&reply, now).unwrap();
        assert_eq!(token.token, "abc");
        assert!(!token.is_expired(now));
        assert!(token.is_expired(now + Duration::from_secs(60)));
    }

    #[test]
    fn test_session_token_without_ttl_never_expires() {
        let now = Instant::now();
        let reply = payload! { "session_token" => "abc" };
        let token = SessionToken::from_login_reply(&reply, now).unwrap();
        assert!(token.expires_at.is_none());
        assert!(!token.is_expired(now + Duration::from_secs(86_400)));
    }

    #[test]
    fn test_reply_without_token() {
        assert!(SessionToken::from_login_reply(&payload! { "ok" => true }, Instant::now()).is_none());
    }
}
