use std::fmt;
use std::hash::{Hash, Hasher};

use clustersh_common::auth::Credentials;
use clustersh_common::transport::TlsSettings;

/// Port assumed when an address is given without one.
pub const DEFAULT_PORT: u16 = 3000;

/// Where and how to reach one node.
///
/// Two endpoints are the same node when their addresses match, whatever
/// credentials or TLS settings they carry.
#[derive(Clone, Debug)]
pub struct NodeEndpoint {
    /// `host:port`
    pub address: String,
    pub credentials: Credentials,
    pub tls: TlsSettings,
}

impl NodeEndpoint {
    /// Creates an endpoint without credentials or TLS.
    ///
    /// A missing port is filled in with [`DEFAULT_PORT`].
    ///
    /// # Example
    ///
    /// ```
    /// use clustersh_client::NodeEndpoint;
    ///
    /// assert_eq!(NodeEndpoint::new("10.0.0.1").address, "10.0.0.1:3000");
    /// assert_eq!(NodeEndpoint::new("db:4000").address, "db:4000");
    /// ```
    pub fn new(address: impl AsRef<str>) -> Self {
        Self {
            address: normalize_address(address.as_ref()),
            credentials: Credentials::none(),
            tls: TlsSettings::disabled(),
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = tls;
        self
    }

    /// Endpoint for a peer learned during discovery, sharing this
    /// endpoint's credentials and TLS settings.
    pub fn sibling(&self, address: impl AsRef<str>) -> Self {
        Self {
            address: normalize_address(address.as_ref()),
            credentials: self.credentials.clone(),
            tls: self.tls.clone(),
        }
    }
}

impl PartialEq for NodeEndpoint {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for NodeEndpoint {}

impl Hash for NodeEndpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for NodeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

fn normalize_address(address: &str) -> String {
    let address = address.trim();
    // Bracketed IPv6 with a port, or host:port
    let has_port = if address.starts_with('[') {
        address.contains("]:")
    } else {
        matches!(address.rsplit_once(':'), Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok())
    };

    if has_port {
        address.to_string()
    } else if address.contains(':') && !address.starts_with('[') {
        format!("[{}]:{}", address, DEFAULT_PORT)
    } else {
        format!("{}:{}", address, DEFAULT_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_equality_ignores_credentials() {
        let a = NodeEndpoint::new("10.0.0.1:3000");
        let b = NodeEndpoint::new("10.0.0.1:3000").with_credentials(Credentials::password("u", "p"));
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(!set.insert(b));
    }

    #[test]
    fn test_default_port() {
        assert_eq!(NodeEndpoint::new("localhost").address, "localhost:3000");
        assert_eq!(NodeEndpoint::new(" 10.0.0.2 ").address, "10.0.0.2:3000");
        assert_eq!(NodeEndpoint::new("::1").address, "[::1]:3000");
        assert_eq!(NodeEndpoint::new("[::1]:4000").address, "[::1]:4000");
    }

    #[test]
    fn test_sibling_inherits_settings() {
        let seed = NodeEndpoint::new("10.0.0.1").with_credentials(Credentials::password("admin", "pw"));
        let peer = seed.sibling("10.0.0.9:3000");
        assert_eq!(peer.address, "10.0.0.9:3000");
        assert_eq!(peer.credentials, seed.credentials);
    }
}
