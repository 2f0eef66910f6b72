//! Shell settings.
//!
//! Settings are layered, later layers winning: built-in defaults, a TOML
//! file, the environment, then command-line flags. The file holds a
//! `[cluster]` table and any number of named `[cluster_<name>]` instances;
//! an instance, when selected, replaces `[cluster]` entirely.
//!
//! ```toml
//! [cluster]
//! hosts = ["10.0.0.1", "10.0.0.2:3100"]
//! user = "admin"
//!
//! [cluster.session]
//! timeout_ms = 2000
//!
//! [cluster_east]
//! hosts = ["east-1.db"]
//!
//! [cluster_east.tls]
//! enabled = true
//! ca_file = "/etc/clustersh/east-ca.pem"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clustersh_client::NodeEndpoint;
use clustersh_common::auth::Credentials;
use clustersh_common::transport::TlsSettings;
use clustersh_session::SessionConfig;
use serde::Deserialize;
use thiserror::Error;

/// Environment variable read for the password.
pub const PASSWORD_ENV: &str = "CLUSTERSH_PASSWORD";

/// Host contacted when nothing else is configured.
pub const DEFAULT_HOST: &str = "127.0.0.1";

const BASE_TABLE: &str = "cluster";
const INSTANCE_PREFIX: &str = "cluster_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no [cluster_{0}] table in the configuration file")]
    UnknownInstance(String),
}

/// Resolved shell settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Seed addresses, `host[:port]`
    pub hosts: Vec<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub tls: TlsSettings,
    pub session: SessionConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hosts: vec![DEFAULT_HOST.to_string()],
            user: None,
            password: None,
            tls: TlsSettings::disabled(),
            session: SessionConfig::default(),
        }
    }
}

/// Values given on the command line. `None` and empty fields leave the
/// lower layers untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub hosts: Vec<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub tls_ca: Option<PathBuf>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub tls_name: Option<String>,
    pub timeout_ms: Option<u64>,
    pub seed_only: bool,
}

/// `~/.clustersh/clustersh.toml`, when a home directory is known.
pub fn default_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".clustersh").join("clustersh.toml"))
}

impl Settings {
    /// Loads the file layer.
    ///
    /// An explicit `path` must exist. Without one, the default path is used
    /// if present and built-in defaults otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// `instance` names a table the file does not have.
    pub fn load(path: Option<&Path>, instance: Option<&str>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match default_path().filter(|p| p.is_file()) {
                Some(path) => path,
                None => {
                    return match instance {
                        Some(name) => Err(ConfigError::UnknownInstance(name.to_string())),
                        None => Ok(Self::default()),
                    };
                }
            },
        };

        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_toml(&text, instance).map_err(|err| match err {
            FileError::Toml(source) => ConfigError::Parse { path, source },
            FileError::UnknownInstance(name) => ConfigError::UnknownInstance(name),
        })
    }

    fn from_toml(text: &str, instance: Option<&str>) -> Result<Self, FileError> {
        let mut tables: BTreeMap<String, toml::Value> = toml::from_str(text)?;
        let table = match instance {
            Some(name) => tables
                .remove(&format!("{}{}", INSTANCE_PREFIX, name))
                .ok_or_else(|| FileError::UnknownInstance(name.to_string()))?,
            None => match tables.remove(BASE_TABLE) {
                Some(table) => table,
                None => return Ok(Self::default()),
            },
        };
        Ok(table.try_into()?)
    }

    /// Applies the environment layer. `lookup` reads one variable.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(password) = lookup(PASSWORD_ENV) {
            self.password = Some(password);
        }
        self
    }

    /// Applies the command-line layer.
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if !overrides.hosts.is_empty() {
            self.hosts = overrides.hosts;
        }
        if overrides.user.is_some() {
            self.user = overrides.user;
        }
        if overrides.password.is_some() {
            self.password = overrides.password;
        }
        if let Some(ca) = overrides.tls_ca {
            self.tls.enabled = true;
            self.tls.ca_file = Some(ca);
        }
        if let (Some(cert), Some(key)) = (overrides.tls_cert, overrides.tls_key) {
            self.tls = self.tls.with_client_cert(cert, key);
        }
        if let Some(name) = overrides.tls_name {
            self.tls = self.tls.with_server_name(name);
        }
        if let Some(timeout_ms) = overrides.timeout_ms {
            self.session.timeout_ms = timeout_ms;
            self.session.discovery_timeout_ms = timeout_ms;
        }
        if overrides.seed_only {
            self.session.seed_only = true;
        }
        self
    }

    pub fn credentials(&self) -> Credentials {
        match &self.user {
            Some(user) => Credentials::password(user.as_str(), self.password.as_deref().unwrap_or_default()),
            None => Credentials::none(),
        }
    }

    /// One seed endpoint per configured host, sharing credentials and TLS.
    pub fn endpoints(&self) -> Vec<NodeEndpoint> {
        let credentials = self.credentials();
        self.hosts
            .iter()
            .map(|host| {
                NodeEndpoint::new(host)
                    .with_credentials(credentials.clone())
                    .with_tls(self.tls.clone())
            })
            .collect()
    }
}

#[derive(Debug, Error)]
enum FileError {
    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error("unknown instance {0}")]
    UnknownInstance(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = r#"
        [cluster]
        hosts = ["10.0.0.1", "10.0.0.2:3100"]
        user = "admin"
        password = "from-file"

        [cluster.session]
        timeout_ms = 2000
        seed_only = true

        [cluster_east]
        hosts = ["east-1.db"]

        [cluster_east.tls]
        enabled = true
        ca_file = "/etc/clustersh/east-ca.pem"
    "#;

    #[test]
    fn test_base_table() {
        let settings = Settings::from_toml(FILE, None).unwrap();
        assert_eq!(settings.hosts, vec!["10.0.0.1", "10.0.0.2:3100"]);
        assert_eq!(settings.user.as_deref(), Some("admin"));
        assert_eq!(settings.session.timeout_ms, 2000);
        assert!(settings.session.seed_only);
        // Untouched keys keep their defaults
        assert_eq!(settings.session.discovery_timeout_ms, 5000);
        assert!(!settings.tls.enabled);
    }

    #[test]
    fn test_instance_replaces_base() {
        let settings = Settings::from_toml(FILE, Some("east")).unwrap();
        assert_eq!(settings.hosts, vec!["east-1.db"]);
        assert_eq!(settings.user, None);
        assert!(settings.tls.enabled);
        assert_eq!(settings.tls.ca_file, Some(PathBuf::from("/etc/clustersh/east-ca.pem")));
        assert_eq!(settings.session, SessionConfig::default());
    }

    #[test]
    fn test_unknown_instance() {
        assert!(matches!(
            Settings::from_toml(FILE, Some("west")),
            Err(FileError::UnknownInstance(name)) if name == "west"
        ));
    }

    #[test]
    fn test_file_without_cluster_table() {
        let settings = Settings::from_toml("[cluster_west]\nhosts = [\"w\"]\n", None).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_layer_priority() {
        let settings = Settings::from_toml(FILE, None)
            .unwrap()
            .with_env(|name| (name == PASSWORD_ENV).then(|| "from-env".to_string()));
        assert_eq!(settings.password.as_deref(), Some("from-env"));

        let settings = settings.with_overrides(Overrides {
            hosts: vec!["10.0.0.9".into()],
            password: Some("from-flag".into()),
            timeout_ms: Some(750),
            ..Overrides::default()
        });
        assert_eq!(settings.hosts, vec!["10.0.0.9"]);
        assert_eq!(settings.password.as_deref(), Some("from-flag"));
        assert_eq!(settings.user.as_deref(), Some("admin"));
        assert_eq!(settings.session.timeout_ms, 750);
        assert_eq!(settings.session.discovery_timeout_ms, 750);
    }

    #[test]
    fn test_tls_flags() {
        let settings = Settings::default().with_overrides(Overrides {
            tls_ca: Some("ca.pem".into()),
            tls_cert: Some("client.pem".into()),
            tls_key: Some("client.key".into()),
            tls_name: Some("db.internal".into()),
            ..Overrides::default()
        });
        assert!(settings.tls.enabled);
        assert!(settings.tls.has_client_cert());
        assert_eq!(settings.tls.server_name.as_deref(), Some("db.internal"));
    }

    #[test]
    fn test_endpoints_carry_credentials() {
        let settings = Settings {
            hosts: vec!["10.0.0.1".into(), "10.0.0.2:4000".into()],
            user: Some("admin".into()),
            password: Some("secret".into()),
            ..Settings::default()
        };
        let endpoints = settings.endpoints();
        assert_eq!(endpoints[0].address, "10.0.0.1:3000");
        assert_eq!(endpoints[1].address, "10.0.0.2:4000");
        assert_eq!(endpoints[1].credentials, Credentials::password("admin", "secret"));

        assert!(!Settings::default().credentials().requires_login());
    }
}
