//! TLS client setup for node connections.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::protocol::error::{Result, WireError};

/// TLS trust and identity settings for a node endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    pub enabled: bool,
    /// PEM bundle of trusted roots. Required when TLS is enabled.
    pub ca_file: Option<PathBuf>,
    /// Client certificate chain for certificate authentication.
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    /// Name to verify instead of the host part of the address.
    pub server_name: Option<String>,
}

impl TlsSettings {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_ca(ca_file: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            ca_file: Some(ca_file.into()),
            ..Self::default()
        }
    }

    pub fn with_client_cert(mut self, cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        self.cert_file = Some(cert_file.into());
        self.key_file = Some(key_file.into());
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Whether a client certificate is configured.
    pub fn has_client_cert(&self) -> bool {
        self.cert_file.is_some() && self.key_file.is_some()
    }
}

/// Builds a rustls client configuration from `settings`.
///
/// # Errors
///
/// Fails when no CA file is configured, when a PEM file cannot be read or
/// holds no usable item, or when rustls rejects the client identity.
pub fn build_client_config(settings: &TlsSettings) -> Result<Arc<ClientConfig>> {
    // Install crypto provider if not already installed
    let _ = rustls::crypto::ring::default_provider().install_default();

    let ca_file = settings
        .ca_file
        .as_ref()
        .ok_or_else(|| WireError::Tls("TLS enabled but no CA file configured".to_string()))?;

    let mut roots = RootCertStore::empty();
    for cert in load_certs(ca_file)? {
        roots.add(cert)?;
    }

    let builder = ClientConfig::builder().with_root_certificates(roots);

    let config = match (&settings.cert_file, &settings.key_file) {
        (Some(cert_file), Some(key_file)) => {
            let chain = load_certs(cert_file)?;
            let key = PrivateKeyDer::from_pem_file(key_file)
                .map_err(|e| WireError::Tls(format!("Failed to read key {}: {}", key_file.display(), e)))?;
            builder.with_client_auth_cert(chain, key)?
        }
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(WireError::Tls(
                "client certificate and key must be configured together".to_string(),
            ))
        }
    };

    Ok(Arc::new(config))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(|e| WireError::Tls(format!("Failed to open {}: {}", path.display(), e)))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| WireError::Tls(format!("Failed to parse {}: {}", path.display(), e)))?;

    if certs.is_empty() {
        return Err(WireError::Tls(format!("No certificates found in {}", path.display())));
    }
    Ok(certs)
}

/// Name the server certificate must match for `address` (`host:port`).
pub fn server_name_for(settings: &TlsSettings, address: &str) -> Result<ServerName<'static>> {
    let host = match &settings.server_name {
        Some(name) => name.clone(),
        None => host_of(address).to_string(),
    };
    ServerName::try_from(host.clone())
        .map_err(|e| WireError::Tls(format!("Invalid server name '{}': {}", host, e)))
}

fn host_of(address: &str) -> &str {
    let host = match address.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => address,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}

/// Runs the TLS handshake over an established TCP stream.
pub async fn connect_tls(
    stream: TcpStream,
    config: Arc<ClientConfig>,
    server_name: ServerName<'static>,
) -> Result<TlsStream<TcpStream>> {
    TlsConnector::from(config)
        .connect(server_name, stream)
        .await
        .map_err(|e| WireError::Tls(format!("TLS handshake failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_ca_is_error() {
        let settings = TlsSettings {
            enabled: true,
            ..TlsSettings::default()
        };
        assert!(matches!(build_client_config(&settings), Err(WireError::Tls(_))));
    }

    #[test]
    fn test_ca_without_certificates_is_error() {
        let file = write_temp("not a pem file\n");
        let settings = TlsSettings::with_ca(file.path());
        assert!(build_client_config(&settings).is_err());
    }

    #[test]
    fn test_config_from_self_signed_ca() {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let file = write_temp(&generated.cert.pem());
        let settings = TlsSettings::with_ca(file.path());
        assert!(build_client_config(&settings).is_ok());
    }

    #[test]
    fn test_cert_without_key_is_error() {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let file = write_temp(&generated.cert.pem());
        let mut settings = TlsSettings::with_ca(file.path());
        settings.cert_file = Some(file.path().to_path_buf());
        assert!(build_client_config(&settings).is_err());
    }

    #[test]
    fn test_server_name_from_address() {
        let settings = TlsSettings::disabled();
        let name = server_name_for(&settings, "db1.example.com:3000").unwrap();
        assert_eq!(name.to_str(), "db1.example.com");

        let ip = server_name_for(&settings, "10.0.0.1:3000").unwrap();
        assert!(matches!(ip, ServerName::IpAddress(_)));
    }

    #[test]
    fn test_server_name_override() {
        let settings = TlsSettings::disabled().with_server_name("cluster.internal");
        let name = server_name_for(&settings, "10.0.0.1:3000").unwrap();
        assert_eq!(name.to_str(), "cluster.internal");
    }

    #[test]
    fn test_host_of_ipv6() {
        assert_eq!(host_of("[::1]:3000"), "::1");
        assert_eq!(host_of("localhost"), "localhost");
    }
}
