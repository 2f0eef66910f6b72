//! # clustersh entry point
//!
//! ## Usage
//!
//! ```bash
//! # Interactive shell against two seeds
//! clustersh -n 10.0.0.1 -n 10.0.0.2:3100 -u admin
//!
//! # One-shot script, JSON per line, for piping to jq
//! clustersh -n 10.0.0.1 -e 'show statistics -format=json; summary -format=json'
//!
//! # Named instance from ~/.clustersh/clustersh.toml
//! clustersh -i east
//! ```
//!
//! The password may also come from `CLUSTERSH_PASSWORD`. Logs go to stderr
//! and are filtered by `RUST_LOG` (default `warn`).

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::{Context, Result};
use argh::FromArgs;
use clustersh_cli::{OutputFormat, Overrides, Settings, Shell};
use clustersh_session::{ClusterSession, Liveness};
use tokio::io::BufReader;

#[derive(FromArgs)]
/// clustersh - interactive shell for a live database cluster
struct Cli {
    /// seed node address, host[:port]; may be repeated
    ///
    /// Defaults to the configuration file's hosts, then 127.0.0.1:3000.
    #[argh(option, short = 'n', long = "node")]
    nodes: Vec<String>,

    /// user name for the login exchange
    #[argh(option, short = 'u')]
    user: Option<String>,

    /// password for the login exchange; prefer CLUSTERSH_PASSWORD
    #[argh(option, short = 'p')]
    password: Option<String>,

    /// PEM bundle of trusted roots; enables TLS
    #[argh(option, long = "tls-ca")]
    tls_ca: Option<PathBuf>,

    /// client certificate chain for certificate authentication
    #[argh(option, long = "tls-cert")]
    tls_cert: Option<PathBuf>,

    /// private key matching --tls-cert
    #[argh(option, long = "tls-key")]
    tls_key: Option<PathBuf>,

    /// name to verify in node certificates instead of the host
    #[argh(option, long = "tls-name")]
    tls_name: Option<String>,

    /// configuration file (default ~/.clustersh/clustersh.toml)
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// named [cluster_<name>] table of the configuration file
    #[argh(option, short = 'i')]
    instance: Option<String>,

    /// commands to run, separated by ';', instead of reading input
    #[argh(option, short = 'e')]
    execute: Option<String>,

    /// per-node timeout in milliseconds
    #[argh(option, short = 't')]
    timeout: Option<u64>,

    /// only contact the seed nodes, never learned peers
    #[argh(switch, long = "seed-only")]
    seed_only: bool,

    /// default output format, json or pretty
    #[argh(option, short = 'o', default = "String::from(\"pretty\")")]
    format: String,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            hosts: self.nodes.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            tls_ca: self.tls_ca.clone(),
            tls_cert: self.tls_cert.clone(),
            tls_key: self.tls_key.clone(),
            tls_name: self.tls_name.clone(),
            timeout_ms: self.timeout,
            seed_only: self.seed_only,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Logs share the terminal with command output, so keep them quiet and
    // on stderr unless RUST_LOG asks otherwise
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    if cli.tls_cert.is_some() != cli.tls_key.is_some() {
        anyhow::bail!("--tls-cert and --tls-key must be given together");
    }
    let format = OutputFormat::from_name(&cli.format)?;

    let settings = Settings::load(cli.config.as_deref(), cli.instance.as_deref())?
        .with_env(|name| std::env::var(name).ok())
        .with_overrides(cli.overrides());

    let session = ClusterSession::new(settings.endpoints(), settings.session.clone())
        .context("cannot start a cluster session")?;
    let view = session.discover().await;
    tracing::info!(
        generation = view.generation(),
        up = view.count(Liveness::Up),
        known = view.len(),
        "connected"
    );
    if view.count(Liveness::Up) == 0 {
        tracing::warn!("no node is reachable; commands will fail until one is");
    }
    if view.count(Liveness::AuthFailed) > 0 {
        tracing::warn!("{} node(s) rejected the credentials", view.count(Liveness::AuthFailed));
    }

    let shell = Shell::spawn(session).with_format(format);
    let interrupter = shell.interrupter();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            interrupter.interrupt();
        }
    });

    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    let interactive = cli.execute.is_none() && std::io::stdin().is_terminal();
    let summary = match &cli.execute {
        Some(script) => shell.run_script(script, &mut stdout, &mut stderr).await?,
        None => {
            let input = BufReader::new(tokio::io::stdin());
            shell.run(input, &mut stdout, &mut stderr, interactive).await?
        }
    };
    shell.shutdown().await;

    if !interactive && summary.failures > 0 {
        anyhow::bail!("{} of {} commands failed", summary.failures, summary.commands);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_nodes_and_credentials() {
        let cli = Cli::from_args(
            &["clustersh"],
            &["-n", "10.0.0.1", "--node", "10.0.0.2:3100", "-u", "admin", "-t", "250", "--seed-only"],
        )
        .unwrap();
        assert_eq!(cli.nodes, vec!["10.0.0.1", "10.0.0.2:3100"]);
        assert_eq!(cli.user.as_deref(), Some("admin"));
        assert_eq!(cli.format, "pretty");

        let overrides = cli.overrides();
        assert_eq!(overrides.timeout_ms, Some(250));
        assert!(overrides.seed_only);
        assert_eq!(overrides.password, None);
    }

    #[test]
    fn test_cli_parse_script_and_instance() {
        let cli = Cli::from_args(&["clustersh"], &["-i", "east", "-e", "show nodes; summary", "-o", "json"]).unwrap();
        assert_eq!(cli.instance.as_deref(), Some("east"));
        assert_eq!(cli.execute.as_deref(), Some("show nodes; summary"));
        assert_eq!(OutputFormat::from_name(&cli.format).unwrap(), OutputFormat::Json);
        assert!(cli.nodes.is_empty());
    }

    #[test]
    fn test_cli_parse_tls() {
        let cli = Cli::from_args(
            &["clustersh"],
            &["--tls-ca", "ca.pem", "--tls-cert", "c.pem", "--tls-key", "c.key", "--tls-name", "db"],
        )
        .unwrap();
        let settings = Settings::default().with_overrides(cli.overrides());
        assert!(settings.tls.enabled);
        assert!(settings.tls.has_client_cert());
    }

    #[test]
    fn test_cli_rejects_unknown_flag() {
        assert!(Cli::from_args(&["clustersh"], &["--frobnicate"]).is_err());
    }
}
