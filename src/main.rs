//! # parley
//!
//! Group chat server binary: loads settings, initialises logging and
//! metrics, and runs the HTTP/WebSocket server until a shutdown signal.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use parley_logging::LogFormat;
use parley_server::shutdown::DEFAULT_SHUTDOWN_TIMEOUT;
use parley_server::{ChatServer, ServerConfig, wait_for_signal};
use parley_settings::ParleySettings;
use tracing::{info, warn};

/// Real-time group chat server.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about = "Real-time group chat server")]
struct Cli {
    /// Settings file (default `~/.parley/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Directory holding `index.html` and static assets.
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Deliver each message back to its sender as well.
    #[arg(long, conflicts_with = "no_echo")]
    echo: bool,

    /// Never deliver a message back to its sender.
    #[arg(long)]
    no_echo: bool,

    /// Log output format (`pretty` or `json`).
    #[arg(long)]
    log_format: Option<LogFormat>,
}

impl Cli {
    /// Flags take priority over the settings file and environment.
    fn apply(&self, settings: &mut ParleySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(dir) = &self.static_dir {
            settings.server.static_dir = Some(dir.to_string_lossy().into_owned());
        }
        if self.echo {
            settings.hub.echo_to_sender = true;
        } else if self.no_echo {
            settings.hub.echo_to_sender = false;
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
    }
}

fn load_settings(args: &Cli) -> Result<ParleySettings> {
    let mut settings = match &args.config {
        Some(path) => parley_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => parley_settings::load_settings().context("Failed to load settings")?,
    };
    args.apply(&mut settings);
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = load_settings(&args)?;

    parley_logging::init_logging(&settings.logging).context("Failed to initialise logging")?;

    let metrics = match parley_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics recorder unavailable, /metrics disabled");
            None
        }
    };

    let config = ServerConfig::from(&settings);
    let bind = format!("{}:{}", config.host, config.port);
    let server = Arc::new(ChatServer::new(config, metrics));
    let (addr, handle) = server
        .listen()
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    info!(addr = %addr, "parley ready");

    wait_for_signal().await;

    let summary = server.shutdown(vec![handle], DEFAULT_SHUTDOWN_TIMEOUT).await;
    info!(
        broadcast = summary.broadcast,
        drained = summary.drained,
        discarded = summary.discarded,
        deliveries = summary.deliveries,
        "parley stopped"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_settings() {
        let args = Cli::parse_from([
            "parley",
            "--host",
            "127.0.0.1",
            "--port",
            "8080",
            "--static-dir",
            "./public",
            "--echo",
            "--log-format",
            "json",
        ]);
        let mut settings = ParleySettings::default();
        args.apply(&mut settings);

        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.static_dir.as_deref(), Some("./public"));
        assert!(settings.hub.echo_to_sender);
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn no_flags_keep_settings() {
        let args = Cli::parse_from(["parley"]);
        let mut settings = ParleySettings::default();
        settings.hub.echo_to_sender = true;
        args.apply(&mut settings);

        assert_eq!(settings.server.port, ParleySettings::default().server.port);
        assert!(settings.hub.echo_to_sender);
    }

    #[test]
    fn no_echo_overrides_settings() {
        let args = Cli::parse_from(["parley", "--no-echo"]);
        let mut settings = ParleySettings::default();
        settings.hub.echo_to_sender = true;
        args.apply(&mut settings);
        assert!(!settings.hub.echo_to_sender);
    }

    #[test]
    fn echo_flags_conflict() {
        assert!(Cli::try_parse_from(["parley", "--echo", "--no-echo"]).is_err());
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        assert!(Cli::try_parse_from(["parley", "--log-format", "xml"]).is_err());
    }

    #[test]
    fn explicit_config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 4555}}"#).unwrap();

        let args = Cli::parse_from(["parley", "--config", path.to_str().unwrap()]);
        let settings = load_settings(&args).unwrap();
        assert_eq!(settings.server.port, 4555);
    }
}
