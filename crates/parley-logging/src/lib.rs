//! # parley-logging
//!
//! Structured logging with `tracing`.
//!
//! Installs a global subscriber with an [`EnvFilter`] built from the
//! configured level and per-module overrides (`RUST_LOG` wins when set),
//! writing either human-readable lines or one JSON object per event.

#![deny(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Output format for log lines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, one line per event.
    #[default]
    Pretty,
    /// One JSON object per event, with target and span list.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(LoggingError::UnknownFormat(other.to_owned())),
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    /// Default level directive (`error`, `warn`, `info`, `debug`, `trace`).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Per-module level overrides (e.g. `"parley_server::hub" => "debug"`).
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Pretty,
            modules: BTreeMap::new(),
        }
    }
}

impl LoggingConfig {
    /// Render the configured level and module overrides as an `EnvFilter`
    /// directive string.
    pub fn filter_directives(&self) -> String {
        let mut directives = self.level.to_lowercase();
        for (module, level) in &self.modules {
            directives.push_str(&format!(",{module}={}", level.to_lowercase()));
        }
        directives
    }

    /// Build the filter: `RUST_LOG` if set and valid, otherwise the
    /// configured directives.
    pub fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        let directives = self.filter_directives();
        EnvFilter::try_new(&directives).map_err(|e| LoggingError::InvalidFilter {
            directives,
            message: e.to_string(),
        })
    }
}

/// Errors raised while installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// The level/module directives did not parse.
    #[error("invalid log filter '{directives}': {message}")]
    InvalidFilter {
        /// The rejected directive string.
        directives: String,
        /// Parser message.
        message: String,
    },
    /// A format name other than `pretty` or `json`.
    #[error("unknown log format '{0}'")]
    UnknownFormat(String),
    /// A global subscriber was already installed.
    #[error("logging already initialized")]
    AlreadyInitialized,
}

/// Install the global `tracing` subscriber. Call once at startup.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = config.env_filter()?;

    let (json_layer, pretty_layer) = match config.format {
        LogFormat::Json => (
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_span_list(true),
            ),
            None,
        ),
        LogFormat::Pretty => (
            None,
            Some(tracing_subscriber::fmt::layer().with_target(true)),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)
}
