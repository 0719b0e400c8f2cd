//! Settings types with compiled defaults.

use parley_core::{OverflowPolicy, ShutdownPolicy};
use parley_logging::LoggingConfig;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object, as stored in `settings.json`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParleySettings {
    /// Network and HTTP settings.
    pub server: ServerSettings,
    /// Connection registry and broadcast settings.
    pub hub: HubSettings,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl ParleySettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.hub.validate()
    }
}

/// Network and HTTP settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (`0` picks a free port).
    pub port: u16,
    /// Directory holding `index.html` and static assets. Not served when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<String>,
    /// Largest accepted WebSocket message, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            static_dir: None,
            max_message_size: 64 * 1024,
        }
    }
}

impl ServerSettings {
    fn validate(&self) -> Result<()> {
        if self.max_message_size == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxMessageSize must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Connection registry and broadcast settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Registrations beyond this many live connections are refused.
    pub max_connections: usize,
    /// Capacity of the dispatcher's inbound queue.
    pub inbound_queue_capacity: usize,
    /// Behaviour when the inbound queue is full.
    pub overflow_policy: OverflowPolicy,
    /// How long a producer waits for queue space under backpressure.
    pub enqueue_timeout_ms: u64,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue_capacity: usize,
    /// How long one write to one connection may take before it is dropped.
    pub write_timeout_ms: u64,
    /// Whether a sender receives its own messages.
    pub echo_to_sender: bool,
    /// What happens to queued messages on shutdown.
    pub shutdown_policy: ShutdownPolicy,
    /// Heartbeat ping interval.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a connection is considered dead.
    pub heartbeat_timeout_ms: u64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            max_connections: 1024,
            inbound_queue_capacity: 1024,
            overflow_policy: OverflowPolicy::Backpressure,
            enqueue_timeout_ms: 5_000,
            outbound_queue_capacity: 256,
            write_timeout_ms: 5_000,
            echo_to_sender: false,
            shutdown_policy: ShutdownPolicy::Drain,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
        }
    }
}

impl HubSettings {
    fn validate(&self) -> Result<()> {
        let non_zero = [
            ("hub.maxConnections", self.max_connections as u64),
            ("hub.inboundQueueCapacity", self.inbound_queue_capacity as u64),
            ("hub.outboundQueueCapacity", self.outbound_queue_capacity as u64),
            ("hub.writeTimeoutMs", self.write_timeout_ms),
            ("hub.heartbeatIntervalMs", self.heartbeat_interval_ms),
            ("hub.heartbeatTimeoutMs", self.heartbeat_timeout_ms),
        ];
        for (key, value) in non_zero {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!(
                    "{key} must be at least 1"
                )));
            }
        }
        if self.heartbeat_timeout_ms < self.heartbeat_interval_ms {
            return Err(SettingsError::InvalidValue(
                "hub.heartbeatTimeoutMs must not be shorter than hub.heartbeatIntervalMs".into(),
            ));
        }
        Ok(())
    }
}
