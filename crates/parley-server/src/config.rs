//! Server and hub runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

use parley_core::{OverflowPolicy, ShutdownPolicy};
use parley_settings::{HubSettings, ParleySettings};

/// Configuration for the parley server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Directory with `index.html` and static assets, if any.
    pub static_dir: Option<PathBuf>,
    /// Connection registry and broadcast configuration.
    pub hub: HubConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_message_size: 64 * 1024,
            static_dir: None,
            hub: HubConfig::default(),
        }
    }
}

impl From<&ParleySettings> for ServerConfig {
    fn from(settings: &ParleySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_message_size: settings.server.max_message_size,
            static_dir: settings.server.static_dir.as_ref().map(PathBuf::from),
            hub: HubConfig::from(&settings.hub),
        }
    }
}

/// Configuration for the connection registry, dispatcher and sessions.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Maximum concurrent connections; registrations beyond it fail.
    pub max_connections: usize,
    /// Inbound queue capacity.
    pub inbound_queue_capacity: usize,
    /// Behaviour when the inbound queue is full.
    pub overflow_policy: OverflowPolicy,
    /// Backpressure wait before a message is dropped, in milliseconds.
    pub enqueue_timeout_ms: u64,
    /// Per-connection outbound queue capacity.
    pub outbound_queue_capacity: usize,
    /// Per-connection write timeout in milliseconds.
    pub write_timeout_ms: u64,
    /// Deliver a message back to its sender.
    pub echo_to_sender: bool,
    /// Fate of queued messages on shutdown.
    pub shutdown_policy: ShutdownPolicy,
    /// Heartbeat interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Heartbeat timeout in milliseconds (close after this long without a pong).
    pub heartbeat_timeout_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::from(&HubSettings::default())
    }
}

impl From<&HubSettings> for HubConfig {
    fn from(hub: &HubSettings) -> Self {
        Self {
            max_connections: hub.max_connections,
            inbound_queue_capacity: hub.inbound_queue_capacity,
            overflow_policy: hub.overflow_policy,
            enqueue_timeout_ms: hub.enqueue_timeout_ms,
            outbound_queue_capacity: hub.outbound_queue_capacity,
            write_timeout_ms: hub.write_timeout_ms,
            echo_to_sender: hub.echo_to_sender,
            shutdown_policy: hub.shutdown_policy,
            heartbeat_interval_ms: hub.heartbeat_interval_ms,
            heartbeat_timeout_ms: hub.heartbeat_timeout_ms,
        }
    }
}

impl HubConfig {
    /// Backpressure wait.
    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    /// Per-connection write timeout.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms.max(1))
    }

    /// Heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    /// Heartbeat timeout.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_on_random_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert!(cfg.static_dir.is_none());
    }

    #[test]
    fn default_hub_matches_settings_defaults() {
        let cfg = HubConfig::default();
        let settings = HubSettings::default();
        assert_eq!(cfg.max_connections, settings.max_connections);
        assert_eq!(cfg.inbound_queue_capacity, settings.inbound_queue_capacity);
        assert!(!cfg.echo_to_sender);
        assert_eq!(cfg.shutdown_policy, ShutdownPolicy::Drain);
    }

    #[test]
    fn from_settings_copies_every_section() {
        let mut settings = ParleySettings::default();
        settings.server.host = "10.0.0.1".into();
        settings.server.port = 4242;
        settings.server.static_dir = Some("./static".into());
        settings.hub.echo_to_sender = true;
        settings.hub.overflow_policy = OverflowPolicy::DropNewest;
        settings.hub.write_timeout_ms = 75;

        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.host, "10.0.0.1");
        assert_eq!(cfg.port, 4242);
        assert_eq!(cfg.static_dir, Some(PathBuf::from("./static")));
        assert!(cfg.hub.echo_to_sender);
        assert_eq!(cfg.hub.overflow_policy, OverflowPolicy::DropNewest);
        assert_eq!(cfg.hub.write_timeout(), Duration::from_millis(75));
    }

    #[test]
    fn durations_never_zero() {
        let cfg = HubConfig {
            write_timeout_ms: 0,
            heartbeat_interval_ms: 0,
            heartbeat_timeout_ms: 0,
            ..HubConfig::default()
        };
        assert_eq!(cfg.write_timeout(), Duration::from_millis(1));
        assert_eq!(cfg.heartbeat_interval(), Duration::from_millis(1));
        assert_eq!(cfg.heartbeat_timeout(), Duration::from_millis(1));
    }
}
