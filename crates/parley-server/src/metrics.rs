//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup, before any metric is recorded; a second install
/// fails.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Registrations refused at capacity (counter).
pub const WS_REGISTRATIONS_REJECTED_TOTAL: &str = "ws_registrations_rejected_total";
/// WebSocket connection lifetime seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Messages accepted into the inbound queue (counter).
pub const HUB_MESSAGES_RECEIVED_TOTAL: &str = "hub_messages_received_total";
/// Broadcast rounds completed (counter).
pub const HUB_BROADCASTS_TOTAL: &str = "hub_broadcasts_total";
/// Successful per-connection writes (counter).
pub const HUB_DELIVERIES_TOTAL: &str = "hub_deliveries_total";
/// Failed per-connection writes (counter, labels: error_kind).
pub const HUB_WRITE_FAILURES_TOTAL: &str = "hub_write_failures_total";
/// Messages dropped at the inbound queue (counter, labels: reason).
pub const HUB_INBOUND_DROPS_TOTAL: &str = "hub_inbound_drops_total";
/// Broadcast round duration seconds (histogram).
pub const HUB_BROADCAST_DURATION_SECONDS: &str = "hub_broadcast_duration_seconds";
/// Time a message spent in the inbound queue, seconds (histogram).
pub const HUB_QUEUE_LATENCY_SECONDS: &str = "hub_queue_latency_seconds";
