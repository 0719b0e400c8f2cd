//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

use crate::hub::DispatchStats;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Current WebSocket connection count.
    pub connections: usize,
    /// Messages accepted into the inbound queue.
    pub messages_received: u64,
    /// Broadcast rounds completed.
    pub messages_broadcast: u64,
    /// Successful per-connection writes.
    pub deliveries: u64,
    /// Failed per-connection writes.
    pub write_failures: u64,
    /// Messages dropped at the inbound queue.
    pub inbound_drops: u64,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize, stats: &DispatchStats) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        messages_received: stats.received(),
        messages_broadcast: stats.broadcasts(),
        deliveries: stats.deliveries(),
        write_failures: stats.write_failures(),
        inbound_drops: stats.inbound_drops(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), 0, &DispatchStats::default());
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, 0, &DispatchStats::default());
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let resp = health_check(Instant::now(), 2, &DispatchStats::default());
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 2);
        for field in [
            "uptime_secs",
            "messages_received",
            "messages_broadcast",
            "deliveries",
            "write_failures",
            "inbound_drops",
        ] {
            assert!(parsed[field].is_number(), "missing {field}");
        }
    }
}
