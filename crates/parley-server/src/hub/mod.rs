//! The chat hub: connection registry, broadcast dispatcher and the
//! per-connection session glue.

pub mod connection;
pub mod dispatcher;
pub mod heartbeat;
pub mod registry;
pub mod session;

use std::sync::Arc;

use crate::config::HubConfig;

pub use connection::Connection;
pub use dispatcher::{BroadcastDispatcher, BroadcastReport, DispatchStats, DispatchSummary, Inbox};
pub use registry::ConnectionRegistry;

/// Handles shared by every session.
#[derive(Clone)]
pub struct Hub {
    /// Live connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Producer side of the dispatcher's inbound queue.
    pub inbox: Inbox,
    /// Hub configuration.
    pub config: Arc<HubConfig>,
}

impl Hub {
    /// Build the registry and dispatcher for `config`.
    ///
    /// The dispatcher is returned separately so the caller can run it on
    /// its own task.
    pub fn new(config: HubConfig) -> (Self, BroadcastDispatcher) {
        let registry = Arc::new(ConnectionRegistry::new(
            config.max_connections,
            config.outbound_queue_capacity,
        ));
        let (dispatcher, inbox) = BroadcastDispatcher::new(Arc::clone(&registry), &config);
        let hub = Self {
            registry,
            inbox,
            config: Arc::new(config),
        };
        (hub, dispatcher)
    }

    /// Counters shared with the dispatcher.
    pub fn stats(&self) -> &Arc<DispatchStats> {
        self.inbox.stats()
    }
}
