//! The live set of connections.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::RwLock;
use parley_core::{ConnectionId, HubError, Payload};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::connection::Connection;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_REGISTRATIONS_REJECTED_TOTAL};

/// Receiving half of a connection's outbound queue, owned by its writer task.
pub type OutboundReceiver = mpsc::Receiver<Arc<Payload>>;

/// Registry of all connected clients.
///
/// Every entry is an open connection. Register and deregister take the
/// write lock; [`ConnectionRegistry::snapshot`] takes the read lock only
/// long enough to copy the handles, so a broadcast never holds the lock
/// while writing.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    max_connections: usize,
    outbound_capacity: usize,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new(max_connections: usize, outbound_capacity: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            max_connections: max_connections.max(1),
            outbound_capacity: outbound_capacity.max(1),
        }
    }

    /// Register a new connection with a fresh identity.
    ///
    /// Returns the connection and the receiver its writer task drains.
    /// Fails with [`HubError::RegistrationFailed`] once `max_connections`
    /// live connections exist.
    pub fn register(&self) -> Result<(Arc<Connection>, OutboundReceiver), HubError> {
        let (tx, rx) = mpsc::channel(self.outbound_capacity);
        let mut conns = self.connections.write();
        if conns.len() >= self.max_connections {
            counter!(WS_REGISTRATIONS_REJECTED_TOTAL).increment(1);
            warn!(
                capacity = self.max_connections,
                "connection registry full, rejecting registration"
            );
            return Err(HubError::RegistrationFailed {
                reason: format!("capacity of {} connections reached", self.max_connections),
            });
        }

        let mut id = ConnectionId::new();
        while conns.contains_key(&id) {
            id = ConnectionId::new();
        }
        let connection = Arc::new(Connection::new(id.clone(), tx));
        let _ = conns.insert(id.clone(), Arc::clone(&connection));
        let active = conns.len();
        drop(conns);

        gauge!(WS_CONNECTIONS_ACTIVE).set(active as f64);
        debug!(conn_id = %id, active, "connection registered");
        Ok((connection, rx))
    }

    /// Remove a connection and close it.
    ///
    /// Idempotent: an id that is not registered is ignored and `None` is
    /// returned.
    pub fn deregister(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let (removed, active) = {
            let mut conns = self.connections.write();
            let removed = conns.remove(id);
            (removed, conns.len())
        };
        let connection = removed?;
        let _ = connection.close();
        gauge!(WS_CONNECTIONS_ACTIVE).set(active as f64);
        debug!(conn_id = %id, active, "connection deregistered");
        Some(connection)
    }

    /// Point-in-time copy of the open connections.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .values()
            .filter(|c| c.is_open())
            .cloned()
            .collect()
    }

    /// Look up a connection by id.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(id).cloned()
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.read().contains_key(id)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    /// Remove and close every connection. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Arc<Connection>> = {
            let mut conns = self.connections.write();
            conns.drain().map(|(_, c)| c).collect()
        };
        for connection in &drained {
            let _ = connection.close();
        }
        gauge!(WS_CONNECTIONS_ACTIVE).set(0.0);
        if !drained.is_empty() {
            info!(closed = drained.len(), "closed all connections");
        }
        drained.len()
    }
}
