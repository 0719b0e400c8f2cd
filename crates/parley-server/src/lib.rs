//! # parley-server
//!
//! Axum HTTP + `WebSocket` server for group chat.
//!
//! - Connection registry: the live set of clients, snapshot for fan-out
//! - Broadcast dispatcher: one task draining a bounded inbound queue and
//!   writing each message to every other client
//! - Session glue: register, read loop, writer, heartbeat, deregister
//! - HTTP endpoints: ping, health, metrics, static assets
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod server;
pub mod shutdown;

pub use config::{HubConfig, ServerConfig};
pub use hub::{BroadcastDispatcher, BroadcastReport, ConnectionRegistry, DispatchSummary, Hub, Inbox};
pub use server::ChatServer;
pub use shutdown::{ShutdownCoordinator, wait_for_signal};
