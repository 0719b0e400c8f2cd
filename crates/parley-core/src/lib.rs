//! # parley-core
//!
//! Types shared by every parley crate.
//!
//! - Branded ids for connections and inbound messages
//! - The opaque [`Payload`] exchanged with clients and the [`InboundMessage`]
//!   envelope consumed by the dispatcher
//! - Queue overflow and shutdown policies
//! - The hub error taxonomy

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod message;
pub mod policy;

pub use errors::{DisconnectReason, HubError, WriteFailure};
pub use ids::{ConnectionId, MessageId};
pub use message::{InboundMessage, Payload};
pub use policy::{OverflowPolicy, ShutdownPolicy};
