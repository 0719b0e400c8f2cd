//! Hub error taxonomy.

use std::time::Duration;

/// Errors surfaced by the connection registry and the inbound queue.
///
/// None of them is fatal to the server; each is scoped to one connection or
/// one message.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// The registry could not accept another connection.
    #[error("registration failed: {reason}")]
    RegistrationFailed {
        /// Human-readable cause.
        reason: String,
    },
    /// The inbound queue was full and the overflow policy drops on full.
    #[error("inbound queue full, message dropped")]
    QueueFull,
    /// The inbound queue stayed full for the whole enqueue timeout.
    #[error("inbound queue still full after {0:?}, message dropped")]
    EnqueueTimedOut(Duration),
    /// The dispatcher has stopped accepting messages.
    #[error("inbound queue closed")]
    QueueClosed,
}

impl HubError {
    /// Whether the message that caused this error was dropped while the
    /// dispatcher is still running.
    pub fn is_drop(&self) -> bool {
        matches!(self, Self::QueueFull | Self::EnqueueTimedOut(_))
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::RegistrationFailed { .. } => "registration_failed",
            Self::QueueFull => "queue_full",
            Self::EnqueueTimedOut(_) => "enqueue_timed_out",
            Self::QueueClosed => "queue_closed",
        }
    }
}

/// Why a single write to a single connection failed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum WriteFailure {
    /// The connection was closed before or during the write.
    #[error("connection closed")]
    Closed,
    /// The connection did not accept the write within the timeout.
    #[error("write timed out after {0:?}")]
    TimedOut(Duration),
}

impl WriteFailure {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::TimedOut(_) => "timed_out",
        }
    }
}

/// Why a connection's read loop ended.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DisconnectReason {
    /// The client sent a close frame or the stream ended.
    #[error("client closed the connection")]
    ClientClosed,
    /// Reading from the transport failed.
    #[error("transport error: {0}")]
    TransportError(String),
    /// The client stopped answering heartbeats.
    #[error("heartbeat timed out")]
    HeartbeatTimeout,
    /// The connection was closed from outside the read loop, typically
    /// after a failed broadcast write.
    #[error("evicted by the hub")]
    Evicted,
    /// The dispatcher stopped accepting messages.
    #[error("inbound queue closed")]
    QueueClosed,
    /// The server is shutting down.
    #[error("server shutting down")]
    Shutdown,
}

impl DisconnectReason {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::TransportError(_) => "transport_error",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Evicted => "evicted",
            Self::QueueClosed => "queue_closed",
            Self::Shutdown => "shutdown",
        }
    }

    /// Whether this is an orderly disconnect rather than a failure.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::ClientClosed | Self::Shutdown)
    }
}
