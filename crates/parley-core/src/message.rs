//! Payloads and the inbound message envelope.

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::ids::{ConnectionId, MessageId};

/// One opaque unit exchanged with a client.
///
/// The hub never looks inside a payload; text frames are rebroadcast as text
/// and binary frames as binary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
}

impl Payload {
    /// Size of the payload in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Whether the payload carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The text content, if this is a text payload.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

/// A message read from one connection, waiting to be broadcast.
///
/// Consumed exactly once by the dispatcher.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    /// Correlation id.
    pub id: MessageId,
    /// Connection the message was read from, if any.
    pub sender: Option<ConnectionId>,
    /// The opaque payload.
    pub payload: Payload,
    /// When the read loop received the message.
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// A message received from a client connection.
    pub fn from_connection(sender: ConnectionId, payload: impl Into<Payload>) -> Self {
        Self {
            id: MessageId::new(),
            sender: Some(sender),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }

    /// A message with no originating connection (e.g. a server notice).
    /// It is delivered to every live connection.
    pub fn anonymous(payload: impl Into<Payload>) -> Self {
        Self {
            id: MessageId::new(),
            sender: None,
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }

    /// Whether `id` is the connection that sent this message.
    pub fn is_from(&self, id: &ConnectionId) -> bool {
        self.sender.as_ref() == Some(id)
    }
}
