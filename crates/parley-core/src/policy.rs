//! Configurable hub policies.

use serde::{Deserialize, Serialize};

/// What happens when a producer finds the inbound queue full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for space up to the enqueue timeout, then drop the message.
    #[default]
    Backpressure,
    /// Drop the incoming message immediately.
    DropNewest,
}

/// What the dispatcher does with queued messages when it is told to stop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Deliver everything already queued, then stop.
    #[default]
    Drain,
    /// Drop everything already queued.
    Discard,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        assert_eq!(OverflowPolicy::default(), OverflowPolicy::Backpressure);
        assert_eq!(ShutdownPolicy::default(), ShutdownPolicy::Drain);
    }

    #[test]
    fn snake_case_wire_names() {
        assert_eq!(
            serde_json::to_string(&OverflowPolicy::DropNewest).unwrap(),
            "\"drop_newest\""
        );
        let p: ShutdownPolicy = serde_json::from_str("\"discard\"").unwrap();
        assert_eq!(p, ShutdownPolicy::Discard);
    }
}
