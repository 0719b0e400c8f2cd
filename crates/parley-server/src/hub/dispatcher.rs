//! Inbound queue and fan-out to connected clients.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use metrics::{counter, histogram};
use parley_core::{ConnectionId, HubError, InboundMessage, MessageId, OverflowPolicy, ShutdownPolicy};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::ConnectionRegistry;
use crate::config::HubConfig;
use crate::metrics::{
    HUB_BROADCAST_DURATION_SECONDS, HUB_BROADCASTS_TOTAL, HUB_DELIVERIES_TOTAL,
    HUB_INBOUND_DROPS_TOTAL, HUB_MESSAGES_RECEIVED_TOTAL, HUB_QUEUE_LATENCY_SECONDS,
    HUB_WRITE_FAILURES_TOTAL,
};

/// Running totals shared by the dispatcher, its inboxes and `/health`.
#[derive(Debug, Default)]
pub struct DispatchStats {
    received: AtomicU64,
    broadcasts: AtomicU64,
    deliveries: AtomicU64,
    write_failures: AtomicU64,
    inbound_drops: AtomicU64,
    discarded: AtomicU64,
}

impl DispatchStats {
    /// Messages accepted into the inbound queue.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Broadcast rounds completed.
    pub fn broadcasts(&self) -> u64 {
        self.broadcasts.load(Ordering::Relaxed)
    }

    /// Successful per-connection writes.
    pub fn deliveries(&self) -> u64 {
        self.deliveries.load(Ordering::Relaxed)
    }

    /// Failed per-connection writes.
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    /// Messages dropped because the inbound queue was full.
    pub fn inbound_drops(&self) -> u64 {
        self.inbound_drops.load(Ordering::Relaxed)
    }

    /// Messages thrown away on shutdown.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    fn bump(counter: &AtomicU64, by: u64) {
        let _ = counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// Producer handle for the inbound queue. Cheap to clone; one per session.
#[derive(Clone)]
pub struct Inbox {
    tx: mpsc::Sender<InboundMessage>,
    policy: OverflowPolicy,
    enqueue_timeout: Duration,
    stats: Arc<DispatchStats>,
}

impl Inbox {
    /// Append a message to the inbound queue.
    ///
    /// With [`OverflowPolicy::Backpressure`] a full queue is waited on for
    /// at most the enqueue timeout; with [`OverflowPolicy::DropNewest`] the
    /// message is dropped at once. Dropped messages are counted and never
    /// reorder the accepted ones.
    pub async fn enqueue(&self, message: InboundMessage) -> Result<(), HubError> {
        let msg_id = message.id.clone();
        let outcome = match self.policy {
            OverflowPolicy::Backpressure => {
                match self.tx.send_timeout(message, self.enqueue_timeout).await {
                    Ok(()) => Ok(()),
                    Err(SendTimeoutError::Timeout(_)) => {
                        Err(HubError::EnqueueTimedOut(self.enqueue_timeout))
                    }
                    Err(SendTimeoutError::Closed(_)) => Err(HubError::QueueClosed),
                }
            }
            OverflowPolicy::DropNewest => match self.tx.try_send(message) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => Err(HubError::QueueFull),
                Err(TrySendError::Closed(_)) => Err(HubError::QueueClosed),
            },
        };

        match &outcome {
            Ok(()) => {
                DispatchStats::bump(&self.stats.received, 1);
                counter!(HUB_MESSAGES_RECEIVED_TOTAL).increment(1);
            }
            Err(e) if e.is_drop() => {
                DispatchStats::bump(&self.stats.inbound_drops, 1);
                counter!(HUB_INBOUND_DROPS_TOTAL, "reason" => e.error_kind()).increment(1);
                warn!(msg_id = %msg_id, reason = e.error_kind(), "inbound queue full, message dropped");
            }
            Err(e) => {
                debug!(msg_id = %msg_id, reason = e.error_kind(), "inbound queue closed");
            }
        }
        outcome
    }

    /// Whether the dispatcher has stopped accepting messages.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Shared counters.
    pub fn stats(&self) -> &Arc<DispatchStats> {
        &self.stats
    }
}

impl std::fmt::Debug for Inbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inbox")
            .field("policy", &self.policy)
            .field("enqueue_timeout", &self.enqueue_timeout)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Outcome of one broadcast round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BroadcastReport {
    /// The message that was broadcast.
    pub message_id: MessageId,
    /// Connections the message was written to.
    pub recipients: usize,
    /// Writes that succeeded.
    pub delivered: usize,
    /// Connections whose write failed; they have been deregistered.
    pub failed: Vec<ConnectionId>,
    /// Whether the sender was left out of the round.
    pub excluded_sender: bool,
}

/// Totals for one run of the dispatcher loop, returned when it stops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Messages broadcast while running.
    pub broadcast: u64,
    /// Messages broadcast from the queue after shutdown was requested.
    pub drained: u64,
    /// Messages dropped from the queue after shutdown was requested.
    pub discarded: u64,
    /// Successful writes across all rounds.
    pub deliveries: u64,
    /// Failed writes across all rounds.
    pub write_failures: u64,
}

impl DispatchSummary {
    fn record(&mut self, report: &BroadcastReport) {
        self.deliveries += report.delivered as u64;
        self.write_failures += report.failed.len() as u64;
    }
}

/// Single consumer of the inbound queue.
///
/// Each dequeued message is written to every connection in a fresh
/// registry snapshot. Writes within a round run concurrently and are each
/// bounded by the write timeout, so one slow client cannot hold up the
/// others. A failed write deregisters that connection only.
pub struct BroadcastDispatcher {
    registry: Arc<ConnectionRegistry>,
    rx: mpsc::Receiver<InboundMessage>,
    echo_to_sender: bool,
    write_timeout: Duration,
    shutdown_policy: ShutdownPolicy,
    stats: Arc<DispatchStats>,
}

impl BroadcastDispatcher {
    /// Create a dispatcher over `registry` and the inbox that feeds it.
    pub fn new(registry: Arc<ConnectionRegistry>, config: &HubConfig) -> (Self, Inbox) {
        let (tx, rx) = mpsc::channel(config.inbound_queue_capacity.max(1));
        let stats = Arc::new(DispatchStats::default());
        let inbox = Inbox {
            tx,
            policy: config.overflow_policy,
            enqueue_timeout: config.enqueue_timeout(),
            stats: Arc::clone(&stats),
        };
        let dispatcher = Self {
            registry,
            rx,
            echo_to_sender: config.echo_to_sender,
            write_timeout: config.write_timeout(),
            shutdown_policy: config.shutdown_policy,
            stats,
        };
        (dispatcher, inbox)
    }

    /// Shared counters.
    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Deliver one message to every live connection.
    pub async fn broadcast(&self, message: InboundMessage) -> BroadcastReport {
        let started = Instant::now();
        let latency = Utc::now()
            .signed_duration_since(message.received_at)
            .to_std()
            .unwrap_or_default();
        histogram!(HUB_QUEUE_LATENCY_SECONDS).record(latency.as_secs_f64());

        let mut excluded_sender = false;
        let targets: Vec<_> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|conn| {
                if !self.echo_to_sender && message.is_from(conn.id()) {
                    excluded_sender = true;
                    return false;
                }
                true
            })
            .collect();

        let InboundMessage {
            id: message_id,
            payload,
            ..
        } = message;
        let payload = Arc::new(payload);

        let writes = targets.iter().map(|conn| {
            let payload = Arc::clone(&payload);
            async move { (conn, conn.deliver(payload, self.write_timeout).await) }
        });
        let results = join_all(writes).await;

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (conn, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(failure) => {
                    warn!(
                        conn_id = %conn.id(),
                        msg_id = %message_id,
                        error_kind = failure.error_kind(),
                        "write failed, dropping connection"
                    );
                    counter!(HUB_WRITE_FAILURES_TOTAL, "error_kind" => failure.error_kind())
                        .increment(1);
                    let _ = self.registry.deregister(conn.id());
                    failed.push(conn.id().clone());
                }
            }
        }

        DispatchStats::bump(&self.stats.broadcasts, 1);
        DispatchStats::bump(&self.stats.deliveries, delivered as u64);
        DispatchStats::bump(&self.stats.write_failures, failed.len() as u64);
        counter!(HUB_BROADCASTS_TOTAL).increment(1);
        counter!(HUB_DELIVERIES_TOTAL).increment(delivered as u64);
        histogram!(HUB_BROADCAST_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        debug!(
            msg_id = %message_id,
            kind = payload.kind(),
            recipients = targets.len(),
            delivered,
            failed = failed.len(),
            "broadcast message"
        );

        BroadcastReport {
            message_id,
            recipients: targets.len(),
            delivered,
            failed,
            excluded_sender,
        }
    }

    /// Drain the inbound queue until `shutdown` fires or every [`Inbox`]
    /// is dropped.
    ///
    /// A round in progress always completes. Messages still queued when
    /// the loop stops are delivered or discarded per the shutdown policy.
    pub async fn run(mut self, shutdown: CancellationToken) -> DispatchSummary {
        info!(
            echo_to_sender = self.echo_to_sender,
            write_timeout_ms = self.write_timeout.as_millis() as u64,
            "broadcast dispatcher started"
        );
        let mut summary = DispatchSummary::default();

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    debug!("dispatcher shutdown requested");
                    break;
                }
                next = self.rx.recv() => {
                    let Some(message) = next else {
                        debug!("all inboxes dropped");
                        break;
                    };
                    let report = self.broadcast(message).await;
                    summary.broadcast += 1;
                    summary.record(&report);
                }
            }
        }

        self.rx.close();
        match self.shutdown_policy {
            ShutdownPolicy::Drain => {
                while let Some(message) = self.rx.recv().await {
                    let report = self.broadcast(message).await;
                    summary.drained += 1;
                    summary.record(&report);
                }
            }
            ShutdownPolicy::Discard => {
                while let Ok(message) = self.rx.try_recv() {
                    debug!(msg_id = %message.id, "discarding queued message");
                    summary.discarded += 1;
                }
                DispatchStats::bump(&self.stats.discarded, summary.discarded);
            }
        }

        info!(
            broadcast = summary.broadcast,
            drained = summary.drained,
            discarded = summary.discarded,
            "broadcast dispatcher stopped"
        );
        summary
    }
}
