//! A registered client connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use parley_core::{ConnectionId, Payload, WriteFailure};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Live handle to one client.
///
/// Writes go through a bounded channel drained by the connection's writer
/// task; the writer is the only code that touches the socket's send half.
/// Once [`Connection::close`] has run, nothing further reaches the socket.
pub struct Connection {
    id: ConnectionId,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Arc<Payload>>,
    open: AtomicBool,
    close_signal: CancellationToken,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has shown activity since the last heartbeat check.
    is_alive: AtomicBool,
    last_seen: Mutex<Instant>,
    delivered: AtomicU64,
}

impl Connection {
    /// Create an open connection writing into `tx`.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<Payload>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            open: AtomicBool::new(true),
            close_signal: CancellationToken::new(),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
            delivered: AtomicU64::new(0),
        }
    }

    /// The identity assigned at registration.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Whether the connection has not been closed yet.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Hand a payload to the connection's writer.
    ///
    /// Waits at most `timeout` for room in the outbound queue. A closed
    /// connection, a dropped writer or a timeout all fail the write; the
    /// caller decides what to do with the connection.
    pub async fn deliver(&self, payload: Arc<Payload>, timeout: Duration) -> Result<(), WriteFailure> {
        if !self.is_open() {
            return Err(WriteFailure::Closed);
        }
        tokio::select! {
            biased;
            () = self.close_signal.cancelled() => Err(WriteFailure::Closed),
            sent = tokio::time::timeout(timeout, self.tx.send(payload)) => match sent {
                Ok(Ok(())) => {
                    let _ = self.delivered.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
                Ok(Err(_)) => Err(WriteFailure::Closed),
                Err(_) => Err(WriteFailure::TimedOut(timeout)),
            },
        }
    }

    /// Close the connection. Returns `true` for the call that actually
    /// closed it; later calls are no-ops.
    pub fn close(&self) -> bool {
        let was_open = self.open.swap(false, Ordering::AcqRel);
        self.close_signal.cancel();
        was_open
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.close_signal.cancelled().await;
    }

    /// Record client activity (pong or any frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last recorded activity.
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Number of payloads accepted by [`Connection::deliver`].
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .field("delivered", &self.delivered_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(50);

    fn make_connection(capacity: usize) -> (Connection, mpsc::Receiver<Arc<Payload>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Connection::new(ConnectionId::new(), tx), rx)
    }

    fn text(s: &str) -> Arc<Payload> {
        Arc::new(Payload::from(s))
    }

    #[tokio::test]
    async fn deliver_success() {
        let (conn, mut rx) = make_connection(8);
        conn.deliver(text("hello"), TIMEOUT).await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.as_text(), Some("hello"));
        assert_eq!(conn.delivered_count(), 1);
    }

    #[tokio::test]
    async fn deliver_to_dropped_writer_is_closed() {
        let (conn, rx) = make_connection(8);
        drop(rx);
        let err = conn.deliver(text("hello"), TIMEOUT).await.unwrap_err();
        assert_eq!(err, WriteFailure::Closed);
        assert_eq!(conn.delivered_count(), 0);
    }

    #[tokio::test]
    async fn deliver_after_close_is_closed() {
        let (conn, mut rx) = make_connection(8);
        assert!(conn.close());
        let err = conn.deliver(text("late"), TIMEOUT).await.unwrap_err();
        assert_eq!(err, WriteFailure::Closed);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn deliver_to_full_queue_times_out() {
        let (conn, _rx) = make_connection(1);
        conn.deliver(text("first"), TIMEOUT).await.unwrap();
        let err = conn.deliver(text("second"), TIMEOUT).await.unwrap_err();
        assert_eq!(err, WriteFailure::TimedOut(TIMEOUT));
    }

    #[tokio::test]
    async fn close_interrupts_pending_delivery() {
        let (conn, _rx) = make_connection(1);
        let conn = Arc::new(conn);
        conn.deliver(text("fill"), TIMEOUT).await.unwrap();

        let pending = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.deliver(text("blocked"), Duration::from_secs(30)).await })
        };
        tokio::task::yield_now().await;
        let _ = conn.close();

        let result = pending.await.unwrap();
        assert_eq!(result, Err(WriteFailure::Closed));
    }

    #[test]
    fn close_is_idempotent() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.is_open());
        assert!(conn.close());
        assert!(!conn.close());
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn closed_resolves_after_close() {
        let (conn, _rx) = make_connection(1);
        let _ = conn.close();
        tokio::time::timeout(TIMEOUT, conn.closed()).await.unwrap();
    }

    #[test]
    fn mark_alive_and_check() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }

    #[tokio::test]
    async fn messages_keep_order() {
        let (conn, mut rx) = make_connection(8);
        for i in 0..5 {
            conn.deliver(text(&format!("msg_{i}")), TIMEOUT).await.unwrap();
        }
        for i in 0..5 {
            let msg = rx.recv().await.unwrap();
            assert_eq!(msg.as_text(), Some(format!("msg_{i}").as_str()));
        }
    }
}
