//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, histogram};
use parley_core::{DisconnectReason, HubError, InboundMessage, Payload};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::Hub;
use super::dispatcher::Inbox;
use super::connection::Connection;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use super::registry::OutboundReceiver;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};

/// Serve one upgraded socket until it disconnects.
///
/// 1. Registers the connection (a full registry closes the socket with
///    code 1013 and returns `None`)
/// 2. Forwards the connection's outbound queue to the socket, with pings
/// 3. Feeds text and binary frames into the hub's inbox
/// 4. Watches heartbeat liveness
/// 5. Deregisters and closes on exit, whatever the cause
#[instrument(skip_all, fields(conn_id))]
pub async fn serve_connection(
    mut socket: WebSocket,
    hub: Hub,
    shutdown: CancellationToken,
) -> Option<DisconnectReason> {
    let (connection, outbound) = match hub.registry.register() {
        Ok(registered) => registered,
        Err(e) => {
            warn!(error_kind = e.error_kind(), error = %e, "rejecting websocket client");
            let frame = CloseFrame {
                code: close_code::AGAIN,
                reason: "server at capacity".into(),
            };
            let _ = socket.send(Message::Close(Some(frame))).await;
            return None;
        }
    };

    let conn_id = connection.id().clone();
    let _ = tracing::Span::current().record("conn_id", tracing::field::display(&conn_id));
    info!(conn_id = %conn_id, "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);

    let config = Arc::clone(&hub.config);
    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(write_loop(
        sink,
        Arc::clone(&connection),
        outbound,
        config.heartbeat_interval(),
        config.write_timeout(),
        shutdown.clone(),
    ));

    let heartbeat = run_heartbeat(
        Arc::clone(&connection),
        config.heartbeat_interval(),
        config.heartbeat_timeout(),
        shutdown.clone(),
    );
    tokio::pin!(heartbeat);

    let reason = loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break DisconnectReason::Shutdown,
            () = connection.closed() => break DisconnectReason::Evicted,
            beat = &mut heartbeat => break match beat {
                HeartbeatResult::TimedOut => DisconnectReason::HeartbeatTimeout,
                HeartbeatResult::Cancelled if shutdown.is_cancelled() => DisconnectReason::Shutdown,
                HeartbeatResult::Cancelled => DisconnectReason::Evicted,
            },
            frame = stream.next() => {
                let payload = match frame {
                    Some(Ok(Message::Text(text))) => Payload::Text(text.as_str().to_owned()),
                    Some(Ok(Message::Binary(data))) => Payload::Binary(data),
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        connection.mark_alive();
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | None => break DisconnectReason::ClientClosed,
                    Some(Err(e)) => break DisconnectReason::TransportError(e.to_string()),
                };
                connection.mark_alive();

                let message = InboundMessage::from_connection(conn_id.clone(), payload);
                match enqueue_or_stop(&hub.inbox, message, &connection, &shutdown).await {
                    Ok(Ok(())) => {}
                    Ok(Err(HubError::QueueClosed)) => break DisconnectReason::QueueClosed,
                    Ok(Err(e)) => debug!(conn_id = %conn_id, error_kind = e.error_kind(), "message not queued"),
                    Err(reason) => break reason,
                }
            }
        }
    };

    let _ = hub.registry.deregister(&conn_id);
    let _ = connection.close();
    let reason = match (reason, writer.await) {
        (DisconnectReason::Evicted, Ok(Err(write_error))) => {
            DisconnectReason::TransportError(write_error)
        }
        (reason, _) => reason,
    };

    log_disconnect(&connection, &reason);
    Some(reason)
}

/// Queue `message`, giving up early if the session is told to stop while
/// waiting for room.
async fn enqueue_or_stop(
    inbox: &Inbox,
    message: InboundMessage,
    connection: &Connection,
    shutdown: &CancellationToken,
) -> Result<Result<(), HubError>, DisconnectReason> {
    tokio::select! {
        biased;
        () = shutdown.cancelled() => Err(DisconnectReason::Shutdown),
        () = connection.closed() => Err(DisconnectReason::Evicted),
        queued = inbox.enqueue(message) => Ok(queued),
    }
}

/// Forward queued payloads and heartbeat pings to the socket.
///
/// On close or shutdown, payloads already queued are flushed before the
/// sink is closed. A failed or timed-out socket write closes the connection
/// and is returned as the error.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    connection: Arc<Connection>,
    mut outbound: OutboundReceiver,
    ping_interval: Duration,
    write_timeout: Duration,
    shutdown: CancellationToken,
) -> Result<(), String> {
    let mut ping = time::interval_at(time::Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    let outcome = loop {
        let frame = tokio::select! {
            biased;
            () = connection.closed() => break flush(&mut sink, &connection, &mut outbound, write_timeout).await,
            () = shutdown.cancelled() => break flush(&mut sink, &connection, &mut outbound, write_timeout).await,
            next = outbound.recv() => match next {
                Some(payload) => to_message(&payload),
                None => break Ok(()),
            },
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };

        if let Err(e) = send_frame(&mut sink, frame, write_timeout).await {
            break Err(e);
        }
    };

    if let Err(ref e) = outcome {
        debug!(conn_id = %connection.id(), error = %e, "socket write failed");
        let _ = connection.close();
    }
    let _ = time::timeout(write_timeout, sink.close()).await;
    outcome
}

/// Write out every payload still queued for the client.
///
/// The queue is closed first so nothing new arrives. The first failed
/// write abandons the rest.
async fn flush(
    sink: &mut SplitSink<WebSocket, Message>,
    connection: &Connection,
    outbound: &mut OutboundReceiver,
    write_timeout: Duration,
) -> Result<(), String> {
    outbound.close();
    let mut flushed = 0_usize;
    while let Ok(payload) = outbound.try_recv() {
        if let Err(e) = send_frame(sink, to_message(&payload), write_timeout).await {
            warn!(
                conn_id = %connection.id(),
                flushed,
                abandoned = outbound.len() + 1,
                error = %e,
                "final flush failed"
            );
            return Err(e);
        }
        flushed += 1;
    }
    if flushed > 0 {
        debug!(conn_id = %connection.id(), flushed, "flushed queued payloads");
    }
    Ok(())
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    frame: Message,
    write_timeout: Duration,
) -> Result<(), String> {
    match time::timeout(write_timeout, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("socket write timed out after {write_timeout:?}")),
    }
}

fn to_message(payload: &Payload) -> Message {
    match payload {
        Payload::Text(text) => Message::Text(text.clone().into()),
        Payload::Binary(data) => Message::Binary(data.clone()),
    }
}

fn log_disconnect(connection: &Connection, reason: &DisconnectReason) {
    let age = connection.age();
    if reason.is_clean() {
        info!(
            conn_id = %connection.id(),
            reason = reason.error_kind(),
            delivered = connection.delivered_count(),
            connected_secs = age.as_secs(),
            "client disconnected"
        );
    } else {
        warn!(
            conn_id = %connection.id(),
            reason = reason.error_kind(),
            detail = %reason,
            idle_ms = u64::try_from(connection.last_seen_elapsed().as_millis()).unwrap_or(u64::MAX),
            delivered = connection.delivered_count(),
            "client disconnected abnormally"
        );
    }
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.error_kind()).increment(1);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(age.as_secs_f64());
}
