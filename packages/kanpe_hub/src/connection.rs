//! Per-connection handling: handshake, read loop, write task, keepalive.
//!
//! One task reads frames and runs the keepalive timer (a timer racing a
//! read, per the timeout model); a second task drains the outbox into the
//! socket. The hub never writes to a socket directly — everything goes
//! through the outbox.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kanpe_protocol::{Envelope, decode, encode, new_id, now_millis};

use crate::error::DisconnectReason;
use crate::events::HubEvent;
use crate::hub::{HubInner, SubscriberHandle};
use crate::outbox::{Frame, Outbox};

pub(crate) async fn ws_handler(
    State(inner): State<Arc<HubInner>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, inner))
}

pub(crate) async fn handle_socket(socket: WebSocket, inner: Arc<HubInner>) {
    let (mut sink, mut stream) = socket.split();

    // The hub is silent until the caster introduces itself. Anything else
    // as the first frame closes the connection.
    let hello = match await_hello(&mut stream, &inner).await {
        Ok(payload) => payload,
        Err(reason) => {
            match reason {
                DisconnectReason::Timeout => inner.metrics.timeout(),
                _ => inner.metrics.protocol_violation(),
            }
            warn!(code = reason.as_str(), "handshake failed");
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };

    let client_id = new_id();
    let outbox = Arc::new(Outbox::new(inner.config.outbox_capacity));
    let cancel = CancellationToken::new();
    let close_reason: Arc<StdMutex<Option<DisconnectReason>>> = Arc::new(StdMutex::new(None));
    let last_seen = Arc::new(AtomicI64::new(now_millis()));

    // Registration, welcome, and registry snapshot happen in one critical
    // section so no delta or directive can interleave with the handshake.
    let registered = {
        let mut shared = inner.shared.lock().await;
        if shared.running {
            let welcome = Envelope::server_welcome(
                inner.config.server_name.clone(),
                client_id.clone(),
            );
            let sync = Envelope::monitor_list_sync(shared.registry.snapshot());
            for envelope in [&welcome, &sync] {
                match encode(envelope) {
                    Ok(text) => {
                        outbox.push(text);
                    }
                    Err(e) => {
                        warn!(code = e.error_code(), "failed to encode handshake frame");
                    }
                }
            }
            shared.clients.insert(
                client_id.clone(),
                SubscriberHandle {
                    name: hello.client_name.clone(),
                    display_monitor_ids: hello.display_monitor_ids.clone(),
                    outbox: outbox.clone(),
                    cancel: cancel.clone(),
                    close_reason: close_reason.clone(),
                    last_seen: last_seen.clone(),
                },
            );
            true
        } else {
            false
        }
    };
    if !registered {
        let _ = sink.send(Message::Close(None)).await;
        return;
    }

    inner.metrics.connection_opened();
    info!(client_id = %client_id, name = %hello.client_name, "caster connected");
    inner.emit(HubEvent::ClientConnected {
        client: crate::events::ClientInfo {
            client_id: client_id.clone(),
            name: hello.client_name,
            display_monitor_ids: hello.display_monitor_ids,
            last_seen: last_seen.load(Ordering::Relaxed),
            dropped_frames: 0,
        },
    });

    // Write half: drain the outbox in enqueue order.
    let write_outbox = outbox.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = write_outbox.pop().await {
            match frame {
                Frame::Text(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Frame::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let reason = read_loop(
        &mut stream,
        &inner,
        &client_id,
        &outbox,
        &cancel,
        &close_reason,
        &last_seen,
    )
    .await;

    // Teardown: let queued frames flush, then remove from the table. The
    // entry may already be gone if the hub initiated the close.
    outbox.push_close();
    let removed = inner.shared.lock().await.clients.remove(&client_id);
    inner.metrics.connection_closed();
    match reason {
        DisconnectReason::Timeout => inner.metrics.timeout(),
        DisconnectReason::ProtocolViolation | DisconnectReason::MalformedEnvelope => {
            inner.metrics.protocol_violation()
        }
        DisconnectReason::SlowConsumer => inner.metrics.slow_consumer(),
        DisconnectReason::ConnectionClosed | DisconnectReason::ServerShutdown => {}
    }
    if removed.is_some() {
        info!(client_id = %client_id, code = reason.as_str(), "caster disconnected");
        inner.emit(HubEvent::ClientDisconnected {
            client_id,
            reason: reason.as_str().to_string(),
        });
    }

    if tokio::time::timeout(std::time::Duration::from_secs(2), &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
}

/// Wait for the opening `client_hello`, bounded by the keepalive window.
async fn await_hello(
    stream: &mut SplitStream<WebSocket>,
    inner: &HubInner,
) -> Result<kanpe_protocol::ClientHelloPayload, DisconnectReason> {
    let first = tokio::time::timeout(inner.config.keepalive_timeout, stream.next())
        .await
        .map_err(|_| DisconnectReason::Timeout)?;
    let text = match first {
        Some(Ok(Message::Text(text))) => text,
        Some(Ok(_)) => return Err(DisconnectReason::ProtocolViolation),
        Some(Err(_)) | None => return Err(DisconnectReason::ConnectionClosed),
    };
    match decode(text.as_str()) {
        Ok(Envelope::ClientHello { payload, .. }) => Ok(payload),
        Ok(other) => {
            debug!(tag = other.tag(), "unexpected first frame");
            Err(DisconnectReason::ProtocolViolation)
        }
        Err(e) => {
            debug!(code = e.error_code(), "undecodable first frame");
            Err(DisconnectReason::MalformedEnvelope)
        }
    }
}

/// Sequential read loop racing the keepalive timer. Returns why the
/// connection ended.
async fn read_loop(
    stream: &mut SplitStream<WebSocket>,
    inner: &Arc<HubInner>,
    client_id: &str,
    outbox: &Outbox,
    cancel: &CancellationToken,
    close_reason: &StdMutex<Option<DisconnectReason>>,
    last_seen: &AtomicI64,
) -> DisconnectReason {
    let mut ticker = tokio::time::interval(inner.config.ping_interval);
    ticker.tick().await; // the first tick is immediate

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let slot = close_reason.lock().unwrap_or_else(|e| e.into_inner());
                return slot.unwrap_or(DisconnectReason::ServerShutdown);
            }
            _ = ticker.tick() => {
                let idle_ms = now_millis() - last_seen.load(Ordering::Relaxed);
                if idle_ms >= inner.config.keepalive_timeout.as_millis() as i64 {
                    return DisconnectReason::Timeout;
                }
                if let Ok(text) = encode(&Envelope::ping()) {
                    outbox.push(text);
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        last_seen.store(now_millis(), Ordering::Relaxed);
                        let envelope = match decode(text.as_str()) {
                            Ok(envelope) => envelope,
                            Err(e) => {
                                warn!(client_id, code = e.error_code(), "dropping connection");
                                return DisconnectReason::MalformedEnvelope;
                            }
                        };
                        if let Some(reason) = handle_inbound(inner, client_id, outbox, envelope).await {
                            return reason;
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        // Transport-level keepalive also counts as liveness.
                        last_seen.store(now_millis(), Ordering::Relaxed);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return DisconnectReason::ConnectionClosed;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!(client_id, "binary frame on a text protocol");
                        return DisconnectReason::ProtocolViolation;
                    }
                    Some(Err(e)) => {
                        debug!(client_id, "socket error: {e}");
                        return DisconnectReason::ConnectionClosed;
                    }
                }
            }
        }
    }
}

/// Dispatch one decoded inbound envelope. Returns `Some(reason)` when the
/// frame forces a close.
async fn handle_inbound(
    inner: &Arc<HubInner>,
    client_id: &str,
    outbox: &Outbox,
    envelope: Envelope,
) -> Option<DisconnectReason> {
    match envelope {
        Envelope::FeedbackMessage { ref payload, .. } => {
            let envelope_id = envelope.id().to_string();
            inner.shared.lock().await.history.record_feedback(&envelope);
            inner.metrics.feedback_recorded();
            debug!(
                client_id,
                feedback_type = ?payload.feedback_type,
                reply_to = %payload.reply_to_message_id,
                "feedback received"
            );
            inner.emit(HubEvent::FeedbackReceived {
                client_id: client_id.to_string(),
                envelope_id,
                payload: payload.clone(),
            });
            None
        }
        Envelope::Ping { ref id, .. } => {
            if let Ok(text) = encode(&Envelope::pong_for(id)) {
                outbox.push(text);
            }
            None
        }
        Envelope::Pong { .. } => None,
        other => {
            // Casters only send hello (once), feedback, and keepalives.
            warn!(
                client_id,
                tag = other.tag(),
                code = DisconnectReason::ProtocolViolation.as_str(),
                "unexpected frame from caster"
            );
            Some(DisconnectReason::ProtocolViolation)
        }
    }
}
