//! The caster session: dial, handshake, receive loop, reconnect driver.
//!
//! One driver task owns the connection lifecycle; a write task drains the
//! outgoing channel into the socket. Shared session state sits behind a
//! coarse tokio mutex that is never held across a suspension point, and a
//! generation counter keeps a superseded driver from clobbering the state
//! of a newer `connect`.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kanpe_protocol::{
    Envelope, FeedbackType, LatestMessageInfo, VirtualMonitor, decode, encode, targets_match,
};

use crate::backoff::{Backoff, BackoffConfig};
use crate::error::CasterError;
use crate::events::CasterEvent;
use crate::mirror::MonitorMirror;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Session tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Retry with backoff after transport failures. When off, the first
    /// failure parks the session in `Idle` with a recorded reason.
    pub auto_reconnect: bool,
    pub backoff: BackoffConfig,
    /// How long to wait for `server_welcome` after sending the hello.
    pub handshake_timeout: Duration,
    /// Outgoing channel bound (feedback + pongs).
    pub send_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            backoff: BackoffConfig::default(),
            handshake_timeout: Duration::from_secs(30),
            send_buffer: 64,
        }
    }
}

/// Where the session state machine currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Dialing,
    Handshaking,
    Connected,
    Reconnecting,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Dialing => "dialing",
            Self::Handshaking => "handshaking",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

/// Why a connection (or the whole session) ended. Recorded as
/// `last_disconnect_reason` and carried on `ConnectionLost`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LossReason {
    DialFailed,
    ConnectionClosed,
    ProtocolViolation,
    MalformedEnvelope,
    Timeout,
    Disconnected,
}

impl LossReason {
    fn as_str(&self) -> &'static str {
        match self {
            Self::DialFailed => "dial_failed",
            Self::ConnectionClosed => "connection_closed",
            Self::ProtocolViolation => "protocol_violation",
            Self::MalformedEnvelope => "malformed_envelope",
            Self::Timeout => "timeout",
            Self::Disconnected => "disconnected",
        }
    }
}

enum ConnectionEnd {
    /// Session goes to `Idle`; no reconnect regardless of policy.
    Terminal(LossReason),
    /// Connection dropped; reconnect policy decides what happens next.
    Lost(LossReason),
}

struct SessionShared {
    state: SessionState,
    server_address: Option<String>,
    server_name: Option<String>,
    assigned_client_id: Option<String>,
    client_name: String,
    display_monitor_ids: Vec<String>,
    mirror: MonitorMirror,
    latest: Option<LatestMessageInfo>,
    last_disconnect_reason: Option<String>,
    outgoing: Option<mpsc::Sender<String>>,
    cancel: Option<CancellationToken>,
    /// Bumped by every `connect`; stale drivers check it before mutating.
    generation: u64,
}

struct SessionInner {
    config: SessionConfig,
    events: broadcast::Sender<CasterEvent>,
    shared: Mutex<SessionShared>,
}

impl SessionInner {
    fn emit(&self, event: CasterEvent) {
        let _ = self.events.send(event);
    }
}

/// The caster-side client. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct CasterSession {
    inner: Arc<SessionInner>,
}

impl CasterSession {
    pub fn new(config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(SessionInner {
                config,
                events,
                shared: Mutex::new(SessionShared {
                    state: SessionState::Idle,
                    server_address: None,
                    server_name: None,
                    assigned_client_id: None,
                    client_name: String::new(),
                    display_monitor_ids: Vec::new(),
                    mirror: MonitorMirror::default(),
                    latest: None,
                    last_disconnect_reason: None,
                    outgoing: None,
                    cancel: None,
                    generation: 0,
                }),
            }),
        }
    }

    /// Subscribe to the session's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<CasterEvent> {
        self.inner.events.subscribe()
    }

    pub async fn state(&self) -> SessionState {
        self.inner.shared.lock().await.state
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.shared.lock().await.state == SessionState::Connected
    }

    /// Snapshot of the monitor mirror; the UI reads only from here.
    pub async fn monitors(&self) -> Vec<VirtualMonitor> {
        self.inner.shared.lock().await.mirror.snapshot()
    }

    /// The most recent kanpe that passed the display filter, if any.
    pub async fn latest_message(&self) -> Option<LatestMessageInfo> {
        self.inner.shared.lock().await.latest.clone()
    }

    pub async fn client_name(&self) -> String {
        self.inner.shared.lock().await.client_name.clone()
    }

    pub async fn display_monitor_ids(&self) -> Vec<String> {
        self.inner.shared.lock().await.display_monitor_ids.clone()
    }

    pub async fn server_name(&self) -> Option<String> {
        self.inner.shared.lock().await.server_name.clone()
    }

    pub async fn assigned_client_id(&self) -> Option<String> {
        self.inner.shared.lock().await.assigned_client_id.clone()
    }

    pub async fn last_disconnect_reason(&self) -> Option<String> {
        self.inner.shared.lock().await.last_disconnect_reason.clone()
    }

    /// Dial a hub and start the session driver.
    ///
    /// The first dial happens inline so a hard failure surfaces to the
    /// caller when auto-reconnect is off; with auto-reconnect on, a failed
    /// first dial parks the session in `Reconnecting` and the driver keeps
    /// trying with backoff.
    pub async fn connect(
        &self,
        server_address: impl Into<String>,
        client_name: impl Into<String>,
        display_monitor_ids: Vec<String>,
    ) -> Result<(), CasterError> {
        let server_address = server_address.into();
        let client_name = client_name.into();
        let cancel = CancellationToken::new();
        let generation = {
            let mut shared = self.inner.shared.lock().await;
            if shared.state != SessionState::Idle {
                return Err(CasterError::AlreadyConnected);
            }
            shared.generation += 1;
            shared.state = SessionState::Dialing;
            shared.server_address = Some(server_address.clone());
            shared.client_name = client_name;
            shared.display_monitor_ids = display_monitor_ids;
            shared.server_name = None;
            shared.assigned_client_id = None;
            shared.last_disconnect_reason = None;
            shared.latest = None;
            shared.mirror.clear();
            shared.cancel = Some(cancel.clone());
            shared.generation
        };

        match dial(&server_address).await {
            Ok(stream) => {
                let inner = self.inner.clone();
                tokio::spawn(run_session(inner, generation, cancel, Some(stream)));
                Ok(())
            }
            Err(detail) => {
                if self.inner.config.auto_reconnect {
                    {
                        let mut shared = self.inner.shared.lock().await;
                        if shared.generation == generation {
                            shared.state = SessionState::Reconnecting;
                            shared.last_disconnect_reason =
                                Some(LossReason::DialFailed.as_str().to_string());
                        }
                    }
                    debug!(code = "dial_failed", "first dial failed: {detail}");
                    let inner = self.inner.clone();
                    tokio::spawn(run_session(inner, generation, cancel, None));
                    Ok(())
                } else {
                    let mut shared = self.inner.shared.lock().await;
                    if shared.generation == generation {
                        shared.state = SessionState::Idle;
                        shared.cancel = None;
                        shared.last_disconnect_reason =
                            Some(LossReason::DialFailed.as_str().to_string());
                    }
                    Err(CasterError::DialFailed {
                        address: server_address,
                        detail,
                    })
                }
            }
        }
    }

    /// Force `Idle` immediately; no reconnect. A no-op when already idle.
    pub async fn disconnect(&self) {
        let cancel = {
            let mut shared = self.inner.shared.lock().await;
            if shared.state == SessionState::Idle {
                None
            } else {
                shared.state = SessionState::Idle;
                shared.outgoing = None;
                shared.last_disconnect_reason =
                    Some(LossReason::Disconnected.as_str().to_string());
                shared.cancel.take()
            }
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
    }

    /// Send typed feedback to the hub. Allowed only while `Connected`;
    /// delivery is at-most-once — a socket failing mid-send is not
    /// retried and the next reconnect will not replay.
    pub async fn send_feedback(
        &self,
        content: String,
        client_name: String,
        reply_to_message_id: String,
        feedback_type: FeedbackType,
    ) -> Result<Envelope, CasterError> {
        let tx = {
            let shared = self.inner.shared.lock().await;
            if shared.state != SessionState::Connected {
                return Err(CasterError::NotConnected);
            }
            shared.outgoing.clone().ok_or(CasterError::NotConnected)?
        };
        let envelope = Envelope::feedback(content, client_name, reply_to_message_id, feedback_type);
        match encode(&envelope) {
            Ok(text) => {
                if tx.send(text).await.is_err() {
                    debug!("feedback dropped: connection tearing down");
                }
            }
            Err(e) => warn!(code = e.error_code(), "failed to encode feedback"),
        }
        Ok(envelope)
    }
}

/// Normalize an address into a dialable URL. Bare `host:port` gets the
/// standard scheme and path.
fn ws_url(address: &str) -> String {
    if address.starts_with("ws://") || address.starts_with("wss://") {
        address.to_string()
    } else {
        format!("ws://{address}/ws")
    }
}

async fn dial(address: &str) -> Result<WsStream, String> {
    match connect_async(ws_url(address)).await {
        Ok((stream, _)) => Ok(stream),
        Err(e) => Err(e.to_string()),
    }
}

async fn set_state(inner: &SessionInner, generation: u64, state: SessionState) {
    let mut shared = inner.shared.lock().await;
    if shared.generation == generation {
        shared.state = state;
    }
}

async fn note_loss(inner: &SessionInner, generation: u64, reason: LossReason) {
    let mut shared = inner.shared.lock().await;
    if shared.generation == generation {
        shared.last_disconnect_reason = Some(reason.as_str().to_string());
    }
}

/// Park the session in `Idle` (if this driver is still current).
async fn finish(inner: &SessionInner, generation: u64, reason: LossReason) {
    let mut shared = inner.shared.lock().await;
    if shared.generation == generation {
        shared.state = SessionState::Idle;
        shared.outgoing = None;
        shared.cancel = None;
        shared.last_disconnect_reason = Some(reason.as_str().to_string());
    }
}

/// The session driver: runs connections and reconnect backoff until the
/// session ends or is superseded.
async fn run_session(
    inner: Arc<SessionInner>,
    generation: u64,
    cancel: CancellationToken,
    mut socket: Option<WsStream>,
) {
    let mut backoff = Backoff::new(inner.config.backoff.clone());
    loop {
        let stream = match socket.take() {
            Some(stream) => stream,
            None => {
                set_state(&inner, generation, SessionState::Reconnecting).await;
                let delay = backoff.next_delay();
                debug!(delay_ms = delay.as_millis() as u64, "reconnect backoff");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        finish(&inner, generation, LossReason::Disconnected).await;
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                let address = {
                    let shared = inner.shared.lock().await;
                    shared.server_address.clone()
                };
                let Some(address) = address else {
                    finish(&inner, generation, LossReason::Disconnected).await;
                    return;
                };
                match dial(&address).await {
                    Ok(stream) => stream,
                    Err(detail) => {
                        debug!(code = "dial_failed", "reconnect attempt failed: {detail}");
                        note_loss(&inner, generation, LossReason::DialFailed).await;
                        continue;
                    }
                }
            }
        };

        match run_connection(&inner, generation, &cancel, &mut backoff, stream).await {
            ConnectionEnd::Terminal(reason) => {
                finish(&inner, generation, reason).await;
                return;
            }
            ConnectionEnd::Lost(reason) => {
                info!(code = reason.as_str(), "connection lost");
                note_loss(&inner, generation, reason).await;
                inner.emit(CasterEvent::ConnectionLost {
                    reason: reason.as_str().to_string(),
                });
                if !inner.config.auto_reconnect || cancel.is_cancelled() {
                    finish(&inner, generation, reason).await;
                    return;
                }
            }
        }
    }
}

/// One connection from hello to teardown.
async fn run_connection(
    inner: &Arc<SessionInner>,
    generation: u64,
    cancel: &CancellationToken,
    backoff: &mut Backoff,
    stream: WsStream,
) -> ConnectionEnd {
    let (client_name, display_monitor_ids, server_address) = {
        let shared = inner.shared.lock().await;
        if shared.generation != generation {
            return ConnectionEnd::Terminal(LossReason::Disconnected);
        }
        (
            shared.client_name.clone(),
            shared.display_monitor_ids.clone(),
            shared.server_address.clone().unwrap_or_default(),
        )
    };
    set_state(inner, generation, SessionState::Handshaking).await;

    let (mut sink, mut stream) = stream.split();

    let hello = Envelope::client_hello(client_name, display_monitor_ids);
    let hello_text = match encode(&hello) {
        Ok(text) => text,
        Err(e) => {
            warn!(code = e.error_code(), "failed to encode hello");
            return ConnectionEnd::Terminal(LossReason::ProtocolViolation);
        }
    };
    if sink.send(WsMessage::Text(hello_text.into())).await.is_err() {
        return ConnectionEnd::Lost(LossReason::ConnectionClosed);
    }

    // The hub must answer with server_welcome before anything else.
    let first = tokio::select! {
        _ = cancel.cancelled() => return ConnectionEnd::Terminal(LossReason::Disconnected),
        frame = tokio::time::timeout(inner.config.handshake_timeout, stream.next()) => frame,
    };
    let text = match first {
        Err(_) => return ConnectionEnd::Lost(LossReason::Timeout),
        Ok(Some(Ok(WsMessage::Text(text)))) => text,
        Ok(Some(Ok(WsMessage::Close(_))) | None) => {
            return ConnectionEnd::Lost(LossReason::ConnectionClosed);
        }
        Ok(Some(Ok(_))) => return ConnectionEnd::Terminal(LossReason::ProtocolViolation),
        Ok(Some(Err(_))) => return ConnectionEnd::Lost(LossReason::ConnectionClosed),
    };
    let (server_name, assigned_client_id) = match decode(text.as_str()) {
        Ok(Envelope::ServerWelcome { payload, .. }) => {
            (payload.server_name, payload.assigned_client_id)
        }
        Ok(other) => {
            warn!(
                tag = other.tag(),
                code = LossReason::ProtocolViolation.as_str(),
                "unexpected first frame from hub"
            );
            return ConnectionEnd::Terminal(LossReason::ProtocolViolation);
        }
        Err(e) => {
            warn!(code = e.error_code(), "undecodable first frame from hub");
            return ConnectionEnd::Terminal(LossReason::MalformedEnvelope);
        }
    };

    let (out_tx, mut out_rx) = mpsc::channel::<String>(inner.config.send_buffer);
    {
        let mut shared = inner.shared.lock().await;
        if shared.generation != generation {
            return ConnectionEnd::Terminal(LossReason::Disconnected);
        }
        shared.state = SessionState::Connected;
        shared.server_name = Some(server_name.clone());
        shared.assigned_client_id = Some(assigned_client_id.clone());
        shared.outgoing = Some(out_tx.clone());
        shared.last_disconnect_reason = None;
    }
    backoff.reset();
    info!(server = %server_name, client_id = %assigned_client_id, "connected to hub");
    inner.emit(CasterEvent::ServerWelcomeReceived {
        server_name,
        assigned_client_id,
    });
    inner.emit(CasterEvent::ConnectionEstablished { server_address });

    // Write half: drain the outgoing channel in order, then close politely.
    let mut writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.send(WsMessage::Close(None)).await;
    });

    let end = loop {
        tokio::select! {
            _ = cancel.cancelled() => break ConnectionEnd::Terminal(LossReason::Disconnected),
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    match decode(text.as_str()) {
                        Ok(envelope) => {
                            if let Some(end) =
                                handle_envelope(inner, generation, &out_tx, envelope).await
                            {
                                break end;
                            }
                        }
                        Err(e) => {
                            warn!(code = e.error_code(), "undecodable frame from hub");
                            break ConnectionEnd::Lost(LossReason::MalformedEnvelope);
                        }
                    }
                }
                // tungstenite answers transport pings itself
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {}
                Some(Ok(WsMessage::Close(_))) | None => {
                    break ConnectionEnd::Lost(LossReason::ConnectionClosed);
                }
                Some(Ok(_)) => break ConnectionEnd::Lost(LossReason::ProtocolViolation),
                Some(Err(e)) => {
                    debug!("socket error: {e}");
                    break ConnectionEnd::Lost(LossReason::ConnectionClosed);
                }
            }
        }
    };

    {
        let mut shared = inner.shared.lock().await;
        if shared.generation == generation {
            shared.outgoing = None;
        }
    }
    drop(out_tx);
    if tokio::time::timeout(Duration::from_secs(2), &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
    end
}

/// Dispatch one decoded envelope from the hub. Returns `Some(end)` when
/// the frame forces the connection down.
async fn handle_envelope(
    inner: &Arc<SessionInner>,
    generation: u64,
    out_tx: &mpsc::Sender<String>,
    envelope: Envelope,
) -> Option<ConnectionEnd> {
    match envelope {
        Envelope::MonitorListSync { payload, .. } => {
            {
                let mut shared = inner.shared.lock().await;
                if shared.generation == generation {
                    shared.mirror.replace(payload.monitors.clone());
                }
            }
            inner.emit(CasterEvent::MonitorListReceived {
                monitors: payload.monitors,
            });
            None
        }
        Envelope::MonitorAdded { payload, .. } => {
            {
                let mut shared = inner.shared.lock().await;
                if shared.generation == generation {
                    shared.mirror.add(payload.monitor.clone());
                }
            }
            inner.emit(CasterEvent::MonitorAdded {
                monitor: payload.monitor,
            });
            None
        }
        Envelope::MonitorRemoved { payload, .. } => {
            {
                let mut shared = inner.shared.lock().await;
                if shared.generation == generation {
                    shared.mirror.remove(&payload.monitor_id);
                }
            }
            inner.emit(CasterEvent::MonitorRemoved {
                monitor_id: payload.monitor_id,
            });
            None
        }
        Envelope::MonitorUpdated { payload, .. } => {
            {
                let mut shared = inner.shared.lock().await;
                if shared.generation == generation {
                    shared.mirror.update(payload.monitor.clone());
                }
            }
            inner.emit(CasterEvent::MonitorUpdated {
                monitor: payload.monitor,
            });
            None
        }
        Envelope::KanpeMessage { ref payload, .. } => {
            let envelope_id = envelope.id().to_string();
            let displayed = {
                let mut shared = inner.shared.lock().await;
                let displayed =
                    targets_match(&payload.target_monitor_ids, &shared.display_monitor_ids);
                if displayed && shared.generation == generation {
                    shared.latest = Some(LatestMessageInfo {
                        id: envelope_id.clone(),
                        content: payload.content.clone(),
                        priority: payload.priority,
                        target_monitor_ids: payload.target_monitor_ids.clone(),
                    });
                }
                displayed
            };
            inner.emit(CasterEvent::KanpeMessageReceived {
                envelope_id,
                payload: payload.clone(),
                displayed,
            });
            None
        }
        Envelope::FlashCommand { payload, .. } => {
            let displayed = {
                let shared = inner.shared.lock().await;
                targets_match(&payload.target_monitor_ids, &shared.display_monitor_ids)
            };
            inner.emit(CasterEvent::FlashReceived {
                target_monitor_ids: payload.target_monitor_ids,
                displayed,
            });
            None
        }
        Envelope::ClearCommand { payload, .. } => {
            let displayed = {
                let mut shared = inner.shared.lock().await;
                let displayed =
                    targets_match(&payload.target_monitor_ids, &shared.display_monitor_ids);
                if displayed && shared.generation == generation {
                    shared.latest = None;
                }
                displayed
            };
            inner.emit(CasterEvent::ClearReceived {
                target_monitor_ids: payload.target_monitor_ids,
                displayed,
            });
            None
        }
        Envelope::Ping { ref id, .. } => {
            if let Ok(text) = encode(&Envelope::pong_for(id)) {
                let _ = out_tx.try_send(text);
            }
            None
        }
        Envelope::Pong { .. } => None,
        Envelope::ServerWelcome { .. } => {
            debug!("duplicate welcome ignored");
            None
        }
        other => {
            warn!(
                tag = other.tag(),
                code = LossReason::ProtocolViolation.as_str(),
                "unexpected frame from hub"
            );
            Some(ConnectionEnd::Lost(LossReason::ProtocolViolation))
        }
    }
}
