//! The loopback WebSocket server behind the control API.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kanpe_caster::CasterSession;

use crate::protocol::{BridgeRequest, BridgeResponse};

/// Errors from bridge lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("failed to bind loopback port {port}: {source}")]
    BindFailed {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

impl BridgeError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BindFailed { .. } => "bind_failed",
        }
    }
}

/// Point-in-time bridge state for the status surface.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BridgeStatus {
    pub running: bool,
    pub port: u16,
}

struct BridgeState {
    session: CasterSession,
}

/// A running control API server. Dropping it without `stop` leaves the
/// listener task to die with the runtime; prefer `stop`.
pub struct BridgeServer {
    port: u16,
    shutdown: CancellationToken,
    serve_task: JoinHandle<()>,
}

impl BridgeServer {
    /// Bind `127.0.0.1:<port>` and serve the control API for `session`.
    /// Pass port 0 for an ephemeral port.
    pub async fn start(port: u16, session: CasterSession) -> Result<Self, BridgeError> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|source| BridgeError::BindFailed { port, source })?;
        let bound_port = listener
            .local_addr()
            .map_err(|source| BridgeError::BindFailed { port, source })?
            .port();

        let state = Arc::new(BridgeState { session });
        let app = Router::new()
            .route("/ws", get(ws_handler))
            .with_state(state);

        let shutdown = CancellationToken::new();
        let serve_shutdown = shutdown.clone();
        let serve_task = tokio::spawn(async move {
            if let Err(e) = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(serve_shutdown.cancelled_owned())
            .await
            {
                warn!("bridge listener error: {e}");
            }
        });

        info!(port = bound_port, "control bridge listening");
        Ok(Self {
            port: bound_port,
            shutdown,
            serve_task,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn status(&self) -> BridgeStatus {
        BridgeStatus {
            running: true,
            port: self.port,
        }
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.serve_task.await;
        info!(port = self.port, "control bridge stopped");
    }
}

async fn ws_handler(
    State(state): State<Arc<BridgeState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    // The listener is loopback-bound already; this guards against exotic
    // forwarding setups putting a remote peer on the socket.
    if !peer.ip().is_loopback() {
        warn!(peer = %peer, "refusing non-loopback bridge peer");
        return StatusCode::FORBIDDEN.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<BridgeState>) {
    debug!("bridge client connected");
    let (mut sink, mut stream) = socket.split();

    while let Some(frame) = stream.next().await {
        let response = match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<BridgeRequest>(&text) {
                Ok(request) => handle_request(&state.session, request).await,
                Err(e) => {
                    debug!("malformed bridge request: {e}");
                    BridgeResponse::error("malformed request")
                }
            },
            Ok(Message::Close(_)) | Err(_) => break,
            // The bridge is a local convenience surface; stray frame kinds
            // get an error result instead of a close.
            Ok(_) => BridgeResponse::error("expected a text frame"),
        };
        let json = match serde_json::to_string(&response) {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to serialize bridge response: {e}");
                continue;
            }
        };
        if sink.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }
    debug!("bridge client disconnected");
}

async fn handle_request(session: &CasterSession, request: BridgeRequest) -> BridgeResponse {
    match request {
        BridgeRequest::SendFeedback {
            content,
            feedback_type,
        } => {
            if content.trim().is_empty() {
                return BridgeResponse::error("feedback content is empty");
            }
            let client_name = session.client_name().await;
            match session
                .send_feedback(content, client_name, String::new(), feedback_type)
                .await
            {
                Ok(_) => BridgeResponse::ok(),
                Err(e) => BridgeResponse::error(e.error_code()),
            }
        }
        BridgeRequest::ReactToLatest { feedback_type } => {
            let client_name = session.client_name().await;
            // Empty content and reply id when nothing has been displayed yet.
            let (content, reply_to) = match session.latest_message().await {
                Some(latest) => (latest.content, latest.id),
                None => (String::new(), String::new()),
            };
            match session
                .send_feedback(content, client_name, reply_to, feedback_type)
                .await
            {
                Ok(_) => BridgeResponse::ok(),
                Err(e) => BridgeResponse::error(e.error_code()),
            }
        }
        BridgeRequest::GetState => BridgeResponse::StateUpdate {
            connected: session.is_connected().await,
            latest_message: session.latest_message().await,
            monitors: session.monitors().await,
        },
    }
}
