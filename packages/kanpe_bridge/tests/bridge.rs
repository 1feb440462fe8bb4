//! Control API end-to-end: a real hub, a real caster session, and a raw
//! WebSocket bridge client on loopback.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use kanpe_bridge::{BridgeRequest, BridgeResponse, BridgeServer};
use kanpe_caster::{CasterSession, SessionConfig};
use kanpe_hub::{Hub, HubConfig, HubEvent};
use kanpe_protocol::{FeedbackType, Priority};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

fn quiet_hub() -> HubConfig {
    HubConfig {
        ping_interval: Duration::from_secs(3600),
        keepalive_timeout: Duration::from_secs(7200),
        ..HubConfig::default()
    }
}

struct BridgeClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl BridgeClient {
    async fn connect(port: u16) -> Self {
        let (stream, _) = tokio::time::timeout(
            TEST_TIMEOUT,
            connect_async(format!("ws://127.0.0.1:{port}/ws")),
        )
        .await
        .expect("dial timed out")
        .expect("dial failed");
        Self { stream }
    }

    async fn request(&mut self, request: &BridgeRequest) -> BridgeResponse {
        let json = serde_json::to_string(request).expect("encode failed");
        self.send_text(&json).await
    }

    async fn send_text(&mut self, text: &str) -> BridgeResponse {
        self.stream
            .send(WsMessage::Text(text.to_string().into()))
            .await
            .expect("send failed");
        loop {
            let frame = tokio::time::timeout(TEST_TIMEOUT, self.stream.next())
                .await
                .expect("response timed out")
                .expect("stream ended")
                .expect("socket error");
            match frame {
                WsMessage::Text(text) => {
                    return serde_json::from_str(text.as_str()).expect("bad response");
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }
}

/// Hub + connected caster session, ready for bridging.
async fn connected_pair() -> (Hub, CasterSession) {
    let hub = Hub::new(quiet_hub());
    hub.add_monitor("Host".into(), None, None).await.unwrap();
    let port = hub.start(0).await.unwrap();

    let session = CasterSession::new(SessionConfig::default());
    session
        .connect(format!("127.0.0.1:{port}"), "Deck", vec![])
        .await
        .unwrap();
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while !session.is_connected().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "session never connected"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    (hub, session)
}

#[tokio::test]
async fn get_state_reflects_the_live_session() {
    let (hub, session) = connected_pair().await;
    let bridge = BridgeServer::start(0, session.clone()).await.unwrap();

    let mut client = BridgeClient::connect(bridge.port()).await;
    match client.request(&BridgeRequest::GetState).await {
        BridgeResponse::StateUpdate {
            connected,
            latest_message,
            monitors,
        } => {
            assert!(connected);
            assert!(latest_message.is_none());
            assert_eq!(monitors.len(), 1);
            assert_eq!(monitors[0].name, "Host");
        }
        other => panic!("expected state_update, got {other:?}"),
    }

    bridge.stop().await;
    session.disconnect().await;
    hub.stop().await.unwrap();
}

#[tokio::test]
async fn send_feedback_uses_the_bound_client_name() {
    let (hub, session) = connected_pair().await;
    let mut hub_events = hub.subscribe();
    let bridge = BridgeServer::start(0, session.clone()).await.unwrap();

    let mut client = BridgeClient::connect(bridge.port()).await;
    let response = client
        .request(&BridgeRequest::SendFeedback {
            content: "mic is hot".into(),
            feedback_type: FeedbackType::Issue,
        })
        .await;
    assert!(matches!(
        response,
        BridgeResponse::Result { success: true, .. }
    ));

    loop {
        match tokio::time::timeout(TEST_TIMEOUT, hub_events.recv())
            .await
            .expect("hub event timed out")
            .expect("hub event channel closed")
        {
            HubEvent::FeedbackReceived { payload, .. } => {
                assert_eq!(payload.content, "mic is hot");
                assert_eq!(payload.client_name, "Deck");
                assert_eq!(payload.feedback_type, FeedbackType::Issue);
                assert_eq!(payload.reply_to_message_id, "");
                break;
            }
            _ => continue,
        }
    }

    bridge.stop().await;
    session.disconnect().await;
    hub.stop().await.unwrap();
}

#[tokio::test]
async fn react_to_latest_replies_to_the_displayed_kanpe() {
    let (hub, session) = connected_pair().await;
    let mut hub_events = hub.subscribe();
    let bridge = BridgeServer::start(0, session.clone()).await.unwrap();

    let kanpe = hub
        .send_kanpe(vec!["ALL".into()], "Smile".into(), Priority::High)
        .await
        .unwrap();
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while session.latest_message().await.is_none() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "kanpe never reached the session"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mut client = BridgeClient::connect(bridge.port()).await;
    let response = client
        .request(&BridgeRequest::ReactToLatest {
            feedback_type: FeedbackType::Ack,
        })
        .await;
    assert!(matches!(
        response,
        BridgeResponse::Result { success: true, .. }
    ));

    loop {
        match tokio::time::timeout(TEST_TIMEOUT, hub_events.recv())
            .await
            .expect("hub event timed out")
            .expect("hub event channel closed")
        {
            HubEvent::FeedbackReceived { payload, .. } => {
                assert_eq!(payload.reply_to_message_id, kanpe.id());
                assert_eq!(payload.content, "Smile");
                assert_eq!(payload.feedback_type, FeedbackType::Ack);
                break;
            }
            _ => continue,
        }
    }

    bridge.stop().await;
    session.disconnect().await;
    hub.stop().await.unwrap();
}

#[tokio::test]
async fn feedback_while_disconnected_is_refused() {
    let session = CasterSession::new(SessionConfig::default());
    let bridge = BridgeServer::start(0, session.clone()).await.unwrap();

    let mut client = BridgeClient::connect(bridge.port()).await;
    match client
        .request(&BridgeRequest::SendFeedback {
            content: "hello?".into(),
            feedback_type: FeedbackType::Info,
        })
        .await
    {
        BridgeResponse::Result { success, error } => {
            assert!(!success);
            assert_eq!(error.as_deref(), Some("not_connected"));
        }
        other => panic!("expected result, got {other:?}"),
    }

    // get_state still answers, reporting the disconnected session.
    match client.request(&BridgeRequest::GetState).await {
        BridgeResponse::StateUpdate { connected, .. } => assert!(!connected),
        other => panic!("expected state_update, got {other:?}"),
    }

    bridge.stop().await;
}

#[tokio::test]
async fn malformed_and_empty_requests_get_error_results() {
    let session = CasterSession::new(SessionConfig::default());
    let bridge = BridgeServer::start(0, session.clone()).await.unwrap();

    let mut client = BridgeClient::connect(bridge.port()).await;
    match client.send_text("{\"type\":\"reboot\"}").await {
        BridgeResponse::Result { success, .. } => assert!(!success),
        other => panic!("expected result, got {other:?}"),
    }
    match client
        .request(&BridgeRequest::SendFeedback {
            content: "   ".into(),
            feedback_type: FeedbackType::Ack,
        })
        .await
    {
        BridgeResponse::Result { success, error } => {
            assert!(!success);
            assert!(error.is_some());
        }
        other => panic!("expected result, got {other:?}"),
    }

    bridge.stop().await;
}
