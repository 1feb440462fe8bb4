#![allow(dead_code)]
//! Shared plumbing for hub integration tests: a quiet hub config and a
//! bare-bones caster speaking the wire protocol over tokio-tungstenite.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use kanpe_hub::{HubConfig, HubEvent};
use kanpe_protocol::{Envelope, decode, encode};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Hub config with keepalive pushed out of the way so test streams only
/// carry the frames the test sends.
pub fn quiet_config() -> HubConfig {
    HubConfig {
        ping_interval: Duration::from_secs(3600),
        keepalive_timeout: Duration::from_secs(7200),
        ..HubConfig::default()
    }
}

/// A raw wire-level caster for driving the hub from tests.
pub struct TestCaster {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestCaster {
    /// Open a socket without sending anything.
    pub async fn dial(port: u16) -> Self {
        let (stream, _) = tokio::time::timeout(
            TEST_TIMEOUT,
            connect_async(format!("ws://127.0.0.1:{port}/ws")),
        )
        .await
        .expect("dial timed out")
        .expect("dial failed");
        Self { stream }
    }

    /// Dial and introduce ourselves; the handshake reply is left unread.
    pub async fn connect(port: u16, name: &str, display: &[&str]) -> Self {
        let mut caster = Self::dial(port).await;
        let display = display.iter().map(|s| s.to_string()).collect();
        caster
            .send(&Envelope::client_hello(name.to_string(), display))
            .await;
        caster
    }

    pub async fn send(&mut self, envelope: &Envelope) {
        let text = encode(envelope).expect("encode failed");
        self.send_text(&text).await;
    }

    pub async fn send_text(&mut self, text: &str) {
        self.stream
            .send(WsMessage::Text(text.to_string().into()))
            .await
            .expect("send failed");
    }

    /// Next protocol envelope, skipping transport-level keepalives.
    pub async fn recv(&mut self) -> Envelope {
        loop {
            let frame = tokio::time::timeout(TEST_TIMEOUT, self.stream.next())
                .await
                .expect("recv timed out")
                .expect("stream ended")
                .expect("socket error");
            match frame {
                WsMessage::Text(text) => return decode(text.as_str()).expect("bad frame"),
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    /// Consume the welcome + registry sync pair every accepted connection
    /// starts with.
    pub async fn handshake(&mut self) -> (Envelope, Envelope) {
        let welcome = self.recv().await;
        let sync = self.recv().await;
        (welcome, sync)
    }

    /// Wait for the server to close the connection, tolerating any frames
    /// queued ahead of the close.
    pub async fn expect_close(&mut self) {
        loop {
            match tokio::time::timeout(TEST_TIMEOUT, self.stream.next())
                .await
                .expect("close timed out")
            {
                Some(Ok(WsMessage::Close(_))) | None => return,
                Some(Ok(_)) => continue,
                Some(Err(_)) => return,
            }
        }
    }
}

/// Next hub event, bounded by the test timeout.
pub async fn next_event(rx: &mut broadcast::Receiver<HubEvent>) -> HubEvent {
    tokio::time::timeout(TEST_TIMEOUT, rx.recv())
        .await
        .expect("event timed out")
        .expect("event channel closed")
}

/// Drain events until one matches, bounded by the test timeout.
pub async fn wait_for_event<F>(rx: &mut broadcast::Receiver<HubEvent>, mut matches: F) -> HubEvent
where
    F: FnMut(&HubEvent) -> bool,
{
    loop {
        let event = next_event(rx).await;
        if matches(&event) {
            return event;
        }
    }
}
