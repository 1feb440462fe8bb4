//! Feedback intake and keepalive behavior.

mod support;

use std::time::Duration;

use kanpe_hub::{Hub, HubConfig, HubEvent};
use kanpe_protocol::{Envelope, FeedbackType, Priority};

use support::{TestCaster, quiet_config, wait_for_event};

#[tokio::test]
async fn feedback_surfaces_to_events_and_history() {
    let hub = Hub::new(quiet_config());
    let mut events = hub.subscribe();
    let port = hub.start(0).await.unwrap();

    let mut caster = TestCaster::connect(port, "Alice", &[]).await;
    caster.handshake().await;

    let kanpe = hub
        .send_kanpe(vec!["ALL".into()], "Places".into(), Priority::Normal)
        .await
        .unwrap();
    caster.recv().await;

    caster
        .send(&Envelope::feedback(
            "OK".into(),
            "Alice".into(),
            kanpe.id().to_string(),
            FeedbackType::Ack,
        ))
        .await;

    let event = wait_for_event(&mut events, |e| {
        matches!(e, HubEvent::FeedbackReceived { .. })
    })
    .await;
    match event {
        HubEvent::FeedbackReceived { payload, .. } => {
            assert_eq!(payload.content, "OK");
            assert_eq!(payload.client_name, "Alice");
            assert_eq!(payload.reply_to_message_id, kanpe.id());
            assert_eq!(payload.feedback_type, FeedbackType::Ack);
        }
        _ => unreachable!(),
    }

    let history = hub.history_feedback().await;
    assert_eq!(history.len(), 1);

    hub.stop().await.unwrap();
}

#[tokio::test]
async fn feedback_is_not_rebroadcast() {
    let hub = Hub::new(quiet_config());
    let port = hub.start(0).await.unwrap();

    let mut sender = TestCaster::connect(port, "Sender", &[]).await;
    sender.handshake().await;
    let mut observer = TestCaster::connect(port, "Observer", &[]).await;
    observer.handshake().await;

    sender
        .send(&Envelope::feedback(
            "psst".into(),
            "Sender".into(),
            String::new(),
            FeedbackType::Info,
        ))
        .await;

    // A fence directive proves the observer's stream stayed clean.
    let fence = hub
        .send_kanpe(vec!["ALL".into()], "fence".into(), Priority::Normal)
        .await
        .unwrap();
    assert_eq!(observer.recv().await.id(), fence.id());

    hub.stop().await.unwrap();
}

#[tokio::test]
async fn inbound_ping_is_answered_with_matching_pong() {
    let hub = Hub::new(quiet_config());
    let port = hub.start(0).await.unwrap();

    let mut caster = TestCaster::connect(port, "C", &[]).await;
    caster.handshake().await;

    let ping = Envelope::ping();
    caster.send(&ping).await;
    match caster.recv().await {
        Envelope::Pong { id, .. } => assert_eq!(id, ping.id()),
        other => panic!("expected pong, got {}", other.tag()),
    }

    hub.stop().await.unwrap();
}

#[tokio::test]
async fn silent_caster_is_timed_out() {
    let config = HubConfig {
        ping_interval: Duration::from_millis(100),
        keepalive_timeout: Duration::from_millis(300),
        ..HubConfig::default()
    };
    let hub = Hub::new(config);
    let mut events = hub.subscribe();
    let port = hub.start(0).await.unwrap();

    // Handshake, then go quiet: protocol pings go unanswered.
    let mut caster = TestCaster::connect(port, "Sleepy", &[]).await;
    caster.handshake().await;

    let event = wait_for_event(&mut events, |e| {
        matches!(e, HubEvent::ClientDisconnected { .. })
    })
    .await;
    match event {
        HubEvent::ClientDisconnected { reason, .. } => assert_eq!(reason, "timeout"),
        _ => unreachable!(),
    }
    caster.expect_close().await;

    hub.stop().await.unwrap();
}

#[tokio::test]
async fn answering_pings_keeps_the_connection_alive() {
    let config = HubConfig {
        ping_interval: Duration::from_millis(100),
        keepalive_timeout: Duration::from_millis(400),
        ..HubConfig::default()
    };
    let hub = Hub::new(config);
    let port = hub.start(0).await.unwrap();

    let mut caster = TestCaster::connect(port, "Prompt", &[]).await;
    caster.handshake().await;

    // Answer every probe for a full second — several timeout windows.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while tokio::time::Instant::now() < deadline {
        if let Envelope::Ping { id, .. } = caster.recv().await {
            caster.send(&Envelope::pong_for(&id)).await;
        }
    }
    assert_eq!(hub.list_clients().await.len(), 1);

    hub.stop().await.unwrap();
}
