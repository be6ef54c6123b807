//! Live feed end to end: WebSocket feed -> sequencer -> render loop, plus alert events

mod common;

use async_trait::async_trait;
use axum::extract::ws::Message;
use common::{frame_text, notification_json, spawn_server, wait_until, FeedScript, MockState};
use safewatch_client::alert_channel::{AlertChannel, NotificationClient};
use safewatch_client::alert_store::AlertStateStore;
use safewatch_client::frame_channel::codec::encode_binary;
use safewatch_client::frame_channel::{
    ChannelEvent, ChannelOptions, ConnectionState, FrameChannel, WsTransport,
};
use safewatch_client::frame_sequencer::FrameQueue;
use safewatch_client::models::AlertKind;
use safewatch_client::render_scheduler::{DecodedFrame, ImageDecoder, RenderScheduler, RenderSurface};
use safewatch_client::Result;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct RecordingSurface {
    painted: Mutex<Vec<u64>>,
}

#[async_trait]
impl RenderSurface for RecordingSurface {
    async fn paint(&self, frame: DecodedFrame) -> Result<()> {
        self.painted.lock().unwrap().push(frame.sequence_number);
        Ok(())
    }

    async fn clear(&self) {}
}

fn fast_options(max_attempts: u32) -> ChannelOptions {
    ChannelOptions {
        max_reconnect_attempts: max_attempts,
        initial_backoff: Duration::from_millis(20),
        max_backoff: Duration::from_millis(50),
        handshake_timeout: Duration::from_secs(2),
    }
}

#[tokio::test]
async fn test_frames_render_in_order_over_websocket() {
    let messages = vec![
        frame_text(1, false),
        frame_text(2, false),
        frame_text(2, false),
        frame_text(1, false),
        Message::Binary(encode_binary(3, 1_700_000_000_003, false, None, &common::png_bytes())),
    ];
    let (_, feed_url, _) = spawn_server(MockState {
        feed_scripts: vec![FeedScript {
            messages,
            close_after: false,
        }],
        ..Default::default()
    })
    .await;

    let queue = Arc::new(FrameQueue::new(8));
    let surface = Arc::new(RecordingSurface::default());
    let renderer = Arc::new(RenderScheduler::new(queue.clone(), Arc::new(ImageDecoder), surface.clone()));
    renderer.start().await;

    let channel = FrameChannel::new(Arc::new(WsTransport::new()), queue.clone(), fast_options(3));
    channel.open(&feed_url).await;

    let done = wait_until(|| {
        let surface = surface.clone();
        async move { surface.painted.lock().unwrap().len() >= 3 }
    })
    .await;
    assert!(done, "frames were not rendered");

    assert_eq!(*surface.painted.lock().unwrap(), vec![1, 2, 3]);
    assert_eq!(channel.state(), ConnectionState::Connected);
    assert_eq!(queue.stats().await.rejected_stale, 2);

    channel.close().await;
    renderer.stop().await;
}

#[tokio::test]
async fn test_reconnect_resets_sequencing() {
    let (_, feed_url, shared) = spawn_server(MockState {
        feed_scripts: vec![
            FeedScript {
                messages: vec![frame_text(10, false), frame_text(11, false)],
                close_after: true,
            },
            FeedScript {
                messages: vec![frame_text(1, false)],
                close_after: false,
            },
        ],
        ..Default::default()
    })
    .await;

    // No render loop: frames stay buffered so the reset is observable
    let queue = Arc::new(FrameQueue::new(4));
    let channel = FrameChannel::new(Arc::new(WsTransport::new()), queue.clone(), fast_options(3));
    let mut events = channel.subscribe();
    channel.open(&feed_url).await;

    let reconnected = wait_until(|| {
        let queue = queue.clone();
        async move { queue.buffered_sequences().await == vec![1] }
    })
    .await;
    assert!(reconnected, "source restarting at 1 should be admitted after reconnect");
    assert_eq!(shared.lock().unwrap().feed_connections, 2);

    let mut saw_disconnect = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, ChannelEvent::Disconnected { .. }) {
            saw_disconnect = true;
        }
    }
    assert!(saw_disconnect);

    channel.close().await;
}

#[tokio::test]
async fn test_unreachable_feed_becomes_terminal() {
    let queue = Arc::new(FrameQueue::default());
    let channel = FrameChannel::new(Arc::new(WsTransport::new()), queue, fast_options(2));
    let mut events = channel.subscribe();

    channel.open("ws://127.0.0.1:1/feed").await;

    let fatal = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(ChannelEvent::Error(error)) if error.fatal => return error,
                Ok(_) => continue,
                Err(e) => panic!("event stream ended: {}", e),
            }
        }
    })
    .await
    .expect("no fatal error reported");

    assert!(fatal.detail.contains("2 attempts"), "detail: {}", fatal.detail);
    assert_eq!(channel.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_push_alerts_and_incidents_reach_store() {
    let messages = vec![
        Message::Text(json!({ "event": "notification", "data": notification_json("n1", "fall_alert", false) }).to_string()),
        Message::Text(json!({ "event": "incident", "data": { "timestamp": 500, "message": "Fire near exit" } }).to_string()),
        Message::Text("{ not json".to_string()),
        frame_text(7, true),
    ];
    let (base, feed_url, _) = spawn_server(MockState {
        pending: vec![notification_json("n1", "fall_alert", false)],
        feed_scripts: vec![FeedScript {
            messages,
            close_after: false,
        }],
        ..Default::default()
    })
    .await;

    let store = Arc::new(AlertStateStore::default());
    let alerts = Arc::new(AlertChannel::new(
        Arc::new(NotificationClient::new(base).unwrap()),
        store.clone(),
        Duration::from_millis(100),
    ));

    let queue = Arc::new(FrameQueue::default());
    let channel = FrameChannel::new(Arc::new(WsTransport::new()), queue.clone(), fast_options(3));
    alerts.attach_feed(channel.subscribe()).await;
    alerts.attach_incidents(queue.subscribe_incidents()).await;
    alerts.start_polling().await;
    channel.open(&feed_url).await;

    let all_arrived = wait_until(|| {
        let store = store.clone();
        async move { store.pending_count().await == 3 }
    })
    .await;
    assert!(all_arrived, "pending: {:?}", store.list_pending().await);

    // Push + poll copies of n1 merged into one entry
    let pending = store.list_pending().await;
    assert_eq!(pending.iter().filter(|a| a.id == "n1").count(), 1);

    let fire = store.get("incident-500").await.unwrap();
    assert_eq!(fire.kind, AlertKind::FireAlert);
    assert!(store.get("incident-1700000000007").await.is_some());

    // Malformed message did not drop the connection
    assert_eq!(channel.state(), ConnectionState::Connected);

    alerts.stop().await;
    channel.close().await;
}
