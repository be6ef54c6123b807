//! In-process mock of the notification/incident service and the live feed

#![allow(dead_code)]

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted feed connection: messages to send, then close or hold open
#[derive(Debug, Clone)]
pub struct FeedScript {
    pub messages: Vec<Message>,
    pub close_after: bool,
}

#[derive(Default)]
pub struct MockState {
    pub pending: Vec<Value>,
    pub acks: Vec<String>,
    pub history: Vec<Value>,
    pub history_queries: Vec<HashMap<String, String>>,
    pub incidents: Vec<Value>,
    pub files: HashMap<String, Vec<u8>>,
    /// Scripts for successive feed connections; the last one repeats
    pub feed_scripts: Vec<FeedScript>,
    pub feed_connections: usize,
    pub fail_acks: bool,
}

pub type Shared = Arc<Mutex<MockState>>;

/// Start the mock service; returns (http base url, ws feed url, state)
pub async fn spawn_server(state: MockState) -> (String, String, Shared) {
    let shared: Shared = Arc::new(Mutex::new(state));

    let app = Router::new()
        .route("/api/notifications/pending", get(pending))
        .route("/api/notifications/:id/acknowledge", post(acknowledge))
        .route("/api/notifications/history", get(history))
        .route("/api/incidents", get(incidents))
        .route("/api/incidents/files/:name", get(incident_file))
        .route("/api/incidents/:id", get(incident))
        .route("/feed", get(feed))
        .with_state(shared.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (
        format!("http://{}", addr),
        format!("ws://{}/feed", addr),
        shared,
    )
}

async fn pending(State(state): State<Shared>) -> Json<Vec<Value>> {
    Json(state.lock().unwrap().pending.clone())
}

async fn acknowledge(State(state): State<Shared>, Path(id): Path<String>) -> StatusCode {
    let mut state = state.lock().unwrap();
    if state.fail_acks {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    if state.acks.contains(&id) {
        return StatusCode::CONFLICT;
    }
    let before = state.pending.len();
    state.pending.retain(|n| n["id"] != id.as_str());
    if state.pending.len() == before {
        return StatusCode::NOT_FOUND;
    }
    state.acks.push(id);
    StatusCode::OK
}

async fn history(
    State(state): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let mut state = state.lock().unwrap();
    state.history_queries.push(params);
    Json(json!({
        "notifications": state.history.clone(),
        "total": state.history.len(),
    }))
}

async fn incidents(State(state): State<Shared>) -> Json<Vec<Value>> {
    Json(state.lock().unwrap().incidents.clone())
}

async fn incident(State(state): State<Shared>, Path(id): Path<String>) -> impl IntoResponse {
    let state = state.lock().unwrap();
    match state.incidents.iter().find(|i| i["uuid"] == id.as_str()) {
        Some(found) => (StatusCode::OK, Json(found.clone())).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn incident_file(State(state): State<Shared>, Path(name): Path<String>) -> impl IntoResponse {
    match state.lock().unwrap().files.get(&name) {
        Some(bytes) => (StatusCode::OK, bytes.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn feed(ws: WebSocketUpgrade, State(state): State<Shared>) -> impl IntoResponse {
    let script = {
        let mut state = state.lock().unwrap();
        let index = state.feed_connections.min(state.feed_scripts.len().saturating_sub(1));
        state.feed_connections += 1;
        state.feed_scripts.get(index).cloned()
    };
    ws.on_upgrade(move |socket| run_feed(socket, script))
}

async fn run_feed(mut socket: WebSocket, script: Option<FeedScript>) {
    let Some(script) = script else {
        return;
    };
    for message in script.messages {
        if socket.send(message).await.is_err() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    if script.close_after {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    // Hold the connection open until the client leaves
    while let Some(Ok(_)) = socket.recv().await {}
}

/// A tiny PNG
pub fn png_bytes() -> Vec<u8> {
    let mut out = Vec::new();
    image::DynamicImage::new_rgb8(2, 2)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

/// JSON `video_frame` message
pub fn frame_text(frame_number: u64, incident: bool) -> Message {
    let frame = base64::engine::general_purpose::STANDARD.encode(png_bytes());
    Message::Text(
        json!({
            "event": "video_frame",
            "data": {
                "frame": frame,
                "timestamp": 1_700_000_000_000i64 + frame_number as i64,
                "frame_number": frame_number,
                "quality": 80,
                "incident_detected": incident,
            }
        })
        .to_string(),
    )
}

pub fn notification_json(id: &str, kind: &str, acknowledged: bool) -> Value {
    json!({
        "id": id,
        "type": kind,
        "timestamp": 1_700_000_000,
        "acknowledged": acknowledged,
        "ack_time": if acknowledged { json!("2024-01-01T00:00:00Z") } else { Value::Null },
        "data": { "message": format!("{} detected", kind), "severity": "high" },
    })
}

/// Poll `check` until it holds or a few seconds pass
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
