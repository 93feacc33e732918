//! In-process mock transcription service.
//!
//! Speaks the recognize WebSocket protocol: acknowledges the start control
//! message with `{"state": "listening"}`, counts binary audio frames, and
//! plays back a scripted [`Scenario`]: replies pinned to audio-frame
//! arrival, replies to the stop control message, an optional stop
//! confirmation, and optional handshake rejections for exercising the token
//! refresh path.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message;

// =============================================================================
// Scripted behavior
// =============================================================================

/// What the mock service does over the lifetime of each connection.
#[derive(Clone, Default)]
pub struct Scenario {
    /// Reject this many connection handshakes with HTTP 401 before
    /// accepting (shared across connections).
    pub reject_handshakes: u32,
    /// Text replies sent immediately after the n-th audio frame (1-based).
    pub replies_on_audio: Vec<(u64, String)>,
    /// Text replies sent after the stop control message arrives.
    pub replies_on_stop: Vec<String>,
    /// Send a `listening` state message confirming the stop.
    pub confirm_stop: bool,
    /// Send a close frame once the stop exchange finishes.
    pub close_after_stop: bool,
}

impl Scenario {
    /// The common happy path: confirm stops and close afterwards.
    pub fn cooperative() -> Self {
        Self {
            confirm_stop: true,
            close_after_stop: true,
            ..Default::default()
        }
    }
}

// =============================================================================
// Observed traffic
// =============================================================================

/// Counters and captures for test assertions.
#[derive(Default)]
pub struct MockState {
    pub connections: AtomicU32,
    pub rejected_handshakes: AtomicU32,
    pub audio_frames: AtomicU32,
    pub audio_bytes: AtomicU64,
    pub stop_received: AtomicBool,
    pub start_messages: Mutex<Vec<serde_json::Value>>,
}

/// A running mock service.
pub struct MockService {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockService {
    /// The `host:port` string to build a plaintext endpoint from.
    pub fn host(&self) -> String {
        self.addr.to_string()
    }
}

// =============================================================================
// Server
// =============================================================================

/// Spawn the mock service in the background.
pub async fn spawn(scenario: Scenario) -> MockService {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(MockState::default());
    let rejections = Arc::new(AtomicU32::new(scenario.reject_handshakes));

    let accept_state = state.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let scenario = scenario.clone();
            let state = accept_state.clone();
            let rejections = rejections.clone();
            tokio::spawn(async move {
                handle_connection(stream, scenario, state, rejections).await;
            });
        }
    });

    MockService { addr, state }
}

async fn handle_connection(
    stream: TcpStream,
    scenario: Scenario,
    state: Arc<MockState>,
    rejections: Arc<AtomicU32>,
) {
    let reject = rejections
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok();
    if reject {
        state.rejected_handshakes.fetch_add(1, Ordering::Relaxed);
    }

    let callback = move |_req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        if reject {
            let denial = tokio_tungstenite::tungstenite::http::Response::builder()
                .status(401)
                .body(Some("unauthorized".to_string()))
                .unwrap();
            Err(denial)
        } else {
            Ok(resp)
        }
    };

    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };
    state.connections.fetch_add(1, Ordering::Relaxed);

    let (mut sink, mut inbound) = ws.split();
    let mut audio_count: u64 = 0;

    while let Some(Ok(message)) = inbound.next().await {
        match message {
            Message::Text(text) => {
                let value: serde_json::Value =
                    serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);
                match value.get("action").and_then(|a| a.as_str()) {
                    Some("start") => {
                        state.start_messages.lock().unwrap().push(value);
                        if sink.send(Message::Text(listening().into())).await.is_err() {
                            return;
                        }
                    }
                    Some("stop") => {
                        state.stop_received.store(true, Ordering::Release);
                        for reply in &scenario.replies_on_stop {
                            if sink.send(Message::Text(reply.clone().into())).await.is_err() {
                                return;
                            }
                        }
                        if scenario.confirm_stop
                            && sink.send(Message::Text(listening().into())).await.is_err()
                        {
                            return;
                        }
                        if scenario.close_after_stop {
                            let _ = sink.send(Message::Close(None)).await;
                            return;
                        }
                        // Otherwise stay silent; the client's timeout takes
                        // over.
                    }
                    _ => {}
                }
            }
            Message::Binary(data) => {
                audio_count += 1;
                state.audio_frames.fetch_add(1, Ordering::Relaxed);
                state
                    .audio_bytes
                    .fetch_add(data.len() as u64, Ordering::Relaxed);
                for (at, reply) in &scenario.replies_on_audio {
                    if *at == audio_count
                        && sink.send(Message::Text(reply.clone().into())).await.is_err()
                    {
                        return;
                    }
                }
            }
            Message::Close(_) => return,
            Message::Ping(payload) => {
                let _ = sink.send(Message::Pong(payload)).await;
            }
            _ => {}
        }
    }
}

// =============================================================================
// Message builders
// =============================================================================

/// `{"state": "listening"}`.
pub fn listening() -> String {
    json!({"state": "listening"}).to_string()
}

/// An interim result carrying one hypothesis without confidence.
pub fn interim(transcript: &str) -> String {
    json!({
        "results": [
            {"final": false, "alternatives": [{"transcript": transcript}]}
        ],
        "result_index": 0
    })
    .to_string()
}

/// A final result with a confidence score.
pub fn final_result(transcript: &str, confidence: f64) -> String {
    json!({
        "results": [
            {
                "final": true,
                "alternatives": [{"transcript": transcript, "confidence": confidence}]
            }
        ],
        "result_index": 0
    })
    .to_string()
}

/// A service-reported error payload.
pub fn service_error(message: &str, code: i32) -> String {
    json!({"error": message, "code": code}).to_string()
}
