//! Session control-surface tests.
//!
//! Protocol scenarios against a scripted service live in the integration
//! suite (`tests/session_tests.rs`); these tests cover activation rules,
//! terminal-state behavior, and failure delivery through the completion
//! callback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::client::{CompletionCallback, Session, SessionState};
use super::config::{RecognitionSettings, ServiceEndpoint};
use super::messages::FinalResult;
use crate::core::audio::{AudioSource, CaptureDevice, ChunkSink};
use crate::core::auth::{Credentials, TokenManager};
use crate::errors::{TranscribeError, TranscribeResult};

// =============================================================================
// Helpers
// =============================================================================

type Outcome = TranscribeResult<Vec<FinalResult>>;

fn completion_probe() -> (CompletionCallback, mpsc::UnboundedReceiver<Outcome>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: CompletionCallback = Box::new(move |outcome| {
        Box::pin(async move {
            let _ = tx.send(outcome);
        })
    });
    (callback, rx)
}

async fn token_endpoint() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("unit-test-token"))
        .mount(&server)
        .await;
    server
}

fn manager_for(server: &MockServer) -> Arc<TokenManager> {
    Arc::new(
        TokenManager::new(
            Credentials::Basic {
                username: "user".to_string(),
                password: "pass".to_string(),
            },
            format!("{}/api/v1/token", server.uri()),
        )
        .unwrap(),
    )
}

/// A service that acknowledges the start message and then never responds
/// again, not even to the stop control message.
async fn spawn_silent_service() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                let (mut sink, mut stream) = ws.split();
                let mut acknowledged = false;
                while let Some(Ok(msg)) = stream.next().await {
                    if msg.is_text() && !acknowledged {
                        acknowledged = true;
                        let _ = sink
                            .send(Message::Text(r#"{"state": "listening"}"#.into()))
                            .await;
                    }
                }
            });
        }
    });
    addr
}

/// A live device that produces nothing but keeps the chunk queue open until
/// stopped, pinning the session in `Streaming`.
struct HeldDevice {
    id: String,
    sink: Option<ChunkSink>,
}

impl HeldDevice {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            sink: None,
        }
    }
}

#[async_trait]
impl CaptureDevice for HeldDevice {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn start(&mut self, sink: ChunkSink) -> TranscribeResult<()> {
        self.sink = Some(sink);
        Ok(())
    }

    async fn stop(&mut self) {
        self.sink = None;
    }
}

async fn wait_for_state(session: &Session, wanted: SessionState) {
    for _ in 0..200 {
        if session.state() == wanted {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session never reached {wanted}, stuck at {}", session.state());
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_state_terminality() {
    assert!(SessionState::Closed.is_terminal());
    assert!(SessionState::Failed.is_terminal());
    assert!(!SessionState::Idle.is_terminal());
    assert!(!SessionState::Streaming.is_terminal());
    assert_eq!(SessionState::Stopping.to_string(), "stopping");
}

#[tokio::test]
async fn test_second_start_while_active_is_rejected() {
    let tokens = token_endpoint().await;
    let service = spawn_silent_service().await;
    let endpoint = ServiceEndpoint::insecure(service.to_string());
    let mut session = Session::new(manager_for(&tokens), endpoint);

    let settings = RecognitionSettings {
        inactivity_timeout: 1,
        ..Default::default()
    };

    let (on_complete, mut completion) = completion_probe();
    let handle = session
        .start(
            settings.clone(),
            AudioSource::capture(HeldDevice::new("unit-mic-active")),
            None,
            on_complete,
        )
        .await
        .unwrap();

    wait_for_state(&session, SessionState::Streaming).await;

    // A second start on the same session must be rejected without touching
    // the running session.
    let (second_complete, _second_completion) = completion_probe();
    match session
        .start(
            settings,
            AudioSource::buffer(vec![0u8; 16]),
            None,
            second_complete,
        )
        .await
    {
        Err(TranscribeError::AlreadyActive) => {}
        other => panic!("expected AlreadyActive, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Streaming);

    // The service never confirms the stop, so the session force-closes.
    handle.stop();
    let outcome = tokio::time::timeout(Duration::from_secs(5), completion.recv())
        .await
        .expect("completion never fired")
        .expect("completion channel dropped");
    match outcome {
        Err(TranscribeError::Timeout(_)) => {}
        other => panic!("expected Timeout, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Failed);

    // Stop on a terminal session is a no-op, and the completion callback
    // never fires a second time.
    handle.stop();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(completion.try_recv().is_err());
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test]
async fn test_auth_failure_flows_to_completion() {
    // Nothing listens on the token endpoint: acquire fails and the session
    // moves straight to Failed through the completion callback.
    let manager = Arc::new(
        TokenManager::with_timeout(
            Credentials::ApiKey("key".to_string()),
            "http://127.0.0.1:1/api/v1/token",
            Duration::from_secs(2),
        )
        .unwrap(),
    );
    let mut session = Session::new(manager, ServiceEndpoint::insecure("127.0.0.1:1"));

    let (on_complete, mut completion) = completion_probe();
    session
        .start(
            RecognitionSettings::default(),
            AudioSource::buffer(vec![0u8; 4]),
            None,
            on_complete,
        )
        .await
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), completion.recv())
        .await
        .expect("completion never fired")
        .expect("completion channel dropped");
    match outcome {
        Err(TranscribeError::Auth { .. }) => {}
        other => panic!("expected Auth error, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test]
async fn test_session_can_restart_after_terminal_state() {
    let manager = Arc::new(
        TokenManager::with_timeout(
            Credentials::ApiKey("key".to_string()),
            "http://127.0.0.1:1/api/v1/token",
            Duration::from_secs(1),
        )
        .unwrap(),
    );
    let mut session = Session::new(manager, ServiceEndpoint::insecure("127.0.0.1:1"));

    for _ in 0..2 {
        let (on_complete, mut completion) = completion_probe();
        session
            .start(
                RecognitionSettings::default(),
                AudioSource::buffer(vec![0u8; 4]),
                None,
                on_complete,
            )
            .await
            .unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(5), completion.recv())
            .await
            .expect("completion never fired")
            .expect("completion channel dropped");
        assert!(outcome.is_err());
        assert_eq!(session.state(), SessionState::Failed);
    }
}
