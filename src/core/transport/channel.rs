//! WebSocket channel wrapper.
//!
//! Keeps the tungstenite plumbing out of the session state machine: the
//! session sees ordered [`ChannelEvent`]s and three send/close operations,
//! nothing else. Delivery order is the network arrival order; no reordering
//! or batching happens here.
//!
//! The channel splits into a send half and a receive half so the session's
//! event loop can poll for inbound events while another arm writes frames.
//! The halves share one termination flag: once either side observes the end
//! of the connection, sends fail with [`TranscribeError::ChannelClosed`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use crate::errors::{TranscribeError, TranscribeResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Events
// =============================================================================

/// One inbound occurrence on the channel, delivered in arrival order.
#[derive(Debug)]
pub enum ChannelEvent {
    /// A text frame carrying a JSON message from the service.
    Text(String),
    /// The peer closed the connection (close frame or clean stream end).
    Closed,
    /// The connection failed; the channel is terminated.
    Error(TranscribeError),
}

// =============================================================================
// Channel
// =============================================================================

/// A persistent, message-oriented duplex connection.
///
/// After a close or connection error the channel is terminated: further
/// sends fail with [`TranscribeError::ChannelClosed`] and
/// [`next_event`](Self::next_event) keeps returning [`ChannelEvent::Closed`].
#[derive(Debug)]
pub struct Channel {
    sink: ChannelSink,
    events: ChannelEvents,
}

impl Channel {
    /// Open a channel to `url`, bounded by `connect_timeout`.
    ///
    /// Handshake rejections with an authentication status (401/403) map to
    /// [`TranscribeError::Auth`] so the caller can distinguish token expiry
    /// from ordinary connection failures.
    pub async fn open(url: &str, connect_timeout: Duration) -> TranscribeResult<Self> {
        let connected = timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                TranscribeError::Timeout(format!(
                    "connecting to transcription service exceeded {}s",
                    connect_timeout.as_secs()
                ))
            })?;

        let (ws, _response) = connected.map_err(map_connect_error)?;
        debug!("transport channel established");

        let (sink, stream) = ws.split();
        let closed = Arc::new(AtomicBool::new(false));
        Ok(Self {
            sink: ChannelSink {
                sink,
                closed: closed.clone(),
            },
            events: ChannelEvents { stream, closed },
        })
    }

    /// Split into independently owned send and receive halves.
    pub fn split(self) -> (ChannelSink, ChannelEvents) {
        (self.sink, self.events)
    }

    /// Send a text (control) frame.
    pub async fn send_text(&mut self, message: String) -> TranscribeResult<()> {
        self.sink.send_text(message).await
    }

    /// Send a binary (audio) frame.
    pub async fn send_binary(&mut self, bytes: Bytes) -> TranscribeResult<()> {
        self.sink.send_binary(bytes).await
    }

    /// Close the channel. Idempotent.
    pub async fn close(&mut self) {
        self.sink.close().await;
    }

    /// Wait for the next inbound event.
    pub async fn next_event(&mut self) -> ChannelEvent {
        self.events.next_event().await
    }
}

// =============================================================================
// Send half
// =============================================================================

/// The outbound half of a channel.
#[derive(Debug)]
pub struct ChannelSink {
    sink: SplitSink<WsStream, Message>,
    closed: Arc<AtomicBool>,
}

impl ChannelSink {
    /// Send a text (control) frame.
    pub async fn send_text(&mut self, message: String) -> TranscribeResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TranscribeError::ChannelClosed);
        }
        self.sink
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| self.fail_send(e))
    }

    /// Send a binary (audio) frame.
    pub async fn send_binary(&mut self, bytes: Bytes) -> TranscribeResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TranscribeError::ChannelClosed);
        }
        self.sink
            .send(Message::Binary(bytes))
            .await
            .map_err(|e| self.fail_send(e))
    }

    /// Close the channel. Idempotent: closing an already-closed channel has
    /// no effect.
    pub async fn close(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.sink.send(Message::Close(None)).await {
            debug!("close frame not delivered: {e}");
        }
        let _ = self.sink.close().await;
        debug!("transport channel closed");
    }

    fn fail_send(&mut self, err: WsError) -> TranscribeError {
        self.closed.store(true, Ordering::Release);
        TranscribeError::ConnectFailed(format!("send failed: {err}"))
    }
}

// =============================================================================
// Receive half
// =============================================================================

/// The inbound half of a channel.
#[derive(Debug)]
pub struct ChannelEvents {
    stream: SplitStream<WsStream>,
    closed: Arc<AtomicBool>,
}

impl ChannelEvents {
    /// Wait for the next inbound event.
    ///
    /// Non-text frames that carry no protocol meaning for the session (ping,
    /// pong, stray binary) are consumed here.
    pub async fn next_event(&mut self) -> ChannelEvent {
        if self.closed.load(Ordering::Acquire) {
            return ChannelEvent::Closed;
        }
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return ChannelEvent::Text(text.to_string()),
                Some(Ok(Message::Binary(data))) => {
                    debug!("ignoring {} byte binary frame from service", data.len());
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!("service closed the channel: {frame:?}");
                    self.closed.store(true, Ordering::Release);
                    return ChannelEvent::Closed;
                }
                Some(Ok(_)) => {
                    debug!("ignoring unexpected frame type from service");
                }
                Some(Err(e)) => {
                    warn!("transport channel error: {e}");
                    self.closed.store(true, Ordering::Release);
                    return ChannelEvent::Error(TranscribeError::ConnectFailed(format!(
                        "connection error: {e}"
                    )));
                }
                None => {
                    self.closed.store(true, Ordering::Release);
                    return ChannelEvent::Closed;
                }
            }
        }
    }
}

/// Map a handshake failure onto the error taxonomy.
fn map_connect_error(err: WsError) -> TranscribeError {
    match err {
        WsError::Http(response) => {
            let status = response.status().as_u16();
            if status == 401 || status == 403 {
                TranscribeError::Auth {
                    status: Some(status),
                    message: "service rejected the connection handshake".to_string(),
                }
            } else {
                TranscribeError::ConnectFailed(format!("handshake rejected with status {status}"))
            }
        }
        other => TranscribeError::ConnectFailed(other.to_string()),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::http::Response;

    fn http_error(status: u16) -> WsError {
        let response = Response::builder().status(status).body(None).unwrap();
        WsError::Http(Box::new(response))
    }

    #[test]
    fn test_unauthorized_handshake_maps_to_auth_error() {
        let err = map_connect_error(http_error(401));
        match err {
            TranscribeError::Auth {
                status: Some(401), ..
            } => assert!(err.is_auth_rejection()),
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[test]
    fn test_forbidden_handshake_is_auth_but_not_retryable() {
        let err = map_connect_error(http_error(403));
        match err {
            TranscribeError::Auth {
                status: Some(403), ..
            } => assert!(!err.is_auth_rejection()),
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[test]
    fn test_other_handshake_statuses_map_to_connect_failed() {
        match map_connect_error(http_error(503)) {
            TranscribeError::ConnectFailed(msg) => assert!(msg.contains("503")),
            other => panic!("expected connect error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_times_out_against_unresponsive_endpoint() {
        // A TCP listener that never completes the WebSocket handshake.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _held = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let url = format!("ws://{addr}/recognize");
        match Channel::open(&url, Duration::from_millis(200)).await {
            Err(TranscribeError::Timeout(_)) => {}
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_fails_fast_when_nothing_listens() {
        match Channel::open("ws://127.0.0.1:1/recognize", Duration::from_secs(2)).await {
            Err(TranscribeError::ConnectFailed(_)) => {}
            other => panic!("expected connect failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ordered_delivery_and_send_after_close() {
        use futures::SinkExt;

        // A service that sends three text frames and then a close frame.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            for n in 1..=3 {
                ws.send(Message::Text(format!("{{\"state\": \"s{n}\"}}").into()))
                    .await
                    .unwrap();
            }
            ws.send(Message::Close(None)).await.unwrap();
        });

        let url = format!("ws://{addr}/recognize");
        let mut channel = Channel::open(&url, Duration::from_secs(5)).await.unwrap();

        for n in 1..=3 {
            match channel.next_event().await {
                ChannelEvent::Text(text) => assert!(text.contains(&format!("s{n}"))),
                other => panic!("expected text event, got {other:?}"),
            }
        }
        match channel.next_event().await {
            ChannelEvent::Closed => {}
            other => panic!("expected closed event, got {other:?}"),
        }

        // The channel is terminated; sends are rejected and further event
        // polls keep reporting closure.
        match channel.send_text("{\"action\": \"stop\"}".to_string()).await {
            Err(TranscribeError::ChannelClosed) => {}
            other => panic!("expected ChannelClosed, got {other:?}"),
        }
        match channel.next_event().await {
            ChannelEvent::Closed => {}
            other => panic!("expected closed event, got {other:?}"),
        }

        // Close after termination is a no-op.
        channel.close().await;
        channel.close().await;
    }
}
