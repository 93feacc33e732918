//! The streaming transcription session.
//!
//! A [`Session`] owns one transport channel and one audio source for the
//! duration of a single recognition exchange. Three activities make
//! independent progress: audio production (the source feeding the chunk
//! queue), the driver task (draining chunks into binary frames and reading
//! inbound events), and the dispatch task (invoking caller callbacks in
//! arrival order).
//!
//! ```text
//! ┌──────────────┐   chunk queue    ┌──────────────┐   event queue   ┌──────────────┐
//! │ Audio Source │ ───────────────▶ │ Driver Task  │ ──────────────▶ │ Dispatch Task│
//! └──────────────┘                  │  (select! on │                 │  (interim /  │
//!                                   │  stop, audio,│                 │  completion  │
//!         WebSocket frames ◀──────▶ │  channel)    │                 │  callbacks)  │
//!                                   └──────────────┘                 └──────────────┘
//! ```
//!
//! The state machine is `Idle → Connecting → Streaming → Stopping → Closed`,
//! with a terminal `Failed` reachable from every non-`Closed` state. The
//! completion callback fires exactly once per run, after all interim
//! deliveries, whichever terminal path is taken.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::config::{RecognitionSettings, ServiceEndpoint};
use super::messages::{FinalResult, InterimResult, ServiceMessage, StopMessage};
use crate::core::audio::{AudioChunk, AudioSource, ChunkSink, DeviceGuard, SourceHandle};
use crate::core::auth::{Credentials, TokenManager};
use crate::core::transport::{Channel, ChannelEvent, ChannelEvents, ChannelSink};
use crate::errors::{TranscribeError, TranscribeResult};

// =============================================================================
// Constants
// =============================================================================

/// Default bound on opening the transport channel (including the token
/// exchange retry path).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Depth of the callback dispatch queue. Deep enough for result bursts; a
/// full queue backpressures the driver, never reorders.
const DISPATCH_QUEUE_DEPTH: usize = 256;

// =============================================================================
// Callback types
// =============================================================================

/// Async callback invoked once per interim result, in arrival order.
pub type InterimCallback =
    Arc<dyn Fn(InterimResult) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Async callback invoked exactly once with the session outcome: the
/// accumulated final results, or the error that terminated the session.
pub type CompletionCallback = Box<
    dyn FnOnce(TranscribeResult<Vec<FinalResult>>) -> Pin<Box<dyn Future<Output = ()> + Send>>
        + Send,
>;

// =============================================================================
// Session state
// =============================================================================

/// Lifecycle state of a session run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No run started yet.
    Idle,
    /// Obtaining a token and opening the transport channel.
    Connecting,
    /// Start message sent; audio flowing out, results flowing in.
    Streaming,
    /// Stop control message sent; draining in-flight results.
    Stopping,
    /// Terminal: completed normally.
    Closed,
    /// Terminal: completed with an error.
    Failed,
}

impl SessionState {
    /// Whether the session has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    fn can_start(&self) -> bool {
        matches!(self, Self::Idle) || self.is_terminal()
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Stopping => "stopping",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// State shared between the caller-facing handle and the driver task.
#[derive(Debug)]
struct Shared {
    state: parking_lot::Mutex<SessionState>,
    stop_requested: AtomicBool,
    stop_notify: Notify,
}

impl Shared {
    fn new(state: SessionState) -> Self {
        Self {
            state: parking_lot::Mutex::new(state),
            stop_requested: AtomicBool::new(false),
            stop_notify: Notify::new(),
        }
    }

    fn state(&self) -> SessionState {
        *self.state.lock()
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock();
        debug!("session state: {} -> {next}", *state);
        *state = next;
    }
}

// =============================================================================
// StopHandle
// =============================================================================

/// Capability to request a graceful shutdown of a running session.
///
/// `stop` is idempotent and safe to call from any task; on a session that
/// already reached a terminal state it has no effect.
#[derive(Debug, Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    /// Request a graceful shutdown: stop the audio source, send the stop
    /// control message, and wait (bounded by the inactivity timeout) for the
    /// service to confirm before completing.
    pub fn stop(&self) {
        if !self.shared.stop_requested.swap(true, Ordering::AcqRel) {
            debug!("stop requested");
            self.shared.stop_notify.notify_one();
        }
    }

    /// Current state of the session run this handle belongs to.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }
}

// =============================================================================
// Session
// =============================================================================

/// One end-to-end transcription exchange, from `start` to a terminal state.
///
/// The session owns its transport channel and audio source for exactly one
/// run; neither survives into a terminal state or is shared across runs.
pub struct Session {
    token_manager: Arc<TokenManager>,
    endpoint: ServiceEndpoint,
    connect_timeout: Duration,
    shared: Arc<Shared>,
}

impl Session {
    /// Create a session against `endpoint`, authenticating through
    /// `token_manager`.
    pub fn new(token_manager: Arc<TokenManager>, endpoint: ServiceEndpoint) -> Self {
        Self {
            token_manager,
            endpoint,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            shared: Arc::new(Shared::new(SessionState::Idle)),
        }
    }

    /// Override the bound on opening the transport channel.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Current state of the most recent run.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Start streaming `source` with `settings`.
    ///
    /// Fails fast with [`TranscribeError::AlreadyActive`] when a run is in
    /// flight, and with [`TranscribeError::DeviceBusy`] when the live
    /// capture device is held by another session; neither failure disturbs
    /// the running session. Every later failure is delivered through
    /// `on_complete`, which fires exactly once per run.
    pub async fn start(
        &mut self,
        settings: RecognitionSettings,
        source: AudioSource,
        on_interim: Option<InterimCallback>,
        on_complete: CompletionCallback,
    ) -> TranscribeResult<StopHandle> {
        if !self.shared.state().can_start() {
            return Err(TranscribeError::AlreadyActive);
        }

        // Claim the capture device before committing to anything else.
        let guard = source.reserve()?;

        // Each run gets fresh shared state so handles from a previous run
        // cannot reach into this one.
        let shared = Arc::new(Shared::new(SessionState::Connecting));
        self.shared = shared.clone();

        let session_id = Uuid::new_v4();
        info!(session = %session_id, "starting transcription session");

        let (event_tx, event_rx) = mpsc::channel(DISPATCH_QUEUE_DEPTH);
        tokio::spawn(dispatch_events(event_rx, on_interim, on_complete));

        let ctx = DriverCtx {
            session_id,
            token_manager: self.token_manager.clone(),
            endpoint: self.endpoint.clone(),
            settings,
            connect_timeout: self.connect_timeout,
            shared: shared.clone(),
            events: event_tx,
        };
        tokio::spawn(run_driver(ctx, source, guard));

        Ok(StopHandle { shared })
    }
}

// =============================================================================
// SpeechClient facade
// =============================================================================

/// Entry point owning the process-wide token cache.
///
/// Sessions created from one client share its [`TokenManager`]; the cache is
/// torn down with the client.
pub struct SpeechClient {
    token_manager: Arc<TokenManager>,
    endpoint: ServiceEndpoint,
    connect_timeout: Duration,
}

impl SpeechClient {
    /// Create a client for `endpoint` with the given credentials.
    pub fn new(credentials: Credentials, endpoint: ServiceEndpoint) -> TranscribeResult<Self> {
        let token_manager = Arc::new(TokenManager::new(credentials, endpoint.token_url())?);
        Ok(Self {
            token_manager,
            endpoint,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    /// Override the bound on opening transport channels.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The shared token manager backing this client's sessions.
    pub fn token_manager(&self) -> Arc<TokenManager> {
        self.token_manager.clone()
    }

    /// A fresh session bound to this client's endpoint and token cache.
    pub fn session(&self) -> Session {
        Session::new(self.token_manager.clone(), self.endpoint.clone())
            .with_connect_timeout(self.connect_timeout)
    }

    /// Transcribe pre-recorded audio. The session ends on its own once the
    /// buffer is exhausted and the service confirms.
    pub async fn transcribe_buffer(
        &self,
        audio: impl Into<bytes::Bytes>,
        settings: RecognitionSettings,
        on_interim: Option<InterimCallback>,
        on_complete: CompletionCallback,
    ) -> TranscribeResult<StopHandle> {
        let mut session = self.session();
        session
            .start(settings, AudioSource::buffer(audio), on_interim, on_complete)
            .await
    }

    /// Transcribe live microphone audio until the returned handle is
    /// stopped or the service signals end of speech.
    #[cfg(feature = "microphone")]
    pub async fn transcribe_microphone(
        &self,
        settings: RecognitionSettings,
        on_interim: Option<InterimCallback>,
        on_complete: CompletionCallback,
    ) -> TranscribeResult<StopHandle> {
        use crate::core::audio::MicrophoneDevice;

        let mut session = self.session();
        session
            .start(
                settings,
                AudioSource::capture(MicrophoneDevice::default_input()),
                on_interim,
                on_complete,
            )
            .await
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Everything the driver task needs for one run.
struct DriverCtx {
    session_id: Uuid,
    token_manager: Arc<TokenManager>,
    endpoint: ServiceEndpoint,
    settings: RecognitionSettings,
    connect_timeout: Duration,
    shared: Arc<Shared>,
    events: mpsc::Sender<DispatchEvent>,
}

/// Events handed to the dispatch task, in arrival order.
enum DispatchEvent {
    Interim(InterimResult),
    Complete(TranscribeResult<Vec<FinalResult>>),
}

/// Invoke caller callbacks in queue order; the completion callback fires at
/// most once and always last.
async fn dispatch_events(
    mut events: mpsc::Receiver<DispatchEvent>,
    on_interim: Option<InterimCallback>,
    on_complete: CompletionCallback,
) {
    let mut on_complete = Some(on_complete);
    while let Some(event) = events.recv().await {
        match event {
            DispatchEvent::Interim(result) => {
                if let Some(callback) = &on_interim {
                    callback(result).await;
                }
            }
            DispatchEvent::Complete(outcome) => {
                if let Some(callback) = on_complete.take() {
                    callback(outcome).await;
                }
                break;
            }
        }
    }
}

/// Run one session to a terminal state and deliver the completion event.
async fn run_driver(ctx: DriverCtx, source: AudioSource, guard: Option<DeviceGuard>) {
    let outcome = drive(&ctx, source, guard).await;

    match &outcome {
        Ok(finals) => {
            ctx.shared.set_state(SessionState::Closed);
            info!(
                session = %ctx.session_id,
                "session closed with {} final result(s)",
                finals.len()
            );
        }
        Err(e) => {
            ctx.shared.set_state(SessionState::Failed);
            warn!(session = %ctx.session_id, "session failed: {e}");
        }
    }

    if ctx.events.send(DispatchEvent::Complete(outcome)).await.is_err() {
        error!(session = %ctx.session_id, "completion not delivered: dispatch task gone");
    }
}

/// Connect, stream, and drain; resources are released on every exit path.
async fn drive(
    ctx: &DriverCtx,
    source: AudioSource,
    guard: Option<DeviceGuard>,
) -> TranscribeResult<Vec<FinalResult>> {
    let live = source.is_live();

    let token = ctx.token_manager.acquire().await?;
    let channel = connect(ctx, token.value).await?;
    let (mut sink, mut events) = channel.split();

    let start = ctx.settings.start_message().to_string();
    if let Err(e) = sink.send_text(start).await {
        sink.close().await;
        return Err(e);
    }
    ctx.shared.set_state(SessionState::Streaming);

    let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
    let mut source_handle = match source.start(ChunkSink::new(chunk_tx), guard).await {
        Ok(handle) => handle,
        Err(e) => {
            sink.close().await;
            return Err(e);
        }
    };

    let result = stream_loop(ctx, &mut sink, &mut events, chunk_rx, &mut source_handle, live).await;

    // Terminal paths all come through here: stop the source, close the
    // channel (idempotently), then report.
    source_handle.stop().await;
    sink.close().await;
    result
}

/// Open the transport channel, refreshing the token and retrying once on an
/// authentication rejection. A second rejection surfaces to the caller.
async fn connect(ctx: &DriverCtx, token: String) -> TranscribeResult<Channel> {
    let url = ctx.endpoint.recognize_url(&ctx.settings, &token);
    match Channel::open(&url, ctx.connect_timeout).await {
        Ok(channel) => Ok(channel),
        Err(e) if e.is_auth_rejection() => {
            debug!(session = %ctx.session_id, "connection rejected as unauthenticated; refreshing token");
            let fresh = ctx.token_manager.refresh().await?;
            let url = ctx.endpoint.recognize_url(&ctx.settings, &fresh.value);
            Channel::open(&url, ctx.connect_timeout).await
        }
        Err(e) => Err(e),
    }
}

/// The streaming event loop: one `select!` multiplexing the caller's stop
/// signal, the chunk queue, inbound channel events, and the stop-confirmation
/// deadline.
async fn stream_loop(
    ctx: &DriverCtx,
    sink: &mut ChannelSink,
    events: &mut ChannelEvents,
    mut chunk_rx: mpsc::UnboundedReceiver<AudioChunk>,
    source_handle: &mut SourceHandle,
    live: bool,
) -> TranscribeResult<Vec<FinalResult>> {
    let mut finals: Vec<FinalResult> = Vec::new();
    let mut listening_seen = false;
    let mut stopping = false;
    let mut audio_done = false;
    let stop_wait = ctx.settings.stop_timeout();

    let deadline = tokio::time::sleep(stop_wait);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;

            // Caller-requested graceful shutdown.
            _ = ctx.shared.stop_notify.notified(), if !stopping => {
                debug!(session = %ctx.session_id, "caller requested stop");
                source_handle.stop().await;
                begin_stop(ctx, sink, &mut stopping).await?;
                deadline.as_mut().reset(tokio::time::Instant::now() + stop_wait);
            }

            // Outbound audio, in strict production order.
            chunk = chunk_rx.recv(), if !stopping && !audio_done => {
                match chunk {
                    Some(chunk) => {
                        trace!("forwarding audio chunk #{} ({} bytes)", chunk.sequence, chunk.data.len());
                        sink.send_binary(chunk.data).await?;
                    }
                    None => {
                        // Natural end: bounded buffer exhausted, or the live
                        // device wound down on its own.
                        audio_done = true;
                        debug!(session = %ctx.session_id, "audio source ended");
                        source_handle.stop().await;
                        begin_stop(ctx, sink, &mut stopping).await?;
                        deadline.as_mut().reset(tokio::time::Instant::now() + stop_wait);
                    }
                }
            }

            // Inbound messages, in strict arrival order.
            event = events.next_event() => match event {
                ChannelEvent::Text(text) => {
                    match ServiceMessage::parse(&text) {
                        Ok(ServiceMessage::State(state)) => {
                            if !state.is_listening() {
                                // Server state notifications carry no
                                // protocol meaning for the session.
                                debug!("service state '{}' observed", state.state);
                            } else if stopping {
                                if listening_seen {
                                    debug!(session = %ctx.session_id, "stop confirmed by service");
                                    return Ok(finals);
                                }
                                // The start acknowledgment arriving after a
                                // fast drain already requested the stop; the
                                // confirmation is still to come.
                                listening_seen = true;
                            } else if listening_seen && live {
                                // The service finished the utterance on its
                                // own: stop the source, notify the service,
                                // and complete. The signal doubles as the
                                // confirmation.
                                info!(session = %ctx.session_id, "service signaled end of speech");
                                source_handle.stop().await;
                                ctx.shared.set_state(SessionState::Stopping);
                                sink.send_text(stop_message_json()?).await?;
                                return Ok(finals);
                            } else {
                                listening_seen = true;
                                debug!("service acknowledged session start");
                            }
                        }
                        Ok(ServiceMessage::Results(message)) => {
                            for result in message.results {
                                if result.is_final {
                                    if let Some(fin) = result.to_final() {
                                        debug!("final result: \"{}\"", fin.transcript);
                                        finals.push(fin);
                                    }
                                } else if let Some(interim) = result.to_interim() {
                                    trace!("interim result: \"{}\"", interim.transcript);
                                    if ctx.events.send(DispatchEvent::Interim(interim)).await.is_err() {
                                        warn!("interim result dropped: dispatch task gone");
                                    }
                                }
                            }
                        }
                        Ok(ServiceMessage::Error(err)) => {
                            return Err(TranscribeError::Service {
                                code: err.code,
                                message: err.error,
                            });
                        }
                        Err(e) => {
                            return Err(TranscribeError::Protocol(format!(
                                "unrecognized inbound message: {e}"
                            )));
                        }
                    }
                }
                ChannelEvent::Closed => {
                    if stopping {
                        debug!(session = %ctx.session_id, "channel closed after stop; treating as confirmation");
                        return Ok(finals);
                    }
                    return Err(TranscribeError::ChannelClosed);
                }
                ChannelEvent::Error(e) => return Err(e),
            },

            // The service never confirmed our stop.
            _ = &mut deadline, if stopping => {
                return Err(TranscribeError::Timeout(format!(
                    "service did not confirm stop within {}s",
                    stop_wait.as_secs()
                )));
            }
        }
    }
}

/// Send the stop control message and move to `Stopping`. No further audio
/// frames are sent once this returns.
async fn begin_stop(
    ctx: &DriverCtx,
    sink: &mut ChannelSink,
    stopping: &mut bool,
) -> TranscribeResult<()> {
    sink.send_text(stop_message_json()?).await?;
    ctx.shared.set_state(SessionState::Stopping);
    *stopping = true;
    Ok(())
}

fn stop_message_json() -> TranscribeResult<String> {
    serde_json::to_string(&StopMessage::new())
        .map_err(|e| TranscribeError::Protocol(format!("could not serialize stop message: {e}")))
}
