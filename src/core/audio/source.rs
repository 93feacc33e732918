//! Audio sources and the chunk handoff queue.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use once_cell::sync::Lazy;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::capture::CaptureDevice;
use crate::errors::{TranscribeError, TranscribeResult};

// =============================================================================
// Constants
// =============================================================================

/// Bytes per chunk when slicing a bounded buffer.
///
/// 4 KiB of 16 kHz mono 16-bit PCM is ~128ms of audio, small enough that the
/// service starts producing interim results while the buffer is still being
/// fed.
pub const DEFAULT_CHUNK_BYTES: usize = 4096;

// =============================================================================
// Chunks
// =============================================================================

/// A contiguous slice of audio plus its production sequence number.
///
/// Ordering is implicit in enqueue order; the sequence number exists for
/// diagnostics only.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Raw audio bytes.
    pub data: Bytes,
    /// Monotonically increasing sequence number assigned at enqueue time.
    pub sequence: u64,
}

/// Producer side of the chunk handoff queue.
///
/// The queue is unbounded so a capture callback can always hand off without
/// waiting on the consumer. Cloneable so it can move into device callbacks.
#[derive(Clone)]
pub struct ChunkSink {
    tx: mpsc::UnboundedSender<AudioChunk>,
    sequence: Arc<AtomicU64>,
}

impl ChunkSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<AudioChunk>) -> Self {
        Self {
            tx,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueue one chunk. Returns `false` once the consumer is gone, which
    /// tells the producer to wind down.
    pub fn push(&self, data: Bytes) -> bool {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.tx.send(AudioChunk { data, sequence }).is_ok()
    }
}

// =============================================================================
// Device ownership registry
// =============================================================================

/// Device ids currently owned by a live source. A physical capture device
/// cannot be shared between two concurrent sessions.
static ACTIVE_DEVICES: Lazy<parking_lot::Mutex<HashSet<String>>> =
    Lazy::new(|| parking_lot::Mutex::new(HashSet::new()));

/// Exclusive claim on one capture device, released on drop.
#[derive(Debug)]
pub(crate) struct DeviceGuard {
    id: String,
}

impl DeviceGuard {
    pub(crate) fn acquire(id: &str) -> TranscribeResult<Self> {
        let mut active = ACTIVE_DEVICES.lock();
        if !active.insert(id.to_string()) {
            return Err(TranscribeError::DeviceBusy(id.to_string()));
        }
        debug!("claimed capture device '{id}'");
        Ok(Self { id: id.to_string() })
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        ACTIVE_DEVICES.lock().remove(&self.id);
        debug!("released capture device '{}'", self.id);
    }
}

// =============================================================================
// AudioSource
// =============================================================================

/// Where a session's audio comes from.
pub enum AudioSource {
    /// Bounded: a fixed buffer, sliced into chunks, ending naturally at the
    /// buffer boundary.
    Buffer {
        /// The recorded audio.
        data: Bytes,
        /// Bytes per emitted chunk.
        chunk_bytes: usize,
    },
    /// Live: a capture device producing chunks until stopped or failed.
    Capture {
        /// The device to capture from.
        device: Box<dyn CaptureDevice>,
    },
}

impl AudioSource {
    /// A bounded source over pre-recorded audio, using the default chunk
    /// size.
    pub fn buffer(data: impl Into<Bytes>) -> Self {
        Self::buffer_with_chunk_size(data, DEFAULT_CHUNK_BYTES)
    }

    /// A bounded source with an explicit chunk size.
    pub fn buffer_with_chunk_size(data: impl Into<Bytes>, chunk_bytes: usize) -> Self {
        Self::Buffer {
            data: data.into(),
            chunk_bytes: chunk_bytes.max(1),
        }
    }

    /// A live source over a capture device.
    pub fn capture(device: impl CaptureDevice + 'static) -> Self {
        Self::Capture {
            device: Box::new(device),
        }
    }

    /// Whether this source wraps a live capture device.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Capture { .. })
    }

    /// Claim the underlying device before the session commits to starting.
    ///
    /// Fails immediately with [`TranscribeError::DeviceBusy`] when another
    /// session holds the device; bounded sources have nothing to claim.
    pub(crate) fn reserve(&self) -> TranscribeResult<Option<DeviceGuard>> {
        match self {
            Self::Buffer { .. } => Ok(None),
            Self::Capture { device } => DeviceGuard::acquire(&device.id()).map(Some),
        }
    }

    /// Begin production into `sink`.
    ///
    /// The returned handle stops production and releases the device; letting
    /// the source end naturally (bounded exhaustion, device failure) closes
    /// the queue instead.
    pub(crate) async fn start(
        self,
        sink: ChunkSink,
        guard: Option<DeviceGuard>,
    ) -> TranscribeResult<SourceHandle> {
        match self {
            Self::Buffer { data, chunk_bytes } => {
                let stop = Arc::new(AtomicBool::new(false));
                let stop_flag = stop.clone();
                tokio::spawn(async move {
                    let total = data.len();
                    let mut offset = 0;
                    while offset < total {
                        if stop_flag.load(Ordering::Acquire) {
                            debug!("bounded source stopped with {} bytes unsent", total - offset);
                            break;
                        }
                        let end = (offset + chunk_bytes).min(total);
                        if !sink.push(data.slice(offset..end)) {
                            break;
                        }
                        offset = end;
                    }
                    trace!("bounded source finished ({total} bytes)");
                    // Dropping the sink closes the queue: natural end.
                });
                Ok(SourceHandle {
                    inner: HandleInner::Buffer { stop },
                })
            }
            Self::Capture { mut device } => {
                if let Err(e) = device.start(sink).await {
                    warn!("capture device failed to start: {e}");
                    return Err(e);
                }
                Ok(SourceHandle {
                    inner: HandleInner::Capture {
                        device,
                        _guard: guard,
                    },
                })
            }
        }
    }
}

// =============================================================================
// SourceHandle
// =============================================================================

enum HandleInner {
    Buffer {
        stop: Arc<AtomicBool>,
    },
    Capture {
        device: Box<dyn CaptureDevice>,
        _guard: Option<DeviceGuard>,
    },
    Stopped,
}

/// Halts audio production and releases the underlying device.
pub struct SourceHandle {
    inner: HandleInner,
}

impl SourceHandle {
    /// Stop production. Idempotent; the device claim is released here.
    pub async fn stop(&mut self) {
        match std::mem::replace(&mut self.inner, HandleInner::Stopped) {
            HandleInner::Buffer { stop } => {
                stop.store(true, Ordering::Release);
            }
            HandleInner::Capture {
                mut device,
                _guard,
            } => {
                device.stop().await;
                // _guard drops here, releasing the registry claim.
            }
            HandleInner::Stopped => {}
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
