//! Audio production for transcription sessions.
//!
//! An [`AudioSource`] produces an ordered sequence of [`AudioChunk`]s,
//! either from a fixed byte buffer (bounded, ends at the buffer boundary) or
//! from a live capture device (unbounded, ends on [`SourceHandle::stop`] or
//! a device hard failure). Chunks are handed to the session through a queue
//! the session drains; the source never blocks on a slow consumer.

mod capture;
mod source;
pub mod wav;

pub use capture::CaptureDevice;
#[cfg(feature = "microphone")]
pub use capture::MicrophoneDevice;
pub(crate) use source::DeviceGuard;
pub use source::{AudioChunk, AudioSource, ChunkSink, SourceHandle};
