//! Message-oriented duplex transport to the transcription service.
//!
//! [`Channel`] wraps one persistent WebSocket connection: control messages go
//! out as text frames, audio as binary frames, and everything inbound is
//! surfaced as an ordered stream of [`ChannelEvent`]s. A channel is owned by
//! exactly one session and is never reused after it terminates.

mod channel;

pub use channel::{Channel, ChannelEvent, ChannelEvents, ChannelSink};
