//! Client-side engine for real-time speech transcription.
//!
//! `streamscribe` captures or accepts audio, streams it over a persistent
//! bidirectional WebSocket connection to a remote transcription service, and
//! reconciles interim and final recognition results back to the caller.
//!
//! # Architecture
//!
//! - [`TokenManager`]: obtains and refreshes the bearer token used by
//!   every outbound connection attempt, with single-flight refresh.
//! - [`AudioSource`]: produces ordered audio chunks from a pre-recorded
//!   buffer or a live capture device.
//! - [`Channel`]: the persistent duplex connection carrying control
//!   messages, binary audio frames, and inbound results.
//! - [`Session`]: the state machine tying the three together and
//!   dispatching results to caller callbacks.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use streamscribe::{Credentials, RecognitionSettings, ServiceEndpoint, SpeechClient};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = SpeechClient::new(
//!     Credentials::Basic {
//!         username: "user".into(),
//!         password: "pass".into(),
//!     },
//!     ServiceEndpoint::new("speech.example.com"),
//! )?;
//!
//! let audio = std::fs::read("utterance.raw")?;
//! client
//!     .transcribe_buffer(
//!         audio,
//!         RecognitionSettings::pcm(16000),
//!         None,
//!         Box::new(|outcome| {
//!             Box::pin(async move {
//!                 if let Ok(finals) = outcome {
//!                     for f in finals {
//!                         println!("{}", f.transcript);
//!                     }
//!                 }
//!             })
//!         }),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! Live microphone transcription is available behind the `microphone`
//! feature via [`SpeechClient::transcribe_microphone`].

pub mod core;
pub mod errors;
pub mod init;

// Re-export commonly used items for convenience
pub use crate::core::audio::{AudioChunk, AudioSource, CaptureDevice, ChunkSink, SourceHandle};
#[cfg(feature = "microphone")]
pub use crate::core::audio::MicrophoneDevice;
pub use crate::core::auth::{Credentials, Token, TokenManager};
pub use crate::core::session::{
    CompletionCallback, FinalResult, InterimCallback, InterimResult, RecognitionSettings,
    ServiceEndpoint, Session, SessionState, SpeechClient, StopHandle,
};
pub use crate::core::transport::{Channel, ChannelEvent};
pub use errors::{TranscribeError, TranscribeResult};
