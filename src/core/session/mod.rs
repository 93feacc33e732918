//! Streaming transcription sessions.
//!
//! This module is the state machine at the heart of the crate: it owns a
//! transport channel and an audio source, sequences outgoing control and
//! audio frames, classifies inbound messages into interim results, final
//! results, server state, and errors, and exposes a stop capability to the
//! caller.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──start()──▶ Connecting ──channel open──▶ Streaming ──stop/EOS──▶ Stopping ──confirm──▶ Closed
//!                       │                            │                       │
//!                       └────────────────────────────┴───────────────────────┴──────▶ Failed
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use streamscribe::{
//!     Credentials, RecognitionSettings, ServiceEndpoint, SpeechClient,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SpeechClient::new(
//!         Credentials::ApiKey(std::env::var("SPEECH_API_KEY")?),
//!         ServiceEndpoint::new("speech.example.com"),
//!     )?;
//!
//!     let audio = std::fs::read("utterance.raw")?;
//!     let handle = client
//!         .transcribe_buffer(
//!             audio,
//!             RecognitionSettings::pcm(16000),
//!             Some(Arc::new(|interim| {
//!                 Box::pin(async move {
//!                     println!("interim: {}", interim.transcript);
//!                 })
//!             })),
//!             Box::new(|outcome| {
//!                 Box::pin(async move {
//!                     match outcome {
//!                         Ok(finals) => {
//!                             for result in finals {
//!                                 println!("final: {}", result.transcript);
//!                             }
//!                         }
//!                         Err(e) => eprintln!("transcription failed: {e}"),
//!                     }
//!                 })
//!             }),
//!         )
//!         .await?;
//!
//!     // `handle.stop()` would end the session early; a bounded buffer ends
//!     // on its own once exhausted.
//!     let _ = handle;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod messages;

mod client;

#[cfg(test)]
mod tests;

pub use client::{
    CompletionCallback, InterimCallback, Session, SessionState, SpeechClient, StopHandle,
};
pub use config::{
    DEFAULT_CONTENT_TYPE, DEFAULT_INACTIVITY_TIMEOUT, RecognitionSettings, ServiceEndpoint,
};
pub use messages::{
    ErrorMessage, FinalResult, InterimResult, RecognitionResult, ResultsMessage, ServiceMessage,
    StateMessage, StopMessage, TranscriptAlternative, WordConfidence, WordTiming,
};
