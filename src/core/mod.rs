pub mod audio;
pub mod auth;
pub mod session;
pub mod transport;

// Re-export commonly used types for convenience
pub use audio::{AudioChunk, AudioSource, CaptureDevice, ChunkSink, SourceHandle};
#[cfg(feature = "microphone")]
pub use audio::MicrophoneDevice;
pub use auth::{Credentials, Token, TokenManager};
pub use session::{
    CompletionCallback, FinalResult, InterimCallback, InterimResult, RecognitionSettings,
    ServiceEndpoint, Session, SessionState, SpeechClient, StopHandle,
};
pub use transport::{Channel, ChannelEvent};
