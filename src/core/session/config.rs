//! Session settings and service endpoint configuration.
//!
//! [`RecognitionSettings`] is immutable for the lifetime of one session and
//! is serialized exactly once into the start control message.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::form_urlencoded;

// =============================================================================
// Constants
// =============================================================================

/// Default inactivity timeout in seconds. The service ends the session if no
/// audio arrives within this window, and the client bounds its stop
/// confirmation wait with the same value.
pub const DEFAULT_INACTIVITY_TIMEOUT: i32 = 30;

/// Default audio content type: 16 kHz mono 16-bit little-endian PCM.
pub const DEFAULT_CONTENT_TYPE: &str = "audio/l16;rate=16000;channels=1";

// =============================================================================
// Recognition settings
// =============================================================================

/// Configuration for one transcription session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionSettings {
    /// MIME content type of the audio frames (e.g. `audio/l16;rate=16000`).
    #[serde(default = "default_content_type")]
    pub content_type: String,

    /// Language model identifier, when not using the service default.
    pub model: Option<String>,

    /// Deliver provisional (interim) results while an utterance is in
    /// progress.
    #[serde(default = "default_true")]
    pub interim_results: bool,

    /// Keep recognizing across multiple utterances instead of ending after
    /// the first end-of-speech.
    #[serde(default)]
    pub continuous: bool,

    /// Seconds of silence after which the service ends the session.
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout: i32,

    /// Maximum number of alternative transcripts per result.
    #[serde(default = "default_max_alternatives")]
    pub max_alternatives: i32,

    /// Include per-word confidence scores in final results.
    #[serde(default)]
    pub word_confidence: bool,

    /// Include per-word timestamps in final results.
    #[serde(default)]
    pub timestamps: bool,

    /// Opt this session's audio out of service-side learning. Sent as a
    /// query parameter on the connection, not in the start message.
    #[serde(default)]
    pub learning_opt_out: bool,

    /// Keywords to spot in the audio.
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Minimum confidence for a keyword match to be reported.
    pub keywords_threshold: Option<f64>,

    /// Minimum confidence for word alternatives to be reported.
    pub word_alternatives_threshold: Option<f64>,
}

fn default_true() -> bool {
    true
}

fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}

fn default_inactivity_timeout() -> i32 {
    DEFAULT_INACTIVITY_TIMEOUT
}

fn default_max_alternatives() -> i32 {
    1
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            model: None,
            interim_results: true,
            continuous: false,
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            max_alternatives: 1,
            word_confidence: false,
            timestamps: false,
            learning_opt_out: false,
            keywords: Vec::new(),
            keywords_threshold: None,
            word_alternatives_threshold: None,
        }
    }
}

impl RecognitionSettings {
    /// Settings for raw PCM audio at the given sample rate, other options at
    /// their defaults.
    pub fn pcm(sample_rate: u32) -> Self {
        Self {
            content_type: format!("audio/l16;rate={sample_rate};channels=1"),
            ..Default::default()
        }
    }

    /// Build the start control message sent once when the session opens.
    pub fn start_message(&self) -> serde_json::Value {
        let mut msg = serde_json::json!({
            "action": "start",
            "content-type": self.content_type,
            "interim_results": self.interim_results,
            "continuous": self.continuous,
            "inactivity_timeout": self.inactivity_timeout,
            "max_alternatives": self.max_alternatives,
            "word_confidence": self.word_confidence,
            "timestamps": self.timestamps,
        });

        if !self.keywords.is_empty() {
            msg["keywords"] = serde_json::json!(self.keywords);
        }
        if let Some(threshold) = self.keywords_threshold {
            msg["keywords_threshold"] = serde_json::json!(threshold);
        }
        if let Some(threshold) = self.word_alternatives_threshold {
            msg["word_alternatives_threshold"] = serde_json::json!(threshold);
        }

        msg
    }

    /// How long the session waits for the service to confirm a stop before
    /// force-closing.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout.max(1) as u64)
    }
}

// =============================================================================
// Service endpoint
// =============================================================================

/// Host (and scheme) of the transcription service.
#[derive(Debug, Clone)]
pub struct ServiceEndpoint {
    host: String,
    secure: bool,
}

impl ServiceEndpoint {
    /// An endpoint reached over TLS (`https`/`wss`).
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            secure: true,
        }
    }

    /// A plaintext endpoint (`http`/`ws`), for local testing.
    pub fn insecure(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            secure: false,
        }
    }

    /// URL of the token exchange endpoint.
    pub fn token_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}/api/v1/token", self.host)
    }

    /// WebSocket URL for the recognize endpoint, carrying the bearer token
    /// and per-session query options.
    pub fn recognize_url(&self, settings: &RecognitionSettings, token: &str) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };

        fn encode(s: &str) -> String {
            form_urlencoded::byte_serialize(s.as_bytes()).collect()
        }

        let mut params = vec![format!("access_token={}", encode(token))];
        if let Some(model) = &settings.model {
            params.push(format!("model={}", encode(model)));
        }
        if settings.learning_opt_out {
            params.push("learning_opt_out=true".to_string());
        }

        format!(
            "{scheme}://{}/api/v1/recognize?{}",
            self.host,
            params.join("&")
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
