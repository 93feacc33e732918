//! Wire message types for the recognition stream.
//!
//! Inbound frames are JSON objects in one of three shapes: recognition
//! results, a server state notification, or a service-reported error. The
//! shapes share no required fields, so an untagged enum classifies them.

use serde::{Deserialize, Serialize};

// =============================================================================
// Inbound messages
// =============================================================================

/// A classified inbound message from the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceMessage {
    /// Recognition results (interim or final).
    Results(ResultsMessage),
    /// Server state notification (e.g. listening acknowledgment).
    State(StateMessage),
    /// Error reported by the service inside the stream.
    Error(ErrorMessage),
}

impl ServiceMessage {
    /// Parse a text frame into a classified message.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Envelope carrying one or more recognition results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsMessage {
    /// Results in utterance order.
    pub results: Vec<RecognitionResult>,
    /// Index of the first result within the session.
    #[serde(default)]
    pub result_index: i32,
}

/// A single recognition result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionResult {
    /// Whether the service will revise this result further.
    #[serde(rename = "final")]
    pub is_final: bool,
    /// Transcription hypotheses, best first.
    pub alternatives: Vec<TranscriptAlternative>,
}

/// One transcription hypothesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptAlternative {
    /// Transcribed text.
    pub transcript: String,
    /// Confidence score (0.0 to 1.0), typically present on finals only.
    pub confidence: Option<f64>,
    /// Per-word timing: `[word, start_seconds, end_seconds]`.
    #[serde(default)]
    pub timestamps: Option<Vec<WordTiming>>,
    /// Per-word confidence: `[word, confidence]`.
    #[serde(default)]
    pub word_confidence: Option<Vec<WordConfidence>>,
}

/// Word-level timing entry `(word, start, end)`.
pub type WordTiming = (String, f64, f64);

/// Word-level confidence entry `(word, confidence)`.
pub type WordConfidence = (String, f64);

/// Server state notification. Observed and discarded by the session; a
/// repeated `listening` doubles as the end-of-speech signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMessage {
    /// The reported state, e.g. `"listening"`.
    pub state: String,
}

impl StateMessage {
    /// Whether this is the listening acknowledgment.
    pub fn is_listening(&self) -> bool {
        self.state == "listening"
    }
}

/// Error payload from the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error description.
    pub error: String,
    /// Service-assigned error code, when present.
    #[serde(default)]
    pub code: Option<i32>,
}

// =============================================================================
// Outbound control messages
// =============================================================================

/// Stop control message sent after audio production ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopMessage {
    /// Always `"stop"`.
    pub action: String,
}

impl StopMessage {
    /// Create a stop message.
    pub fn new() -> Self {
        Self {
            action: "stop".to_string(),
        }
    }
}

impl Default for StopMessage {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Caller-facing result projections
// =============================================================================

/// A provisional transcription of an in-progress utterance, surfaced
/// incrementally through the interim callback.
#[derive(Debug, Clone)]
pub struct InterimResult {
    /// Best-hypothesis transcript so far.
    pub transcript: String,
    /// Confidence, when the service provides one for interims.
    pub confidence: Option<f64>,
}

/// A transcription the service will not revise further, accumulated and
/// surfaced in the completion callback.
#[derive(Debug, Clone)]
pub struct FinalResult {
    /// Best-hypothesis transcript.
    pub transcript: String,
    /// All hypotheses, best first.
    pub alternatives: Vec<TranscriptAlternative>,
    /// Per-word timing of the best hypothesis, when requested.
    pub timestamps: Option<Vec<WordTiming>>,
    /// Per-word confidence of the best hypothesis, when requested.
    pub word_confidence: Option<Vec<WordConfidence>>,
}

impl RecognitionResult {
    /// Project an interim result. `None` when the result carries no
    /// hypothesis.
    pub fn to_interim(&self) -> Option<InterimResult> {
        self.alternatives.first().map(|alt| InterimResult {
            transcript: alt.transcript.clone(),
            confidence: alt.confidence,
        })
    }

    /// Project a final result. `None` when the result carries no hypothesis.
    pub fn to_final(&self) -> Option<FinalResult> {
        self.alternatives.first().map(|best| FinalResult {
            transcript: best.transcript.clone(),
            alternatives: self.alternatives.clone(),
            timestamps: best.timestamps.clone(),
            word_confidence: best.word_confidence.clone(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
