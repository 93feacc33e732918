//! Error types shared across the transcription client.
//!
//! Every fallible operation in this crate returns [`TranscribeError`]. The
//! variants map one-to-one onto the failure classes a caller can meaningfully
//! distinguish: authentication, connection establishment, channel lifetime,
//! wire protocol, device ownership, session reuse, timeouts, and errors the
//! service itself reports inside the stream.

use thiserror::Error;

/// Errors that can occur while establishing or running a transcription session.
#[derive(Debug, Error)]
pub enum TranscribeError {
    /// Credential exchange failed or an authenticated request was rejected.
    ///
    /// `status` carries the HTTP status when the failure came from a
    /// response; it is `None` for transport-level failures during the
    /// exchange.
    #[error("authentication failed{}: {message}", fmt_status(.status))]
    Auth {
        /// HTTP status of the rejecting response, when one was received.
        status: Option<u16>,
        /// Human-readable cause.
        message: String,
    },

    /// The transport connection could not be established (DNS, TLS,
    /// handshake, or refused connection).
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// A send was attempted after the channel terminated.
    #[error("channel closed")]
    ChannelClosed,

    /// An inbound message did not match any recognized wire shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The capture device is already owned by another session.
    #[error("capture device busy: {0}")]
    DeviceBusy(String),

    /// `start` was called on a session that has not reached a terminal state.
    #[error("session already active")]
    AlreadyActive,

    /// An operation exceeded its time bound.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The service reported an error inside the message stream.
    #[error("service error{}: {message}", fmt_code(.code))]
    Service {
        /// Service-assigned error code, when present.
        code: Option<i32>,
        /// Error description from the service payload.
        message: String,
    },

    /// The capture device failed while producing audio.
    #[error("capture failed: {0}")]
    Capture(String),

    /// The session settings could not be serialized or are invalid.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

impl TranscribeError {
    /// Whether this error represents an authentication rejection that is
    /// eligible for the single refresh-and-retry pass.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::Auth { status: Some(s), .. } if *s == 401)
    }
}

/// Result type for transcription operations.
pub type TranscribeResult<T> = Result<T, TranscribeError>;

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

fn fmt_code(code: &Option<i32>) -> String {
    code.map(|c| format!(" ({c})")).unwrap_or_default()
}
