//! Token acquisition and single-flight refresh.
//!
//! The token endpoint is exchanged synchronously (one HTTP round trip) using
//! the stored credentials. The returned opaque token string is cached in
//! process memory and presented on subsequent connection attempts. No expiry
//! is tracked client-side; expiry is detected by a failed authenticated
//! request, which triggers exactly one [`TokenManager::refresh`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use url::form_urlencoded;

use crate::errors::{TranscribeError, TranscribeResult};

// =============================================================================
// Constants
// =============================================================================

/// Default end-to-end timeout for one token exchange.
const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default TCP/TLS connect timeout for the token endpoint.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Credentials
// =============================================================================

/// Service credentials used for the token exchange.
///
/// Immutable once constructed. The `Debug` implementation redacts secret
/// material so credentials can appear in log events safely.
#[derive(Clone)]
pub enum Credentials {
    /// Username/password pair exchanged via HTTP Basic authentication.
    Basic {
        /// Account username.
        username: String,
        /// Account password.
        password: String,
    },
    /// Opaque API key exchanged via a form-encoded grant.
    ApiKey(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::ApiKey(_) => f.debug_tuple("ApiKey").field(&"<redacted>").finish(),
        }
    }
}

// =============================================================================
// Token
// =============================================================================

/// An opaque bearer token plus the instant it was obtained.
///
/// Lives only in process memory; never serialized or persisted.
#[derive(Debug, Clone)]
pub struct Token {
    /// The opaque token string presented to the service.
    pub value: String,
    /// When this token was obtained, for diagnostics.
    pub obtained_at: Instant,
}

/// Shape of the JSON body returned by the api-key grant.
#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Outcome of the most recent refresh, shared with waiters that queued
/// behind it. The error side keeps only what is needed to rebuild an
/// equivalent `TranscribeError::Auth`.
type RefreshOutcome = Result<Token, (Option<u16>, String)>;

// =============================================================================
// TokenManager
// =============================================================================

/// Obtains, caches, and refreshes the bearer token for one set of
/// credentials.
///
/// The cached token is shared process-wide read state; writes go through the
/// single-flight [`refresh`](Self::refresh) path so concurrent consumers that
/// all observe the same authentication failure cannot cause a refresh storm.
pub struct TokenManager {
    credentials: Credentials,
    token_url: String,
    http: reqwest::Client,
    cached: RwLock<Option<Token>>,
    /// Serializes exchanges; at most one is in flight at a time.
    exchange_gate: Mutex<()>,
    /// Bumped after every completed refresh (success or failure).
    generation: AtomicU64,
    /// Outcome of the generation's refresh, for waiters to share.
    last_outcome: parking_lot::Mutex<Option<RefreshOutcome>>,
}

impl TokenManager {
    /// Create a token manager for the given credentials and token endpoint
    /// URL, using the default exchange timeouts.
    pub fn new(credentials: Credentials, token_url: impl Into<String>) -> TranscribeResult<Self> {
        Self::with_timeout(credentials, token_url, DEFAULT_EXCHANGE_TIMEOUT)
    }

    /// Create a token manager with a caller-specified exchange timeout.
    ///
    /// The timeout bounds the whole exchange; on elapse the exchange fails
    /// rather than hanging indefinitely.
    pub fn with_timeout(
        credentials: Credentials,
        token_url: impl Into<String>,
        timeout: Duration,
    ) -> TranscribeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT.min(timeout))
            .build()
            .map_err(|e| TranscribeError::Auth {
                status: None,
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            credentials,
            token_url: token_url.into(),
            http,
            cached: RwLock::new(None),
            exchange_gate: Mutex::new(()),
            generation: AtomicU64::new(0),
            last_outcome: parking_lot::Mutex::new(None),
        })
    }

    /// Return the cached token, performing the credential exchange on first
    /// use.
    ///
    /// Failures surface immediately; `acquire` never retries internally.
    pub async fn acquire(&self) -> TranscribeResult<Token> {
        {
            let cached = self.cached.read().await;
            if let Some(token) = cached.as_ref() {
                return Ok(token.clone());
            }
        }

        // First fill goes through the gate so parallel cold starts collapse
        // into one exchange.
        let _gate = self.exchange_gate.lock().await;
        {
            let cached = self.cached.read().await;
            if let Some(token) = cached.as_ref() {
                return Ok(token.clone());
            }
        }

        let token = self.exchange().await?;
        *self.cached.write().await = Some(token.clone());
        debug!("acquired initial authentication token");
        Ok(token)
    }

    /// Perform a fresh credential exchange and replace the cached token.
    ///
    /// Always exchanges; there is no cached short-circuit. Invoked after a
    /// consumer observes an authentication failure on an authenticated
    /// request. Concurrent callers that arrive while a refresh is in flight
    /// wait for it and share its outcome instead of issuing duplicate
    /// exchanges.
    pub async fn refresh(&self) -> TranscribeResult<Token> {
        let observed = self.generation.load(Ordering::Acquire);
        let _gate = self.exchange_gate.lock().await;

        if self.generation.load(Ordering::Acquire) != observed {
            // A refresh completed while we waited; its outcome is ours.
            let shared = self.last_outcome.lock().clone();
            if let Some(outcome) = shared {
                return match outcome {
                    Ok(token) => Ok(token),
                    Err((status, message)) => Err(TranscribeError::Auth { status, message }),
                };
            }
        }

        let result = self.exchange().await;
        match &result {
            Ok(token) => {
                *self.cached.write().await = Some(token.clone());
                *self.last_outcome.lock() = Some(Ok(token.clone()));
                debug!("refreshed authentication token");
            }
            Err(e) => {
                warn!("token refresh failed: {e}");
                let detail = match e {
                    TranscribeError::Auth { status, message } => (*status, message.clone()),
                    other => (None, other.to_string()),
                };
                *self.last_outcome.lock() = Some(Err(detail));
            }
        }
        self.generation.fetch_add(1, Ordering::Release);
        result
    }

    /// One credential exchange round trip against the token endpoint.
    async fn exchange(&self) -> TranscribeResult<Token> {
        let request = match &self.credentials {
            Credentials::Basic { username, password } => {
                let basic = BASE64.encode(format!("{username}:{password}"));
                self.http
                    .get(self.token_url.as_str())
                    .header(AUTHORIZATION, format!("Basic {basic}"))
            }
            Credentials::ApiKey(key) => {
                let encoded: String = form_urlencoded::byte_serialize(key.as_bytes()).collect();
                self.http
                    .post(self.token_url.as_str())
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(format!("grant_type=apikey&apikey={encoded}"))
            }
        };

        let response = request.send().await.map_err(|e| TranscribeError::Auth {
            status: None,
            message: format!("token exchange request failed: {e}"),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(TranscribeError::Auth {
                status: Some(status.as_u16()),
                message: format!("token endpoint rejected exchange: {body}"),
            });
        }

        let value = match &self.credentials {
            Credentials::Basic { .. } => {
                // Basic exchange returns the raw token string as the body.
                response.text().await.map_err(|e| TranscribeError::Auth {
                    status: None,
                    message: format!("failed to read token body: {e}"),
                })?
            }
            Credentials::ApiKey(_) => {
                let parsed: TokenResponse =
                    response.json().await.map_err(|e| TranscribeError::Auth {
                        status: None,
                        message: format!("failed to parse token response: {e}"),
                    })?;
                parsed.access_token
            }
        };

        Ok(Token {
            value,
            obtained_at: Instant::now(),
        })
    }
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("credentials", &self.credentials)
            .field("token_url", &self.token_url)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
