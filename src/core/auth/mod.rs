//! Token-based authentication for the transcription service.
//!
//! Every outbound connection attempt presents a bearer token obtained from
//! the service's token endpoint. [`TokenManager`] owns the exchange: it
//! caches the token process-wide, and refreshes it single-flight when a
//! consumer observes an authentication failure on an authenticated request.

mod token;

pub use token::{Credentials, Token, TokenManager};
