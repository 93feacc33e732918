//! Logging bootstrap for binaries and tests embedding this crate.
//!
//! The library itself only emits `tracing` events; nothing is printed unless
//! a subscriber is installed. Call [`init_tracing`] once at startup:
//!
//! ```rust
//! streamscribe::init::init_tracing();
//! ```

/// Install a global stderr subscriber.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .try_init();
}
