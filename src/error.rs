//! Failures that callers need to tell apart.
//!
//! Everything else travels as `anyhow::Error` with context attached at the
//! call site; these variants are raised through `anyhow` as well and can be
//! recovered with `downcast_ref::<PipelineError>()`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// `join` was started before `build-rev` populated the reverse index.
    #[error("reverse index '{map}' is empty; run build-rev first")]
    EmptyReverseIndex { map: &'static str },

    /// The server answered with something other than 200 or 206.
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// The downloaded bytes do not hash to the expected value.
    #[error("SHA-256 mismatch: expected={expected} got={actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("invalid SHA-256 digest '{0}': expected 64 hex characters")]
    InvalidDigest(String),
}
