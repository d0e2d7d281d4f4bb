//! Error types for the licensing core.
//!
//! Storage and transport failures are modeled separately because callers
//! react differently to them; `LicenseError` is the umbrella the manager
//! boundary exposes. Raw I/O and crypto errors never cross that boundary:
//! `LicenseManager` maps everything into a `ValidationVerdict`.

use thiserror::Error;

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;

/// Errors from the encrypted license store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No license file exists where one was required.
    #[error("no license file found")]
    Missing,

    /// The envelope could not be decrypted.
    ///
    /// Distinct from `Missing`: a wrong key means the file came from a
    /// different machine (or was corrupted), and callers must show
    /// hardware-mismatch messaging rather than prompt for re-activation.
    #[error("license file could not be decrypted: {0}")]
    DecryptFailure(String),

    /// Writing the license file failed.
    #[error("failed to write license file: {0}")]
    WriteFailure(String),

    /// Reading the license file failed for a reason other than absence.
    #[error("failed to read license file: {0}")]
    ReadFailure(String),

    /// The decrypted payload was not a valid record.
    #[error("invalid license payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// Errors from the signed transport client.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request exceeded its timeout.
    #[error("request timed out")]
    Timeout,

    /// The server could not be reached (DNS, connection refused, no route).
    #[error("server unreachable: {0}")]
    Offline(String),

    /// TLS negotiation failed.
    ///
    /// Not treated as offline: a TLS failure can indicate interception,
    /// so it must never silently downgrade to "try again later".
    #[error("tls failure: {0}")]
    Tls(String),

    /// The server signalled backpressure (HTTP 429).
    #[error("rate limited")]
    RateLimited,

    /// The server returned a 5xx fault.
    #[error("server fault (http {0})")]
    ServerFault(u16),

    /// The response body could not be parsed.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Umbrella error for license operations.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// Storage error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Crypto error (key derivation or envelope handling).
    #[error("crypto error: {0}")]
    Crypto(#[from] meshbind_crypto::CryptoError),

    /// The activation request was rejected by the server.
    #[error("activation failed: {0}")]
    ActivationFailed(String),

    /// Another activation is already in flight on this manager.
    #[error("an activation is already in progress")]
    ActivationInProgress,

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
