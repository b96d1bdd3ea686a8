//! LTP client error types.
//!
//! Failures map onto the recovery taxonomy of the session engine:
//!
//! | Class | Variant | Recovery |
//! |-------|---------|----------|
//! | transport failure | `Transport` | reconnect with backoff |
//! | protocol rejection | `ProtocolRejection` | one fresh `handshake_init`, then fatal |
//! | retry exhaustion | `RetryExhausted` | fatal until the caller connects again |
//! | manual disconnect | `ClientDisconnected` | none, pending connects are rejected |
//! | GCM tag mismatch | `Crypto(Aead(AuthenticationFailed))` | fatal for that decrypt |
//!
//! Signing degradation and verification mismatches never surface as errors;
//! they are logged.

use thiserror::Error;

use crate::crypto::CryptoError;

/// LTP client errors.
#[derive(Error, Debug)]
pub enum LtpError {
    /// Socket-level failure (open, send, close).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Server refused the handshake and no retry remains.
    #[error("Handshake rejected: {reason}")]
    ProtocolRejection {
        /// Reason given by the server.
        reason: String,
    },

    /// Reconnection gave up.
    #[error("Reconnect failed after {attempts} attempts: {cause}")]
    RetryExhausted {
        /// Attempts made.
        attempts: u32,
        /// What caused the final disconnection.
        cause: String,
    },

    /// `disconnect()` was called while the operation was pending.
    #[error("Client disconnected")]
    ClientDisconnected,

    /// The client is in the permanently failed state.
    #[error("Session permanently failed: {0}")]
    PermanentlyFailed(String),

    /// The session driver task is gone.
    #[error("Session driver stopped")]
    Shutdown,

    /// Invalid message format.
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Cryptographic operation failed.
    ///
    /// This variant preserves the full error chain via `#[source]`.
    #[error("Crypto error: {0}")]
    Crypto(#[source] CryptoError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for LTP operations
pub type Result<T> = std::result::Result<T, LtpError>;

impl From<CryptoError> for LtpError {
    fn from(err: CryptoError) -> Self {
        LtpError::Crypto(err)
    }
}

impl LtpError {
    /// True for errors that end the session for good
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LtpError::ProtocolRejection { .. }
                | LtpError::RetryExhausted { .. }
                | LtpError::PermanentlyFailed(_)
        )
    }
}
