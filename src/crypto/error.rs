//! Unified cryptographic error type.
//!
//! Aggregates the per-primitive errors so callers can propagate any of
//! them with `?` while keeping the full chain through `#[source]`.

use thiserror::Error;

use super::aead::AeadError;
use super::exchange::KeyExchangeError;
use super::hmac_auth::HmacError;
use super::keys::KeyError;

/// Unified error type for all cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD encryption/decryption error.
    ///
    /// A tag mismatch surfaces as `Aead(AeadError::AuthenticationFailed)`.
    #[error("AEAD: {0}")]
    Aead(#[source] AeadError),

    /// HMAC authentication error.
    #[error("HMAC: {0}")]
    Hmac(#[source] HmacError),

    /// Key material error (empty, wrong length, derivation failure).
    #[error("Key: {0}")]
    Key(#[source] KeyError),

    /// ECDH key exchange error.
    #[error("Key exchange: {0}")]
    Exchange(#[source] KeyExchangeError),
}

impl CryptoError {
    /// True when a ciphertext failed GCM authentication
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, CryptoError::Aead(AeadError::AuthenticationFailed))
    }
}

impl From<AeadError> for CryptoError {
    fn from(err: AeadError) -> Self {
        CryptoError::Aead(err)
    }
}

impl From<HmacError> for CryptoError {
    fn from(err: HmacError) -> Self {
        CryptoError::Hmac(err)
    }
}

impl From<KeyError> for CryptoError {
    fn from(err: KeyError) -> Self {
        CryptoError::Key(err)
    }
}

impl From<KeyExchangeError> for CryptoError {
    fn from(err: KeyExchangeError) -> Self {
        CryptoError::Exchange(err)
    }
}
