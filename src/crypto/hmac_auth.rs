//! HMAC-SHA256 authentication for envelope signatures.
//!
//! Signatures travel as lowercase hex. Verifiers recompute the expected
//! hex string and compare it with [`constant_time_eq`].

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use super::HMAC_TAG_SIZE;

type HmacSha256 = Hmac<Sha256>;

/// Errors from HMAC operations
#[derive(Debug, Error)]
pub enum HmacError {
    /// Invalid key
    #[error("Invalid HMAC key: {0}")]
    InvalidKey(String),
}

/// One-shot HMAC-SHA256
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; HMAC_TAG_SIZE], HmacError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| HmacError::InvalidKey(e.to_string()))?;
    mac.update(data);

    let mut tag = [0u8; HMAC_TAG_SIZE];
    tag.copy_from_slice(&mac.finalize().into_bytes());
    Ok(tag)
}

/// Constant-time comparison.
///
/// Inputs of different length compare unequal immediately; equal-length
/// inputs are compared without an early exit.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;

    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
