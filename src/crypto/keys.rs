//! Key material and per-session key derivation.
//!
//! Session keys are split from one ECDH shared secret with HKDF-SHA256.
//! The salt binds the keys to the session, the `info` string binds each key
//! to exactly one purpose:
//!
//! ```text
//! shared_secret ─[extract, salt = "ltp-v0.5-{session_id}"]─► PRK
//!     PRK ─[expand, "ltp-encryption-key"]─► encryption_key (32 bytes)
//!     PRK ─[expand, "ltp-mac-key"]────────► mac_key        (32 bytes)
//!     PRK ─[expand, "ltp-iv-key"]─────────► iv_key         (16 bytes)
//! ```

use std::fmt;

use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::error::CryptoError;
use super::CryptoProvider;

/// Salt prefix for session key derivation
pub const SESSION_SALT_PREFIX: &str = "ltp-v0.5-";

/// HKDF info for the AEAD encryption key
pub const INFO_ENCRYPTION_KEY: &str = "ltp-encryption-key";

/// HKDF info for the envelope MAC key
pub const INFO_MAC_KEY: &str = "ltp-mac-key";

/// HKDF info for the IV key
pub const INFO_IV_KEY: &str = "ltp-iv-key";

/// Encryption key length (AES-256)
pub const ENCRYPTION_KEY_LEN: usize = 32;

/// MAC key length (HMAC-SHA256)
pub const MAC_KEY_LEN: usize = 32;

/// IV key length
pub const IV_KEY_LEN: usize = 16;

/// Errors from key material handling
#[derive(Debug, Error)]
pub enum KeyError {
    /// Key material is empty
    #[error("Key material is empty")]
    Empty,

    /// Key has the wrong length for its purpose
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Required length
        expected: usize,
        /// Length supplied
        actual: usize,
    },

    /// Hex input could not be decoded
    #[error("Invalid hex key: {0}")]
    InvalidHex(String),

    /// HKDF rejected the requested output
    #[error("Key derivation failed: {0}")]
    DerivationFailed(String),
}

/// Secret bytes, zeroized on drop and redacted in `Debug`.
#[derive(Clone)]
pub struct KeyMaterial {
    bytes: Zeroizing<Vec<u8>>,
}

impl KeyMaterial {
    /// Create new key material from bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    /// Create key material from a hex string
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str).map_err(|e| KeyError::InvalidHex(e.to_string()))?;
        Ok(Self::new(bytes))
    }

    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Get the key length
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Check if the key is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial([REDACTED, {} bytes])", self.bytes.len())
    }
}

impl PartialEq for KeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        super::constant_time_eq(self.as_bytes(), other.as_bytes())
    }
}

impl Eq for KeyMaterial {}

/// The three purpose-separated keys of one session.
///
/// Derived once per `handshake_ack` and dropped when the session ends.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    encryption_key: [u8; ENCRYPTION_KEY_LEN],
    mac_key: [u8; MAC_KEY_LEN],
    iv_key: [u8; IV_KEY_LEN],
}

impl SessionKeys {
    /// Derive session keys from a shared secret with the given provider.
    pub fn derive(
        provider: &dyn CryptoProvider,
        shared_secret: &KeyMaterial,
        session_id: &str,
    ) -> Result<Self, CryptoError> {
        if shared_secret.is_empty() {
            return Err(KeyError::Empty.into());
        }

        let salt = format!("{SESSION_SALT_PREFIX}{session_id}");
        let expand = |info: &str, len: usize| {
            provider.hkdf(
                shared_secret.as_bytes(),
                salt.as_bytes(),
                info.as_bytes(),
                len,
            )
        };

        let mut keys = Self {
            encryption_key: [0u8; ENCRYPTION_KEY_LEN],
            mac_key: [0u8; MAC_KEY_LEN],
            iv_key: [0u8; IV_KEY_LEN],
        };
        copy_exact(
            &mut keys.encryption_key,
            &expand(INFO_ENCRYPTION_KEY, ENCRYPTION_KEY_LEN)?,
        )?;
        copy_exact(&mut keys.mac_key, &expand(INFO_MAC_KEY, MAC_KEY_LEN)?)?;
        copy_exact(&mut keys.iv_key, &expand(INFO_IV_KEY, IV_KEY_LEN)?)?;
        Ok(keys)
    }

    /// AES-256-GCM key
    pub fn encryption_key(&self) -> KeyMaterial {
        KeyMaterial::new(self.encryption_key.to_vec())
    }

    /// HMAC-SHA256 key for envelope signatures
    pub fn mac_key(&self) -> KeyMaterial {
        KeyMaterial::new(self.mac_key.to_vec())
    }

    /// IV key
    pub fn iv_key(&self) -> KeyMaterial {
        KeyMaterial::new(self.iv_key.to_vec())
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys")
            .field("encryption_key", &"[REDACTED]")
            .field("mac_key", &"[REDACTED]")
            .field("iv_key", &"[REDACTED]")
            .finish()
    }
}

/// Derive `(encryption_key, mac_key, iv_key)` with the software provider.
pub fn derive_session_keys(
    shared_secret: &KeyMaterial,
    session_id: &str,
) -> Result<SessionKeys, CryptoError> {
    SessionKeys::derive(&super::SoftwareCrypto, shared_secret, session_id)
}

fn copy_exact(dst: &mut [u8], src: &KeyMaterial) -> Result<(), KeyError> {
    if src.len() != dst.len() {
        return Err(KeyError::InvalidLength {
            expected: dst.len(),
            actual: src.len(),
        });
    }
    dst.copy_from_slice(src.as_bytes());
    Ok(())
}
