//! AES-256-GCM authenticated encryption.
//!
//! Every call to [`AeadCipher::encrypt`] draws a fresh random 96-bit IV.
//! The IV and the 128-bit tag travel next to the ciphertext in an
//! [`EncryptedPayload`]; decryption refuses any payload whose tag does not
//! verify and never returns partial plaintext.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use thiserror::Error;

use super::keys::KeyMaterial;
use super::{AEAD_TAG_SIZE, IV_SIZE, MIN_KEY_SIZE};

/// Errors from AEAD operations
#[derive(Debug, Error)]
pub enum AeadError {
    /// Invalid key
    #[error("Invalid AEAD key: {0}")]
    InvalidKey(String),

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Tag mismatch: ciphertext, IV or tag were altered, or the key is wrong
    #[error("Authentication failed")]
    AuthenticationFailed,
}

/// Output of one AES-256-GCM encryption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    /// Ciphertext without the tag
    pub ciphertext: Vec<u8>,
    /// Random 96-bit IV
    pub iv: [u8; IV_SIZE],
    /// 128-bit GCM tag
    pub tag: [u8; AEAD_TAG_SIZE],
}

/// AES-256-GCM cipher bound to one key
pub struct AeadCipher {
    cipher: Aes256Gcm,
}

impl AeadCipher {
    /// Create a new AEAD cipher with the given key
    pub fn new(key: &KeyMaterial) -> Result<Self, AeadError> {
        if key.len() != MIN_KEY_SIZE {
            return Err(AeadError::InvalidKey(format!(
                "Key must be {} bytes, got {}",
                MIN_KEY_SIZE,
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| AeadError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Encrypt with a random IV
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> Result<EncryptedPayload, AeadError> {
        let mut iv = [0u8; IV_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut iv);
        self.encrypt_with_iv(plaintext, &iv, associated_data)
    }

    /// Encrypt with a caller-chosen IV.
    ///
    /// An IV must never repeat under the same key.
    pub fn encrypt_with_iv(
        &self,
        plaintext: &[u8],
        iv: &[u8; IV_SIZE],
        associated_data: &[u8],
    ) -> Result<EncryptedPayload, AeadError> {
        let payload = Payload {
            msg: plaintext,
            aad: associated_data,
        };
        let mut sealed = self
            .cipher
            .encrypt(&Nonce::from(*iv), payload)
            .map_err(|e| AeadError::EncryptionFailed(e.to_string()))?;

        // aes-gcm appends the tag to the ciphertext
        let split = sealed.len() - AEAD_TAG_SIZE;
        let mut tag = [0u8; AEAD_TAG_SIZE];
        tag.copy_from_slice(&sealed[split..]);
        sealed.truncate(split);

        Ok(EncryptedPayload {
            ciphertext: sealed,
            iv: *iv,
            tag,
        })
    }

    /// Decrypt and authenticate
    pub fn decrypt(
        &self,
        encrypted: &EncryptedPayload,
        associated_data: &[u8],
    ) -> Result<Vec<u8>, AeadError> {
        let mut sealed = Vec::with_capacity(encrypted.ciphertext.len() + AEAD_TAG_SIZE);
        sealed.extend_from_slice(&encrypted.ciphertext);
        sealed.extend_from_slice(&encrypted.tag);

        let payload = Payload {
            msg: &sealed,
            aad: associated_data,
        };
        self.cipher
            .decrypt(&Nonce::from(encrypted.iv), payload)
            .map_err(|_| AeadError::AuthenticationFailed)
    }
}

impl std::fmt::Debug for AeadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AeadCipher([REDACTED])")
    }
}

/// Encrypt `plaintext` under `key` with a random IV and no associated data
pub fn encrypt(plaintext: &[u8], key: &KeyMaterial) -> Result<EncryptedPayload, AeadError> {
    AeadCipher::new(key)?.encrypt(plaintext, b"")
}

/// Decrypt a payload produced by [`encrypt`]
pub fn decrypt(encrypted: &EncryptedPayload, key: &KeyMaterial) -> Result<Vec<u8>, AeadError> {
    AeadCipher::new(key)?.decrypt(encrypted, b"")
}
