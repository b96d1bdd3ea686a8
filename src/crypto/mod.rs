//! Cryptographic primitives for LTP sessions.
//!
//! - **ECDH P-256**: ephemeral key agreement during the handshake
//! - **HKDF-SHA256**: split the shared secret into purpose-bound keys
//! - **HMAC-SHA256**: envelope signatures
//! - **AES-256-GCM**: authenticated encryption with random 96-bit IVs
//!
//! # Provider
//!
//! The session engine never calls a crypto library directly; it goes
//! through a [`CryptoProvider`] chosen once at construction. The default
//! [`SoftwareCrypto`] is backed by the RustCrypto crates.
//!
//! ```
//! use ltp::crypto::{CryptoProvider, SoftwareCrypto, SessionKeys};
//!
//! let provider = SoftwareCrypto;
//! let alice = provider.generate_keypair();
//! let bob = provider.generate_keypair();
//!
//! let secret = provider.shared_secret(&alice, bob.public_key());
//! let keys = SessionKeys::derive(&provider, &secret, "session-1").unwrap();
//!
//! let sealed = provider.encrypt(b"hello", &keys.encryption_key()).unwrap();
//! let opened = provider.decrypt(&sealed, &keys.encryption_key()).unwrap();
//! assert_eq!(opened, b"hello");
//! ```

mod aead;
mod error;
mod exchange;
mod hmac_auth;
mod keys;

use std::fmt;

use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;

pub use aead::{decrypt, encrypt, AeadCipher, AeadError, EncryptedPayload};
pub use error::CryptoError;
pub use exchange::{KeyExchange, KeyExchangeError, KeyPair, PublicKey, PUBLIC_KEY_LEN};
pub use hmac_auth::{constant_time_eq, hmac_sha256, HmacError};
pub use keys::{
    derive_session_keys, KeyError, KeyMaterial, SessionKeys, ENCRYPTION_KEY_LEN,
    INFO_ENCRYPTION_KEY, INFO_IV_KEY, INFO_MAC_KEY, IV_KEY_LEN, MAC_KEY_LEN,
    SESSION_SALT_PREFIX,
};

/// IV size for AES-256-GCM (96 bits)
pub const IV_SIZE: usize = 12;

/// Authentication tag size for AES-256-GCM (128 bits)
pub const AEAD_TAG_SIZE: usize = 16;

/// HMAC-SHA256 tag size (256 bits)
pub const HMAC_TAG_SIZE: usize = 32;

/// AES-256 key size
pub const MIN_KEY_SIZE: usize = 32;

/// Backend for every cryptographic operation the session engine performs.
pub trait CryptoProvider: Send + Sync + fmt::Debug {
    /// Fresh ephemeral P-256 keypair
    fn generate_keypair(&self) -> KeyPair;

    /// `ECDH(local_private, peer_public)`
    fn shared_secret(&self, local: &KeyPair, peer: &PublicKey) -> KeyMaterial;

    /// HKDF-SHA256 extract (salt as HMAC key over `ikm`) then expand with `info`
    fn hkdf(&self, ikm: &[u8], salt: &[u8], info: &[u8], len: usize)
        -> Result<KeyMaterial, CryptoError>;

    /// HMAC-SHA256 over `data`
    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> Result<[u8; HMAC_TAG_SIZE], CryptoError>;

    /// AES-256-GCM with a random IV
    fn encrypt(&self, plaintext: &[u8], key: &KeyMaterial)
        -> Result<EncryptedPayload, CryptoError>;

    /// AES-256-GCM open; tag mismatch is `AeadError::AuthenticationFailed`
    fn decrypt(&self, payload: &EncryptedPayload, key: &KeyMaterial)
        -> Result<Vec<u8>, CryptoError>;

    /// Length-checked constant-time equality
    fn constant_time_eq(&self, a: &[u8], b: &[u8]) -> bool;

    /// Bytes from a CSPRNG
    fn random_bytes(&self, len: usize) -> Vec<u8>;
}

/// RustCrypto-backed provider
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftwareCrypto;

impl CryptoProvider for SoftwareCrypto {
    fn generate_keypair(&self) -> KeyPair {
        KeyPair::generate()
    }

    fn shared_secret(&self, local: &KeyPair, peer: &PublicKey) -> KeyMaterial {
        local.diffie_hellman(peer)
    }

    fn hkdf(
        &self,
        ikm: &[u8],
        salt: &[u8],
        info: &[u8],
        len: usize,
    ) -> Result<KeyMaterial, CryptoError> {
        let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
        let mut okm = vec![0u8; len];
        hk.expand(info, &mut okm)
            .map_err(|e| KeyError::DerivationFailed(format!("HKDF expand failed: {e}")))?;
        Ok(KeyMaterial::new(okm))
    }

    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> Result<[u8; HMAC_TAG_SIZE], CryptoError> {
        Ok(hmac_sha256(key, data)?)
    }

    fn encrypt(
        &self,
        plaintext: &[u8],
        key: &KeyMaterial,
    ) -> Result<EncryptedPayload, CryptoError> {
        Ok(encrypt(plaintext, key)?)
    }

    fn decrypt(
        &self,
        payload: &EncryptedPayload,
        key: &KeyMaterial,
    ) -> Result<Vec<u8>, CryptoError> {
        Ok(decrypt(payload, key)?)
    }

    fn constant_time_eq(&self, a: &[u8], b: &[u8]) -> bool {
        constant_time_eq(a, b)
    }

    fn random_bytes(&self, len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        bytes
    }
}
