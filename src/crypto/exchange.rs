//! ECDH P-256 key exchange.
//!
//! Each handshake uses an ephemeral keypair. Public keys are SEC1
//! uncompressed points (`0x04 || x || y`, 65 bytes) and travel base64
//! encoded inside handshake messages.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use thiserror::Error;

use super::error::CryptoError;
use super::keys::{KeyMaterial, SessionKeys};
use super::CryptoProvider;

/// Length of an uncompressed SEC1 P-256 point
pub const PUBLIC_KEY_LEN: usize = 65;

/// Errors from key exchange operations
#[derive(Debug, Error)]
pub enum KeyExchangeError {
    /// Invalid public key
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Invalid private key
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// Shared secret requested before the peer key arrived
    #[error("Key exchange incomplete")]
    Incomplete,
}

/// P-256 public key
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(p256::PublicKey);

impl PublicKey {
    /// Parse a SEC1-encoded point (compressed or uncompressed)
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, KeyExchangeError> {
        p256::PublicKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|_| {
                KeyExchangeError::InvalidPublicKey(format!(
                    "{} bytes, not a valid P-256 point",
                    bytes.len()
                ))
            })
    }

    /// Parse a base64 SEC1 point as carried in handshake messages
    pub fn from_base64(encoded: &str) -> Result<Self, KeyExchangeError> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| KeyExchangeError::InvalidPublicKey(e.to_string()))?;
        Self::from_sec1_bytes(&bytes)
    }

    /// Uncompressed SEC1 encoding
    pub fn to_sec1_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(false).as_bytes().to_vec()
    }

    /// Base64 of the uncompressed SEC1 encoding
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_sec1_bytes())
    }

    fn inner(&self) -> &p256::PublicKey {
        &self.0
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bytes = self.to_sec1_bytes();
        write!(f, "PublicKey([{}...])", hex::encode(&bytes[1..5]))
    }
}

/// P-256 key pair (private + public)
pub struct KeyPair {
    secret: p256::SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secret = p256::SecretKey::random(&mut rand::rngs::OsRng);
        let public = PublicKey(secret.public_key());
        Self { secret, public }
    }

    /// Restore from a 32-byte big-endian private scalar
    pub fn from_secret(secret_bytes: &[u8]) -> Result<Self, KeyExchangeError> {
        if secret_bytes.len() != 32 {
            return Err(KeyExchangeError::InvalidPrivateKey(format!(
                "Expected 32 bytes, got {}",
                secret_bytes.len()
            )));
        }
        let secret = p256::SecretKey::from_slice(secret_bytes)
            .map_err(|_| KeyExchangeError::InvalidPrivateKey("scalar out of range".to_string()))?;
        let public = PublicKey(secret.public_key());
        Ok(Self { secret, public })
    }

    /// Get the public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// `ECDH(local_private, peer_public)`, the raw x-coordinate
    pub fn diffie_hellman(&self, peer_public: &PublicKey) -> KeyMaterial {
        let shared = p256::ecdh::diffie_hellman(
            self.secret.to_nonzero_scalar(),
            peer_public.inner().as_affine(),
        );
        KeyMaterial::new(shared.raw_secret_bytes().to_vec())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// One side of a handshake key exchange
#[derive(Debug)]
pub struct KeyExchange {
    key_pair: KeyPair,
    shared_secret: Option<KeyMaterial>,
}

impl KeyExchange {
    /// Start an exchange with a fresh ephemeral keypair from `provider`
    pub fn new(provider: &dyn CryptoProvider) -> Self {
        Self::with_key_pair(provider.generate_keypair())
    }

    /// Create from an existing key pair
    pub fn with_key_pair(key_pair: KeyPair) -> Self {
        Self {
            key_pair,
            shared_secret: None,
        }
    }

    /// Our public key to send to the peer
    pub fn public_key(&self) -> &PublicKey {
        self.key_pair.public_key()
    }

    /// Record the peer's public key and compute the shared secret
    pub fn complete(&mut self, provider: &dyn CryptoProvider, peer_public: &PublicKey) {
        self.shared_secret = Some(provider.shared_secret(&self.key_pair, peer_public));
    }

    /// Shared secret (None until [`complete`](Self::complete))
    pub fn shared_secret(&self) -> Option<&KeyMaterial> {
        self.shared_secret.as_ref()
    }

    /// Derive the session's key set from the shared secret
    pub fn derive_session_keys(
        &self,
        provider: &dyn CryptoProvider,
        session_id: &str,
    ) -> Result<SessionKeys, CryptoError> {
        let secret = self
            .shared_secret
            .as_ref()
            .ok_or(KeyExchangeError::Incomplete)?;
        SessionKeys::derive(provider, secret, session_id)
    }

    /// Check if key exchange is complete
    pub fn is_complete(&self) -> bool {
        self.shared_secret.is_some()
    }
}
