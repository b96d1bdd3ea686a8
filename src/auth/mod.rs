//! Envelope authentication.
//!
//! Outbound envelopes get a fresh nonce and an HMAC-SHA256 signature over a
//! canonical serialization of their signable fields:
//!
//! ```text
//! {"type", "thread_id", "session_id"?, "timestamp", "nonce", "payload"}
//! ```
//!
//! Fields are emitted in exactly that order and object keys inside the
//! payload are sorted, so both peers produce the same bytes for the same
//! message. The session MAC key signs when a key exchange completed,
//! otherwise the configured secret does. With neither, or when signing
//! fails, the envelope carries [`PLACEHOLDER_SIGNATURE`] and is still sent.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::{CryptoProvider, KeyMaterial};
use crate::error::Result;
use crate::protocol::{unix_millis, Envelope, PLACEHOLDER_SIGNATURE};

/// Random bytes in a nonce suffix (16 hex chars)
const NONCE_RANDOM_BYTES: usize = 8;

/// How inbound signature mismatches are handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationPolicy {
    /// Verify off the delivery path, log mismatches, always deliver
    #[default]
    Lenient,
    /// Deliver only messages whose signature verifies
    Strict,
}

/// Result of checking one inbound envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Signature matches
    Valid,
    /// Signature present but wrong
    Mismatch,
    /// No signature, or the placeholder marker
    Unsigned,
    /// No key to verify with
    NoKey,
}

impl Verification {
    /// True only for [`Verification::Valid`]
    pub fn is_valid(self) -> bool {
        self == Self::Valid
    }
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Valid => "valid",
            Self::Mismatch => "signature mismatch",
            Self::Unsigned => "unsigned",
            Self::NoKey => "no verification key",
        })
    }
}

#[derive(Serialize)]
struct Signable<'a> {
    #[serde(rename = "type")]
    msg_type: &'a str,
    thread_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    timestamp: i64,
    nonce: &'a str,
    payload: &'a Value,
}

/// Canonical bytes covered by an envelope's signature
pub fn canonical_bytes(envelope: &Envelope) -> Result<Vec<u8>> {
    let signable = Signable {
        msg_type: envelope.msg_type.as_str(),
        thread_id: envelope.thread_id.as_deref(),
        session_id: envelope.session_id.as_deref(),
        timestamp: envelope.timestamp,
        nonce: envelope.nonce.as_deref().unwrap_or_default(),
        payload: &envelope.payload,
    };
    Ok(serde_json::to_vec(&signable)?)
}

/// Signs outbound and verifies inbound envelopes.
///
/// Cheap to clone; verification tasks take their own copy.
#[derive(Clone)]
pub struct AuthPipeline {
    client_id: String,
    provider: Arc<dyn CryptoProvider>,
    secret: Option<KeyMaterial>,
    policy: VerificationPolicy,
}

impl AuthPipeline {
    /// Pipeline for `client_id`. An empty `secret` counts as unset.
    pub fn new(
        client_id: impl Into<String>,
        provider: Arc<dyn CryptoProvider>,
        secret: Option<&str>,
        policy: VerificationPolicy,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            provider,
            secret: secret
                .filter(|s| !s.is_empty())
                .map(|s| KeyMaterial::new(s.as_bytes().to_vec())),
            policy,
        }
    }

    /// Verification policy in effect
    pub fn policy(&self) -> VerificationPolicy {
        self.policy
    }

    /// True when a shared secret is configured
    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// `"{client_id}-{unix_ms}-{16 hex chars}"`
    pub fn generate_nonce(&self) -> String {
        let random = self.provider.random_bytes(NONCE_RANDOM_BYTES);
        format!("{}-{}-{}", self.client_id, unix_millis(), hex::encode(random))
    }

    fn key<'a>(&'a self, session_key: Option<&'a KeyMaterial>) -> Option<&'a KeyMaterial> {
        session_key.or(self.secret.as_ref())
    }

    fn signature(&self, envelope: &Envelope, key: &KeyMaterial) -> Result<String> {
        let data = canonical_bytes(envelope)?;
        let tag = self.provider.hmac_sha256(key.as_bytes(), &data)?;
        Ok(hex::encode(tag))
    }

    /// Attach a nonce and signature. Never fails: without a usable key the
    /// placeholder marker is written instead.
    pub fn sign(&self, envelope: &mut Envelope, session_key: Option<&KeyMaterial>) {
        envelope.nonce = Some(self.generate_nonce());

        let signature = match self.key(session_key) {
            Some(key) => match self.signature(envelope, key) {
                Ok(signature) => signature,
                Err(e) => {
                    tracing::warn!(
                        "Signing {} failed, sending placeholder: {}",
                        envelope.msg_type,
                        e
                    );
                    PLACEHOLDER_SIGNATURE.to_string()
                },
            },
            None => {
                tracing::debug!("No signing key configured, sending placeholder signature");
                PLACEHOLDER_SIGNATURE.to_string()
            },
        };
        envelope.signature = Some(signature);
    }

    /// Check an inbound envelope's signature
    pub fn verify(&self, envelope: &Envelope, session_key: Option<&KeyMaterial>) -> Verification {
        let signature = match envelope.signature.as_deref() {
            None | Some(PLACEHOLDER_SIGNATURE) => return Verification::Unsigned,
            Some(signature) => signature,
        };
        let Some(key) = self.key(session_key) else {
            return Verification::NoKey;
        };
        let expected = match self.signature(envelope, key) {
            Ok(expected) => expected,
            Err(e) => {
                tracing::debug!("Could not recompute signature: {}", e);
                return Verification::Mismatch;
            },
        };

        if self
            .provider
            .constant_time_eq(expected.as_bytes(), signature.to_ascii_lowercase().as_bytes())
        {
            Verification::Valid
        } else {
            Verification::Mismatch
        }
    }
}

impl fmt::Debug for AuthPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthPipeline")
            .field("client_id", &self.client_id)
            .field("provider", &self.provider)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("policy", &self.policy)
            .finish()
    }
}
