//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables
//! - Code (builder-style setters on [`ClientConfig`])

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::VerificationPolicy;
use crate::error::{LtpError, Result};
use crate::protocol::{DEFAULT_SUBPROTOCOL, LTP_VERSION};

/// Main configuration struct
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server URL (`ws://` or `wss://`)
    pub url: String,

    /// Stable client identity; keys the persisted thread
    pub client_id: String,

    /// WebSocket subprotocol
    #[serde(default = "default_subprotocol")]
    pub subprotocol: String,

    /// Protocol version announced in handshakes
    #[serde(default = "default_version")]
    pub ltp_version: String,

    /// Reconnect backoff
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Heartbeat liveness
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Signing and verification
    #[serde(default)]
    pub auth: AuthConfig,

    /// Fields sent in `handshake_init`
    #[serde(default)]
    pub handshake: HandshakeConfig,
}

fn default_subprotocol() -> String {
    DEFAULT_SUBPROTOCOL.to_string()
}

fn default_version() -> String {
    LTP_VERSION.to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080".to_string(),
            client_id: "ltp-client".to_string(),
            subprotocol: default_subprotocol(),
            ltp_version: default_version(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            auth: AuthConfig::default(),
            handshake: HandshakeConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Config for `url` and `client_id` with defaults elsewhere
    pub fn new(url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    /// Set the signing secret
    pub fn with_secret_key(mut self, secret: impl Into<String>) -> Self {
        self.auth.secret_key = Some(secret.into());
        self
    }

    /// Set the reconnect policy
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set heartbeat settings
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Set the verification policy
    pub fn with_verification(mut self, policy: VerificationPolicy) -> Self {
        self.auth.verification = policy;
        self
    }

    /// Enable ECDH session key exchange
    pub fn with_key_exchange(mut self, enabled: bool) -> Self {
        self.auth.key_exchange = enabled;
        self
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| LtpError::Config(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| LtpError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Default config file location (`<config_dir>/ltp/client.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ltp").join("client.toml"))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("LTP_URL") {
            config.url = url;
        }
        if let Ok(client_id) = std::env::var("LTP_CLIENT_ID") {
            config.client_id = client_id;
        }
        if let Ok(secret) = std::env::var("LTP_SECRET_KEY") {
            if !secret.is_empty() {
                config.auth.secret_key = Some(secret);
            }
        }
        if let Ok(val) = std::env::var("LTP_HEARTBEAT_TIMEOUT_MS") {
            if let Ok(val) = val.parse() {
                config.heartbeat.timeout_ms = val;
            }
        }
        if let Ok(val) = std::env::var("LTP_MAX_RETRIES") {
            if let Ok(val) = val.parse() {
                config.reconnect.max_retries = val;
            }
        }

        config
    }

    /// Merge with another config (other takes precedence where it differs
    /// from the defaults)
    pub fn merge(self, other: Self) -> Self {
        let defaults = Self::default();
        Self {
            url: if other.url != defaults.url {
                other.url
            } else {
                self.url
            },
            client_id: if other.client_id != defaults.client_id {
                other.client_id
            } else {
                self.client_id
            },
            auth: AuthConfig {
                secret_key: other.auth.secret_key.or(self.auth.secret_key),
                ..other.auth
            },
            ..other
        }
    }

    /// Reject configurations the session engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            return Err(LtpError::Config("client_id must not be empty".to_string()));
        }
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(LtpError::Config(format!(
                "url must use ws:// or wss://, got {}",
                self.url
            )));
        }
        if self.reconnect.base_delay_ms == 0 {
            return Err(LtpError::Config("reconnect.base_delay_ms must be > 0".to_string()));
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(LtpError::Config(
                "reconnect.max_delay_ms must be >= base_delay_ms".to_string(),
            ));
        }
        if self.heartbeat.timeout_ms == 0 {
            return Err(LtpError::Config("heartbeat.timeout_ms must be > 0".to_string()));
        }
        if matches!(self.auth.secret_key.as_deref(), Some("")) {
            return Err(LtpError::Config("auth.secret_key must not be empty".to_string()));
        }
        if self.auth.verification == VerificationPolicy::Strict
            && self.auth.secret_key.is_none()
            && !self.auth.key_exchange
        {
            return Err(LtpError::Config(
                "strict verification needs auth.secret_key or auth.key_exchange".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reconnect backoff configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Ceiling for any single delay
    pub max_delay_ms: u64,
    /// Retries before giving up
    pub max_retries: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_retries: 5,
        }
    }
}

/// Heartbeat configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Send pings at all
    pub enabled: bool,
    /// Client override of the negotiated ping interval
    pub interval_ms: Option<u64>,
    /// Time allowed for a pong before the link is declared dead
    pub timeout_ms: u64,
}

impl HeartbeatConfig {
    /// Override interval as a duration
    pub fn interval_override(&self) -> Option<Duration> {
        self.interval_ms.map(Duration::from_millis)
    }

    /// Pong timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: None,
            timeout_ms: 10_000,
        }
    }
}

/// Signing and verification configuration
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared HMAC secret, used when no session MAC key exists
    pub secret_key: Option<String>,
    /// What to do with inbound messages whose signature does not verify
    pub verification: VerificationPolicy,
    /// Negotiate ECDH session keys during the handshake
    pub key_exchange: bool,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field(
                "secret_key",
                &self.secret_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("verification", &self.verification)
            .field("key_exchange", &self.key_exchange)
            .finish()
    }
}

/// Optional `handshake_init` fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Device fingerprint
    pub device_fingerprint: Option<String>,
    /// Declared intent
    pub intent: Option<String>,
    /// Advertised capabilities
    pub capabilities: Vec<String>,
    /// Free-form metadata
    pub metadata: Option<serde_json::Value>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            device_fingerprint: None,
            intent: None,
            capabilities: vec![
                "state-update".to_string(),
                "events".to_string(),
                "ping-pong".to_string(),
            ],
            metadata: None,
        }
    }
}
