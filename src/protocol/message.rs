//! Wire messages for LTP.
//!
//! Two families share the JSON `type` discriminator:
//!
//! - handshake messages (`handshake_init`, `handshake_resume`,
//!   `handshake_ack`, `handshake_reject`) carry their fields at top level;
//! - every other message is an [`Envelope`] with a `payload`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::LTP_VERSION;
use crate::error::{LtpError, Result};

/// Message types in the LTP protocol
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    /// Start a new session
    HandshakeInit,
    /// Reattach to a persisted thread
    HandshakeResume,
    /// Server accepted the handshake
    HandshakeAck,
    /// Server refused the handshake
    HandshakeReject,
    /// Liveness check
    Ping,
    /// Liveness response
    Pong,
    /// Application state snapshot or delta
    StateUpdate,
    /// Application event
    Event,
    /// Error report from the peer
    Error,
    /// Any other application-defined type
    Other(String),
}

impl MessageType {
    /// Wire name
    pub fn as_str(&self) -> &str {
        match self {
            Self::HandshakeInit => "handshake_init",
            Self::HandshakeResume => "handshake_resume",
            Self::HandshakeAck => "handshake_ack",
            Self::HandshakeReject => "handshake_reject",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::StateUpdate => "state_update",
            Self::Event => "event",
            Self::Error => "error",
            Self::Other(name) => name,
        }
    }

    /// True for the four handshake types
    pub fn is_handshake(&self) -> bool {
        matches!(
            self,
            Self::HandshakeInit | Self::HandshakeResume | Self::HandshakeAck | Self::HandshakeReject
        )
    }
}

impl From<String> for MessageType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "handshake_init" => Self::HandshakeInit,
            "handshake_resume" => Self::HandshakeResume,
            "handshake_ack" => Self::HandshakeAck,
            "handshake_reject" => Self::HandshakeReject,
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "state_update" => Self::StateUpdate,
            "event" => Self::Event,
            "error" => Self::Error,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for MessageType {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<MessageType> for String {
    fn from(t: MessageType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload encoding marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    /// Plain JSON payload
    Json,
    /// TOON-encoded payload (opaque to this crate)
    Toon,
}

/// Optional envelope metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// Sending client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Affect annotation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affect: Option<Value>,
    /// Context tag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_tag: Option<String>,
    /// Any further fields, preserved as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Meta {
    /// Metadata carrying only the client id
    pub fn for_client(client_id: &str) -> Self {
        Self {
            client_id: Some(client_id.to_string()),
            ..Default::default()
        }
    }
}

/// Signed, versioned wrapper around every non-handshake message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    /// Thread the message belongs to
    pub thread_id: Option<String>,
    /// Session the message was sent in
    pub session_id: Option<String>,
    /// Unix seconds. Absent reads as 0; fractional seconds are floored.
    #[serde(default, deserialize_with = "unix_seconds")]
    pub timestamp: i64,
    /// Message body
    #[serde(default)]
    pub payload: Value,
    /// Metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    /// Payload encoding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<ContentEncoding>,
    /// Per-message nonce
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Hex HMAC-SHA256 or the placeholder marker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

#[allow(clippy::cast_possible_truncation)]
fn unix_seconds<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let Some(n) = Option::<serde_json::Number>::deserialize(deserializer)? else {
        return Ok(0);
    };
    if let Some(secs) = n.as_i64() {
        return Ok(secs);
    }
    match n.as_f64() {
        Some(secs) if secs.is_finite() => Ok(secs.floor() as i64),
        _ => Err(serde::de::Error::custom(format!("timestamp out of range: {n}"))),
    }
}

impl Envelope {
    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Logical message before session ids, timestamp, nonce and signature are
/// attached.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeBuilder {
    msg_type: MessageType,
    payload: Value,
    meta: Option<Meta>,
    content_encoding: Option<ContentEncoding>,
}

impl EnvelopeBuilder {
    /// Start a message of the given type with a null payload
    pub fn new(msg_type: impl Into<MessageType>) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload: Value::Null,
            meta: None,
            content_encoding: None,
        }
    }

    /// `state_update` carrying `payload`
    pub fn state_update(payload: Value) -> Self {
        Self::new(MessageType::StateUpdate).payload(payload)
    }

    /// `event` with `{event_type, data}`
    pub fn event(event_type: &str, data: Value) -> Self {
        Self::new(MessageType::Event).payload(serde_json::json!({
            "event_type": event_type,
            "data": data,
        }))
    }

    /// `ping` with an empty payload
    pub fn ping() -> Self {
        Self::new(MessageType::Ping).payload(Value::Object(Map::new()))
    }

    /// Set the payload
    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Set the metadata
    pub fn meta(mut self, meta: Meta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Set the content encoding
    pub fn content_encoding(mut self, encoding: ContentEncoding) -> Self {
        self.content_encoding = Some(encoding);
        self
    }

    /// Message type being built
    pub fn msg_type(&self) -> &MessageType {
        &self.msg_type
    }

    /// Attach ids and timestamp. Nonce and signature stay empty.
    pub fn build(
        self,
        thread_id: Option<String>,
        session_id: Option<String>,
        timestamp: i64,
    ) -> Envelope {
        Envelope {
            msg_type: self.msg_type,
            thread_id,
            session_id,
            timestamp,
            payload: self.payload,
            meta: self.meta,
            content_encoding: self.content_encoding,
            nonce: None,
            signature: None,
        }
    }
}

/// `handshake_init`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeInit {
    /// Protocol version
    pub ltp_version: String,
    /// Client identity
    pub client_id: String,
    /// Device fingerprint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_fingerprint: Option<String>,
    /// Declared intent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    /// Client capabilities
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<String>>,
    /// Free-form metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Ephemeral ECDH public key (base64 SEC1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_public_key: Option<String>,
}

impl HandshakeInit {
    /// Minimal init for `client_id`
    pub fn new(client_id: &str) -> Self {
        Self {
            ltp_version: LTP_VERSION.to_string(),
            client_id: client_id.to_string(),
            device_fingerprint: None,
            intent: None,
            capabilities: None,
            metadata: None,
            client_public_key: None,
        }
    }
}

/// `handshake_resume`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeResume {
    /// Protocol version
    pub ltp_version: String,
    /// Client identity
    pub client_id: String,
    /// Thread to reattach to
    pub thread_id: String,
    /// Why the client is resuming
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_reason: Option<String>,
    /// Ephemeral ECDH public key (base64 SEC1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_public_key: Option<String>,
}

/// `handshake_ack`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeAck {
    /// Protocol version
    #[serde(default = "default_version")]
    pub ltp_version: String,
    /// Assigned or resumed thread
    pub thread_id: String,
    /// New session id
    pub session_id: String,
    /// Server capabilities
    #[serde(default)]
    pub server_capabilities: Vec<String>,
    /// Negotiated heartbeat interval
    pub heartbeat_interval_ms: u64,
    /// True when the thread was resumed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed: Option<bool>,
    /// Free-form metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Server's ephemeral ECDH public key (base64 SEC1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_public_key: Option<String>,
}

/// `handshake_reject`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeReject {
    /// Protocol version
    #[serde(default = "default_version")]
    pub ltp_version: String,
    /// Human-readable reason
    pub reason: String,
    /// Server suggests starting a new thread
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggest_new: Option<bool>,
}

fn default_version() -> String {
    LTP_VERSION.to_string()
}

/// Handshake messages, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Handshake {
    /// `handshake_init`
    HandshakeInit(HandshakeInit),
    /// `handshake_resume`
    HandshakeResume(HandshakeResume),
    /// `handshake_ack`
    HandshakeAck(HandshakeAck),
    /// `handshake_reject`
    HandshakeReject(HandshakeReject),
}

impl Handshake {
    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire type of this handshake
    pub fn msg_type(&self) -> MessageType {
        match self {
            Self::HandshakeInit(_) => MessageType::HandshakeInit,
            Self::HandshakeResume(_) => MessageType::HandshakeResume,
            Self::HandshakeAck(_) => MessageType::HandshakeAck,
            Self::HandshakeReject(_) => MessageType::HandshakeReject,
        }
    }
}

/// A parsed inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A handshake message
    Handshake(Handshake),
    /// Any other message
    Envelope(Envelope),
}

impl Inbound {
    /// Parse one JSON frame
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        let msg_type = value
            .get("type")
            .and_then(Value::as_str)
            .map(MessageType::from)
            .ok_or_else(|| LtpError::InvalidMessage("missing `type` field".to_string()))?;

        if msg_type.is_handshake() {
            Ok(Self::Handshake(serde_json::from_value(value)?))
        } else {
            Ok(Self::Envelope(serde_json::from_value(value)?))
        }
    }

    /// Wire type of this frame
    pub fn msg_type(&self) -> MessageType {
        match self {
            Self::Handshake(h) => h.msg_type(),
            Self::Envelope(e) => e.msg_type.clone(),
        }
    }
}
