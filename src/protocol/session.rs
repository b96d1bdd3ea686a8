//! Session data owned by the client driver.
//!
//! Ids are `None` until a `handshake_ack` arrives and are cleared again when
//! a resumption is rejected. Session keys live here for the lifetime of one
//! session and are dropped (zeroized) when it ends.

use std::time::{Duration, Instant};

use super::message::HandshakeAck;
use crate::crypto::SessionKeys;

/// Live session state
#[derive(Debug, Default)]
pub struct Session {
    thread_id: Option<String>,
    session_id: Option<String>,
    heartbeat_interval: Option<Duration>,
    resumed: bool,
    established_at: Option<Instant>,
    keys: Option<SessionKeys>,
    messages_sent: u64,
    messages_received: u64,
    verification_failures: u64,
}

impl Session {
    /// Empty session
    pub fn new() -> Self {
        Self::default()
    }

    /// Thread id
    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    /// Session id
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Heartbeat interval in effect
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval
    }

    /// True once an ack has been applied and not yet ended
    pub fn is_established(&self) -> bool {
        self.established_at.is_some()
    }

    /// Apply a `handshake_ack`. `heartbeat_override` wins over the
    /// negotiated interval.
    pub fn establish(&mut self, ack: &HandshakeAck, heartbeat_override: Option<Duration>) {
        self.thread_id = Some(ack.thread_id.clone());
        self.session_id = Some(ack.session_id.clone());
        self.heartbeat_interval = Some(
            heartbeat_override.unwrap_or(Duration::from_millis(ack.heartbeat_interval_ms)),
        );
        self.resumed = ack.resumed.unwrap_or(false);
        self.established_at = Some(Instant::now());
    }

    /// Install keys derived for this session
    pub fn set_keys(&mut self, keys: SessionKeys) {
        self.keys = Some(keys);
    }

    /// Session keys, if a key exchange completed
    pub fn keys(&self) -> Option<&SessionKeys> {
        self.keys.as_ref()
    }

    /// End the live session but keep ids for resumption
    pub fn end(&mut self) {
        self.established_at = None;
        self.keys = None;
    }

    /// Forget ids after a rejected resumption
    pub fn clear(&mut self) {
        self.end();
        self.thread_id = None;
        self.session_id = None;
        self.heartbeat_interval = None;
        self.resumed = false;
    }

    /// Count an outbound message
    pub fn record_sent(&mut self) {
        self.messages_sent += 1;
    }

    /// Count an inbound message
    pub fn record_received(&mut self) {
        self.messages_received += 1;
    }

    /// Count a failed signature check
    pub fn record_verification_failure(&mut self) {
        self.verification_failures += 1;
    }

    /// Read-only view without key material
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            thread_id: self.thread_id.clone(),
            session_id: self.session_id.clone(),
            heartbeat_interval: self.heartbeat_interval,
            resumed: self.resumed,
            has_session_keys: self.keys.is_some(),
            messages_sent: self.messages_sent,
            messages_received: self.messages_received,
            verification_failures: self.verification_failures,
            uptime_secs: self
                .established_at
                .map(|t| t.elapsed().as_secs())
                .unwrap_or(0),
        }
    }
}

/// Session statistics and identity, safe to hand out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Thread id
    pub thread_id: Option<String>,
    /// Session id
    pub session_id: Option<String>,
    /// Heartbeat interval in effect
    pub heartbeat_interval: Option<Duration>,
    /// Whether the server resumed an existing thread
    pub resumed: bool,
    /// Whether derived session keys are installed
    pub has_session_keys: bool,
    /// Messages sent
    pub messages_sent: u64,
    /// Messages received
    pub messages_received: u64,
    /// Inbound messages dropped by strict verification
    pub verification_failures: u64,
    /// Seconds since the ack
    pub uptime_secs: u64,
}
