//! # LTP Client - Session Protocol Engine
//!
//! Client side of LTP, a message protocol carried over WebSocket. The crate
//! keeps one long-lived logical session alive over an unreliable socket,
//! authenticates every outbound message, and derives per-session keys via
//! ECDH.
//!
//! ## Features
//!
//! - **Session lifecycle**: handshake, resumption of a persisted thread,
//!   one fresh retry after a rejected resume
//! - **Reconnect with backoff**: `min(base * 2^n, max)` with a retry ceiling
//! - **Heartbeat**: periodic pings plus a pong watchdog that forces a
//!   reconnect
//! - **Signed envelopes**: per-message nonces, HMAC-SHA256 over a canonical
//!   serialization, placeholder signature when no key is available
//! - **Key exchange**: ECDH P-256 + HKDF-SHA256 into encryption, MAC and IV
//!   keys; AES-256-GCM authenticated encryption
//!
//! ## Protocol Overview
//!
//! ```text
//! Client                                 Server
//!    |                                     |
//!    |------ handshake_init/_resume ------>|
//!    |<----- handshake_ack/_reject --------|
//!    |                                     |
//!    |====== state_update / event =======>|  signed
//!    |<===== state_update / event / error =|
//!    |                                     |
//!    |------ ping ------------------------>|  every heartbeat interval
//!    |<----- pong -------------------------|
//! ```
//!
//! ### Connection States
//!
//! | State | Meaning |
//! |-------|---------|
//! | `Disconnected` | idle, or after `disconnect()` |
//! | `Connecting` | transport connect in flight |
//! | `AwaitingHandshake(Init\|Resume)` | handshake sent |
//! | `Established` | ack received, heartbeat running |
//! | `Reconnecting(n)` | backoff timer for attempt `n` armed |
//! | `PermanentlyFailed` | retries exhausted or handshake finally rejected |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use ltp::{ChannelEvents, ClientConfig, LtpClient, MemoryStorage, SessionEvent};
//! use ltp::transport::WebSocketTransport;
//!
//! # async fn run() -> ltp::Result<()> {
//! let (events, mut inbox) = ChannelEvents::new();
//! let client = LtpClient::spawn(
//!     ClientConfig::new("ws://localhost:8080/ltp", "c1"),
//!     Arc::new(WebSocketTransport::new()),
//!     Arc::new(MemoryStorage::new()),
//!     Arc::new(events),
//! )?;
//!
//! client.connect().await?;
//! client.send_state_update(serde_json::json!({"focus": "editor"}))?;
//!
//! while let Some(event) = inbox.recv().await {
//!     if let SessionEvent::StateUpdate(payload) = event {
//!         println!("server state: {payload}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`client`]: session driver, reconnect policy, heartbeat, host events
//! - [`auth`]: nonce generation, canonical signing, verification
//! - [`crypto`]: ECDH, HKDF, HMAC, AES-GCM behind [`CryptoProvider`]
//! - [`protocol`]: wire messages and session data
//! - [`transport`]: transport trait, WebSocket and in-process backends
//! - [`storage`]: persisted session identity
//! - [`config`]: TOML/env configuration

pub mod auth;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod storage;
pub mod transport;

// Re-exports for convenience
pub use auth::{AuthPipeline, Verification, VerificationPolicy};
pub use client::{
    ChannelEvents, ConnectionState, HandshakeKind, LtpClient, NoopEvents, SessionEvent,
    SessionEvents,
};
pub use config::{AuthConfig, ClientConfig, HandshakeConfig, HeartbeatConfig, ReconnectConfig};
pub use crypto::{CryptoError, CryptoProvider, KeyMaterial, SessionKeys, SoftwareCrypto};
pub use error::{LtpError, Result};
pub use protocol::{Envelope, EnvelopeBuilder, MessageType, Session, SessionSnapshot};
pub use storage::{IdentityStore, MemoryStorage, Storage};
pub use transport::{ChannelTransport, PeerHandle, ReadyState, Transport, TransportEvent};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// LTP protocol version
pub const PROTOCOL_VERSION: &str = protocol::LTP_VERSION;
