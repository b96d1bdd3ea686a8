//! LTP wire protocol.
//!
//! # Message Flow
//!
//! ```text
//! Client                                Server
//!    |                                    |
//!    |--- handshake_init / _resume ------>|  open a session
//!    |<-- handshake_ack / _reject --------|
//!    |                                    |
//!    |=== state_update / event ==========>|  signed envelopes
//!    |<== state_update / event / error ===|
//!    |                                    |
//!    |--- ping -------------------------->|  heartbeat
//!    |<-- pong ---------------------------|
//! ```
//!
//! A client that holds a persisted `thread_id` opens with
//! `handshake_resume`; if the server rejects it, the client forgets the
//! thread and retries once with `handshake_init`.

mod message;
mod session;

pub use message::{
    ContentEncoding, Envelope, EnvelopeBuilder, Handshake, HandshakeAck, HandshakeInit,
    HandshakeReject, HandshakeResume, Inbound, MessageType, Meta,
};
pub use session::{Session, SessionSnapshot};

/// Protocol version sent in handshakes
pub const LTP_VERSION: &str = "0.5";

/// WebSocket subprotocol
pub const DEFAULT_SUBPROTOCOL: &str = "ltp.v0.5";

/// Signature value used when no signing key is available
pub const PLACEHOLDER_SIGNATURE: &str = "v0-placeholder";

/// Current time in unix seconds
pub fn unix_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Current time in unix milliseconds
pub fn unix_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
