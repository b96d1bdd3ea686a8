//! Transport layer abstraction for LTP.
//!
//! The session engine needs an ordered, reliable message stream with
//! open/message/close/error signals and nothing more. Backends:
//! - **WebSocket**: `tokio-tungstenite` client (feature `websocket`)
//! - **Channel**: in-process pair, driven from the peer side by tests or
//!   embedding hosts
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           Session driver task           │
//! │         (Transport-Agnostic)            │
//! └──────────────────┬──────────────────────┘
//!                    │ connect / send / close
//!          ┌────────┴────────┐
//!          ▼                 ▼
//! ┌─────────────────┐ ┌─────────────────┐
//! │WebSocketTransport│ │ChannelTransport │
//! └─────────────────┘ └─────────────────┘
//! ```
//!
//! Every `connect` hands back a fresh [`TransportEvents`] receiver. The
//! driver drops the receiver of a connection it has given up on, so
//! late events from a stale socket are never observed.

mod channel;
#[cfg(feature = "websocket")]
mod websocket;

pub use channel::{ChannelTransport, PeerHandle};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::error::Result;

/// Boxed `Send` future, as returned by [`Transport::connect`]
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Events of one connection, in arrival order
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// A signal from the underlying socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Socket is open and writable
    Open,
    /// One inbound text frame
    Message(String),
    /// Socket closed
    Close {
        /// Close code, if the peer sent one
        code: Option<u16>,
        /// Close reason
        reason: String,
    },
    /// Socket error; no further events follow reliably
    Error(String),
}

/// Socket readiness, mirroring the WebSocket `readyState` values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadyState {
    /// Opening handshake in progress
    Connecting,
    /// Open and writable
    Open,
    /// Close initiated
    Closing,
    /// Closed or never opened
    #[default]
    Closed,
}

impl ReadyState {
    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ReadyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Transport trait for pluggable socket backends.
///
/// Implementations own the socket; the session driver stays
/// transport-agnostic.
pub trait Transport: Send + Sync {
    /// Open a connection to `url` negotiating `subprotocol`.
    ///
    /// Resolves once the attempt is under way; [`TransportEvent::Open`]
    /// arrives on the returned receiver when the socket is writable. An
    /// `Err` here is treated like a close.
    fn connect(&self, url: &str, subprotocol: &str) -> BoxFuture<Result<TransportEvents>>;

    /// Queue one text frame. Fails unless the socket is open.
    fn send(&self, frame: String) -> Result<()>;

    /// Close the current connection. A `Close` event is delivered on the
    /// connection's receiver.
    fn close(&self);

    /// Current readiness
    fn ready_state(&self) -> ReadyState;

    /// Get the transport name for logging.
    fn name(&self) -> &'static str;
}
