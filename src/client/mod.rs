//! LTP client session engine.
//!
//! [`LtpClient`] is a cheap handle to a session driver task that owns the
//! connection state machine:
//!
//! ```text
//!                 connect()
//! Disconnected ──────────────► Connecting ──open──► AwaitingHandshake(Init|Resume)
//!      ▲                           ▲                    │        │
//!      │ disconnect()              │ backoff timer      │ ack    │ reject (resume, once)
//!      │                           │                    ▼        └──► AwaitingHandshake(Init)
//!      │                      Reconnecting(n) ◄─loss─ Established
//!      │                           │
//!      │                           └─retries exhausted / final reject──► PermanentlyFailed
//! ```
//!
//! Handshake rejection on a fresh `handshake_init` also ends in
//! `PermanentlyFailed`; only an explicit `connect()` leaves that state.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use ltp::client::{LtpClient, NoopEvents};
//! use ltp::config::ClientConfig;
//! use ltp::storage::MemoryStorage;
//! use ltp::transport::WebSocketTransport;
//!
//! # async fn example() -> ltp::Result<()> {
//! let config = ClientConfig::new("wss://ltp.example.com/ws", "device-42").with_secret_key("s3cret");
//! let client = LtpClient::spawn(
//!     config,
//!     Arc::new(WebSocketTransport::new()),
//!     Arc::new(MemoryStorage::new()),
//!     Arc::new(NoopEvents),
//! )?;
//!
//! client.connect().await?;
//! client.send_event("button_clicked", serde_json::json!({"id": 7}))?;
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

mod driver;
mod events;
mod heartbeat;
mod reconnect;
mod state;

pub use events::{ChannelEvents, NoopEvents, SessionEvent, SessionEvents};
pub use reconnect::{ReconnectDecision, ReconnectPolicy, ReconnectState};
pub use state::{ConnectionState, HandshakeKind};

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::ClientConfig;
use crate::crypto::{CryptoProvider, SoftwareCrypto};
use crate::error::{LtpError, Result};
use crate::protocol::{EnvelopeBuilder, SessionSnapshot};
use crate::storage::{IdentityStore, Storage};
use crate::transport::Transport;
use driver::{Command, Driver};

/// Handle to one client session. Clones share the session; the driver
/// stops when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct LtpClient {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl LtpClient {
    /// Validate `config` and start the session driver with the software
    /// crypto provider. Must be called inside a Tokio runtime.
    pub fn spawn(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn Storage>,
        events: Arc<dyn SessionEvents>,
    ) -> Result<Self> {
        Self::spawn_with_crypto(config, transport, storage, events, Arc::new(SoftwareCrypto))
    }

    /// Like [`spawn`](Self::spawn) with an explicit crypto backend
    pub fn spawn_with_crypto(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn Storage>,
        events: Arc<dyn SessionEvents>,
        crypto: Arc<dyn CryptoProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| LtpError::Config(format!("LtpClient needs a Tokio runtime: {e}")))?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let identity = IdentityStore::new(storage, &config.client_id);
        let driver = Driver::new(
            config,
            transport,
            identity,
            events,
            crypto,
            commands_rx,
            state_tx,
        )?;
        runtime.spawn(driver.run());

        Ok(Self {
            commands: commands_tx,
            state: state_rx,
        })
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| LtpError::Shutdown)
    }

    /// Connect and wait for the handshake.
    ///
    /// Resolves immediately when already established; concurrent callers
    /// share one attempt. Fails with [`LtpError::ClientDisconnected`] if
    /// `disconnect()` runs first, or with the fatal error on permanent
    /// failure.
    pub async fn connect(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Connect(tx))?;
        rx.await.map_err(|_| LtpError::Shutdown)?
    }

    /// Close the session and cancel every timer. A later `connect()`
    /// starts over.
    pub async fn disconnect(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Disconnect(tx))?;
        rx.await.map_err(|_| LtpError::Shutdown)
    }

    /// Queue a message. It is signed and written in call order; if the
    /// session is not established when it is processed it is dropped with
    /// a warning.
    pub fn send(&self, message: EnvelopeBuilder) -> Result<()> {
        self.command(Command::Send(message))
    }

    /// Queue a `state_update`
    pub fn send_state_update(&self, payload: Value) -> Result<()> {
        self.send(EnvelopeBuilder::state_update(payload))
    }

    /// Queue an `event` with `{event_type, data}`
    pub fn send_event(&self, event_type: &str, data: Value) -> Result<()> {
        self.send(EnvelopeBuilder::event(event_type, data))
    }

    /// Queue a `ping`
    pub fn send_ping(&self) -> Result<()> {
        self.send(EnvelopeBuilder::ping())
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Session ids and counters
    pub async fn session(&self) -> Result<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Snapshot(tx))?;
        rx.await.map_err(|_| LtpError::Shutdown)
    }
}
