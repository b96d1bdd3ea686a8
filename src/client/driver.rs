//! Session driver task.
//!
//! One task per client owns every piece of mutable session state: the
//! connection state, the session, all timers, the transport receiver and
//! the pending `connect()` callers. The [`LtpClient`](super::LtpClient)
//! handle talks to it over a command channel, so transitions never
//! interleave and outbound envelopes are signed and written in submission
//! order.

use std::future::pending;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, oneshot, watch};

use super::events::SessionEvents;
use super::heartbeat::{HeartbeatMonitor, HeartbeatTick, Timer};
use super::reconnect::{ReconnectDecision, ReconnectPolicy};
use super::state::{ConnectionState, HandshakeKind};
use crate::auth::{AuthPipeline, Verification, VerificationPolicy};
use crate::config::ClientConfig;
use crate::crypto::{CryptoError, CryptoProvider, KeyExchange, PublicKey, SessionKeys};
use crate::error::{LtpError, Result};
use crate::protocol::{
    unix_seconds, Envelope, EnvelopeBuilder, Handshake, HandshakeAck, HandshakeInit,
    HandshakeReject, HandshakeResume, Inbound, Meta, MessageType, Session, SessionSnapshot,
};
use crate::storage::IdentityStore;
use crate::transport::{BoxFuture, Transport, TransportEvent, TransportEvents};

pub(crate) enum Command {
    Connect(oneshot::Sender<Result<()>>),
    Disconnect(oneshot::Sender<()>),
    Send(EnvelopeBuilder),
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Command::Connect(_) => "Connect",
            Command::Disconnect(_) => "Disconnect",
            Command::Send(_) => "Send",
            Command::Snapshot(_) => "Snapshot",
        })
    }
}

pub(crate) struct Driver {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    identity: IdentityStore,
    events: Arc<dyn SessionEvents>,
    crypto: Arc<dyn CryptoProvider>,
    auth: AuthPipeline,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,

    state: ConnectionState,
    session: Session,
    /// Persisted thread to resume until a handshake settles it
    resume_thread: Option<String>,
    pending_connect: Option<BoxFuture<Result<TransportEvents>>>,
    inbound: Option<TransportEvents>,
    waiters: Vec<oneshot::Sender<Result<()>>>,
    reconnect: ReconnectPolicy,
    reconnect_timer: Timer,
    heartbeat: HeartbeatMonitor,
    key_exchange: Option<KeyExchange>,
    resume_retry_used: bool,
    lost_connection: bool,
}

impl Driver {
    pub(crate) fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        identity: IdentityStore,
        events: Arc<dyn SessionEvents>,
        crypto: Arc<dyn CryptoProvider>,
        commands: mpsc::UnboundedReceiver<Command>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Result<Self> {
        let resume_thread = identity.thread_id()?;
        if let Some(thread_id) = &resume_thread {
            tracing::debug!("Found persisted thread {} for {}", thread_id, config.client_id);
        }

        let auth = AuthPipeline::new(
            config.client_id.clone(),
            crypto.clone(),
            config.auth.secret_key.as_deref(),
            config.auth.verification,
        );

        Ok(Self {
            reconnect: ReconnectPolicy::new(config.reconnect),
            heartbeat: HeartbeatMonitor::new(config.heartbeat.timeout()),
            session: Session::new(),
            resume_thread,
            config,
            transport,
            identity,
            events,
            crypto,
            auth,
            commands,
            state_tx,
            state: ConnectionState::Disconnected,
            pending_connect: None,
            inbound: None,
            waiters: Vec::new(),
            reconnect_timer: Timer::default(),
            key_exchange: None,
            resume_retry_used: false,
            lost_connection: false,
        })
    }

    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                result = connect_result(&mut self.pending_connect) => self.on_connect_result(result),
                event = next_event(&mut self.inbound) => self.on_transport_event(event),
                tick = self.heartbeat.tick() => match tick {
                    HeartbeatTick::Ping => self.on_ping_due(),
                    HeartbeatTick::Timeout => self.on_heartbeat_timeout(),
                },
                () = self.reconnect_timer.fired() => self.on_reconnect_due(),
            }
        }

        self.disconnect();
        tracing::debug!("Session driver for {} stopped", self.config.client_id);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => self.connect(reply),
            Command::Disconnect(reply) => {
                self.disconnect();
                let _ = reply.send(());
            },
            Command::Send(builder) => self.send_envelope(builder),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.session.snapshot());
            },
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::debug!("{}: {} -> {}", self.config.client_id, self.state, state);
            self.state = state;
            self.state_tx.send_replace(state);
        }
    }

    // === Lifecycle ===

    fn connect(&mut self, reply: oneshot::Sender<Result<()>>) {
        match self.state {
            ConnectionState::Established => {
                let _ = reply.send(Ok(()));
            },
            state if state.is_connecting() => {
                tracing::debug!("connect() joins the attempt in progress ({})", state);
                self.waiters.push(reply);
            },
            _ => {
                self.waiters.push(reply);
                self.reconnect.reset();
                self.resume_retry_used = false;
                self.lost_connection = false;
                self.open_transport();
            },
        }
    }

    fn open_transport(&mut self) {
        self.set_state(ConnectionState::Connecting);
        tracing::debug!(
            "Connecting to {} over {} ({})",
            self.config.url,
            self.transport.name(),
            self.config.subprotocol
        );
        self.pending_connect = Some(
            self.transport
                .connect(&self.config.url, &self.config.subprotocol),
        );
    }

    fn on_connect_result(&mut self, result: Result<TransportEvents>) {
        match result {
            Ok(events) => self.inbound = Some(events),
            Err(e) => self.on_connection_lost(e.to_string()),
        }
    }

    /// Manual exit. Cancels every timer, drops the transport receiver
    /// before closing so no reconnect follows, and rejects pending
    /// `connect()` callers.
    fn disconnect(&mut self) {
        self.inbound = None;
        self.pending_connect = None;
        self.heartbeat.stop();
        self.reconnect_timer.cancel();
        self.reconnect.reset();
        self.key_exchange = None;

        let was_established = self.state.is_established();
        self.session.end();
        self.transport.close();

        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(LtpError::ClientDisconnected));
        }
        if self.state != ConnectionState::Disconnected {
            tracing::info!("{} disconnected", self.config.client_id);
        }
        self.set_state(ConnectionState::Disconnected);
        if was_established {
            self.events.on_disconnected();
        }
    }

    fn on_connection_lost(&mut self, cause: String) {
        self.inbound = None;
        self.pending_connect = None;
        self.heartbeat.stop();
        self.key_exchange = None;
        self.transport.close();

        if !self.state.reconnects_on_loss() {
            tracing::debug!("Ignoring transport loss while {}: {}", self.state, cause);
            return;
        }

        let was_established = self.state.is_established();
        self.session.end();
        self.lost_connection = true;
        tracing::warn!("Connection lost while {}: {}", self.state, cause);
        if was_established {
            self.events.on_disconnected();
        }

        match self.reconnect.schedule() {
            ReconnectDecision::Retry { attempt, delay } => {
                tracing::info!(
                    "Reconnect attempt {}/{} in {:?}",
                    attempt,
                    self.config.reconnect.max_retries,
                    delay
                );
                self.reconnect_timer.arm(delay);
                self.set_state(ConnectionState::Reconnecting(attempt));
            },
            ReconnectDecision::AlreadyPending => {
                tracing::debug!("Reconnect already scheduled");
            },
            ReconnectDecision::Exhausted { attempts } => {
                self.fail(LtpError::RetryExhausted { attempts, cause });
            },
        }
    }

    fn on_reconnect_due(&mut self) {
        self.reconnect.clear_pending();
        self.open_transport();
    }

    fn fail(&mut self, error: LtpError) {
        self.inbound = None;
        self.pending_connect = None;
        self.heartbeat.stop();
        self.reconnect_timer.cancel();
        self.reconnect.reset();
        self.key_exchange = None;
        self.session.end();
        self.transport.close();

        self.set_state(ConnectionState::PermanentlyFailed);
        tracing::error!("{} permanently failed: {}", self.config.client_id, error);
        self.events.on_permanent_failure(&error);
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(rejection(&error)));
        }
    }

    // === Handshake ===

    fn send_handshake(&mut self) {
        self.key_exchange = self
            .config
            .auth
            .key_exchange
            .then(|| KeyExchange::new(self.crypto.as_ref()));
        let client_public_key = self
            .key_exchange
            .as_ref()
            .map(|kx| kx.public_key().to_base64());

        let resume = self
            .session
            .thread_id()
            .or(self.resume_thread.as_deref())
            .map(str::to_string);
        let (kind, handshake) = match resume {
            Some(thread_id) => (
                HandshakeKind::Resume,
                Handshake::HandshakeResume(HandshakeResume {
                    ltp_version: self.config.ltp_version.clone(),
                    client_id: self.config.client_id.clone(),
                    thread_id,
                    resume_reason: Some(
                        if self.lost_connection {
                            "reconnect"
                        } else {
                            "client_restart"
                        }
                        .to_string(),
                    ),
                    client_public_key,
                }),
            ),
            None => {
                let fields = &self.config.handshake;
                let mut init = HandshakeInit::new(&self.config.client_id);
                init.ltp_version.clone_from(&self.config.ltp_version);
                init.device_fingerprint.clone_from(&fields.device_fingerprint);
                init.intent.clone_from(&fields.intent);
                init.capabilities =
                    (!fields.capabilities.is_empty()).then(|| fields.capabilities.clone());
                init.metadata.clone_from(&fields.metadata);
                init.client_public_key = client_public_key;
                (HandshakeKind::Init, Handshake::HandshakeInit(init))
            },
        };

        self.set_state(ConnectionState::AwaitingHandshake(kind));
        let sent = handshake
            .to_json()
            .and_then(|frame| self.transport.send(frame));
        if let Err(e) = sent {
            self.on_connection_lost(format!("failed to send {}: {}", handshake.msg_type(), e));
        }
    }

    fn on_ack(&mut self, ack: HandshakeAck) {
        if !matches!(self.state, ConnectionState::AwaitingHandshake(_)) {
            tracing::debug!("Ignoring handshake_ack while {}", self.state);
            return;
        }

        self.session
            .establish(&ack, self.config.heartbeat.interval_override());
        if let Err(e) = self.identity.save(&ack.thread_id, &ack.session_id) {
            tracing::warn!("Failed to persist session identity: {}", e);
        }
        self.install_session_keys(&ack);
        self.reconnect.reset();
        self.resume_retry_used = false;
        self.lost_connection = false;

        if self.config.heartbeat.enabled {
            match self.session.heartbeat_interval() {
                Some(interval) if !interval.is_zero() => self.heartbeat.start(interval),
                _ => tracing::debug!("No heartbeat interval negotiated"),
            }
        }

        self.set_state(ConnectionState::Established);
        tracing::info!(
            "Session established: thread={} session={} resumed={}",
            ack.thread_id,
            ack.session_id,
            ack.resumed.unwrap_or(false)
        );
        self.events.on_connected(&ack.thread_id, &ack.session_id);
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    fn install_session_keys(&mut self, ack: &HandshakeAck) {
        let Some(mut kx) = self.key_exchange.take() else {
            return;
        };
        let Some(encoded) = ack.server_public_key.as_deref() else {
            tracing::debug!("Server sent no public key, no session keys");
            return;
        };

        let crypto = self.crypto.as_ref();
        let derived = PublicKey::from_base64(encoded)
            .map_err(CryptoError::from)
            .and_then(|peer| {
                kx.complete(crypto, &peer);
                kx.derive_session_keys(crypto, &ack.session_id)
            });
        match derived {
            Ok(keys) => {
                self.session.set_keys(keys);
                tracing::debug!("Session keys derived for {}", ack.session_id);
            },
            Err(e) => tracing::warn!("Key exchange failed, continuing without session keys: {}", e),
        }
    }

    fn on_reject(&mut self, reject: HandshakeReject) {
        match self.state {
            ConnectionState::AwaitingHandshake(HandshakeKind::Resume) if !self.resume_retry_used => {
                tracing::warn!("Resume rejected ({}), starting a new thread", reject.reason);
                self.resume_retry_used = true;
                if let Err(e) = self.identity.clear() {
                    tracing::warn!("Failed to clear persisted identity: {}", e);
                }
                self.session.clear();
                self.resume_thread = None;
                self.send_handshake();
            },
            ConnectionState::AwaitingHandshake(_) => {
                self.fail(LtpError::ProtocolRejection {
                    reason: reject.reason,
                });
            },
            state => tracing::debug!("Ignoring handshake_reject while {}", state),
        }
    }

    // === Messages ===

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => {
                if self.state == ConnectionState::Connecting {
                    self.send_handshake();
                } else {
                    tracing::debug!("Ignoring open while {}", self.state);
                }
            },
            TransportEvent::Message(raw) => self.on_frame(&raw),
            TransportEvent::Close { code, reason } => {
                let code = code.map_or_else(|| "none".to_string(), |c| c.to_string());
                self.on_connection_lost(format!("closed (code {code}): {reason}"));
            },
            TransportEvent::Error(e) => self.on_connection_lost(format!("transport error: {e}")),
        }
    }

    fn on_frame(&mut self, raw: &str) {
        self.events.on_message(raw);
        match Inbound::parse(raw) {
            Ok(Inbound::Handshake(Handshake::HandshakeAck(ack))) => self.on_ack(ack),
            Ok(Inbound::Handshake(Handshake::HandshakeReject(reject))) => self.on_reject(reject),
            Ok(Inbound::Handshake(other)) => {
                tracing::debug!("Ignoring inbound {}", other.msg_type());
            },
            Ok(Inbound::Envelope(envelope)) => self.on_envelope(envelope),
            Err(e) => tracing::warn!("Dropping malformed frame: {}", e),
        }
    }

    fn on_envelope(&mut self, envelope: Envelope) {
        self.session.record_received();

        if envelope.msg_type == MessageType::Pong {
            self.heartbeat.pong_received();
            self.events.on_pong();
            return;
        }

        let session_key = self.session.keys().map(SessionKeys::mac_key);
        match self.auth.policy() {
            VerificationPolicy::Lenient => {
                let has_key = session_key.is_some() || self.auth.has_secret();
                if has_key && envelope.signature.is_some() {
                    let auth = self.auth.clone();
                    let signed = envelope.clone();
                    tokio::spawn(async move {
                        if auth.verify(&signed, session_key.as_ref()) == Verification::Mismatch {
                            tracing::warn!(
                                "Signature mismatch on inbound {} (delivered anyway)",
                                signed.msg_type
                            );
                        }
                    });
                }
            },
            VerificationPolicy::Strict => {
                let outcome = self.auth.verify(&envelope, session_key.as_ref());
                if !outcome.is_valid() {
                    self.session.record_verification_failure();
                    tracing::warn!("Dropping inbound {}: {}", envelope.msg_type, outcome);
                    self.events.on_error(&json!({
                        "code": "verification_failed",
                        "message_type": envelope.msg_type.as_str(),
                        "reason": outcome.to_string(),
                    }));
                    return;
                }
            },
        }

        match envelope.msg_type {
            MessageType::StateUpdate => self.events.on_state_update(&envelope.payload),
            MessageType::Event => self.events.on_event(&envelope.payload),
            MessageType::Error => {
                tracing::warn!("Server error: {}", envelope.payload);
                self.events.on_error(&envelope.payload);
            },
            other => tracing::debug!("No handler for inbound {}", other),
        }
    }

    fn send_envelope(&mut self, builder: EnvelopeBuilder) {
        if !self.state.is_established() {
            tracing::warn!(
                "Dropping outbound {}: session not established ({})",
                builder.msg_type(),
                self.state
            );
            return;
        }

        let mut envelope = builder.build(
            self.session.thread_id().map(str::to_string),
            self.session.session_id().map(str::to_string),
            unix_seconds(),
        );
        let meta = envelope.meta.get_or_insert_with(Meta::default);
        if meta.client_id.is_none() {
            meta.client_id = Some(self.config.client_id.clone());
        }

        let session_key = self.session.keys().map(SessionKeys::mac_key);
        self.auth.sign(&mut envelope, session_key.as_ref());

        match envelope.to_json().and_then(|frame| self.transport.send(frame)) {
            Ok(()) => self.session.record_sent(),
            Err(e) => tracing::warn!("Failed to send {}: {}", envelope.msg_type, e),
        }
    }

    // === Heartbeat ===

    fn on_ping_due(&mut self) {
        self.send_envelope(EnvelopeBuilder::ping());
        self.heartbeat.ping_sent();
    }

    fn on_heartbeat_timeout(&mut self) {
        if !self.heartbeat.is_running() {
            return;
        }
        tracing::warn!(
            "No pong within {:?}, closing transport",
            self.config.heartbeat.timeout()
        );
        self.heartbeat.stop();
        // The resulting close event takes the normal reconnect path.
        self.transport.close();
    }
}

async fn connect_result(slot: &mut Option<BoxFuture<Result<TransportEvents>>>) -> Result<TransportEvents> {
    match slot.as_mut() {
        Some(connecting) => {
            let result = connecting.await;
            *slot = None;
            result
        },
        None => pending().await,
    }
}

async fn next_event(inbound: &mut Option<TransportEvents>) -> TransportEvent {
    match inbound.as_mut() {
        Some(rx) => rx.recv().await.unwrap_or_else(|| TransportEvent::Close {
            code: None,
            reason: "transport dropped".to_string(),
        }),
        None => pending().await,
    }
}

/// Error handed to each pending `connect()` caller
fn rejection(error: &LtpError) -> LtpError {
    match error {
        LtpError::ProtocolRejection { reason } => LtpError::ProtocolRejection {
            reason: reason.clone(),
        },
        LtpError::RetryExhausted { attempts, cause } => LtpError::RetryExhausted {
            attempts: *attempts,
            cause: cause.clone(),
        },
        other => LtpError::PermanentlyFailed(other.to_string()),
    }
}
