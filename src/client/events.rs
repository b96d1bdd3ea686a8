//! Events raised to the host application.

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::LtpError;

/// Host callbacks. Every method defaults to a no-op; implement the ones
/// you need.
///
/// Callbacks run on the session driver task and must not block.
pub trait SessionEvents: Send + Sync {
    /// Handshake acknowledged
    fn on_connected(&self, _thread_id: &str, _session_id: &str) {}

    /// An established session was lost or closed
    fn on_disconnected(&self) {}

    /// `error` message from the server, or a dropped message under strict
    /// verification
    fn on_error(&self, _payload: &Value) {}

    /// The client gave up; raised once per failure
    fn on_permanent_failure(&self, _error: &LtpError) {}

    /// `state_update` payload
    fn on_state_update(&self, _payload: &Value) {}

    /// `event` payload
    fn on_event(&self, _payload: &Value) {}

    /// `pong` received
    fn on_pong(&self) {}

    /// Every inbound frame, before dispatch
    fn on_message(&self, _raw: &str) {}
}

/// Ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvents;

impl SessionEvents for NoopEvents {}

/// One callback, as a value
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// See [`SessionEvents::on_connected`]
    Connected {
        /// Thread id
        thread_id: String,
        /// Session id
        session_id: String,
    },
    /// See [`SessionEvents::on_disconnected`]
    Disconnected,
    /// See [`SessionEvents::on_error`]
    Error(Value),
    /// See [`SessionEvents::on_permanent_failure`]; the error's message
    PermanentFailure(String),
    /// See [`SessionEvents::on_state_update`]
    StateUpdate(Value),
    /// See [`SessionEvents::on_event`]
    Event(Value),
    /// See [`SessionEvents::on_pong`]
    Pong,
    /// See [`SessionEvents::on_message`]
    Message(String),
}

/// Forwards every callback into a channel
#[derive(Debug, Clone)]
pub struct ChannelEvents {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelEvents {
    /// Sink plus the receiver to drain
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: SessionEvent) {
        // Receiver gone means the host stopped listening.
        let _ = self.tx.send(event);
    }
}

impl SessionEvents for ChannelEvents {
    fn on_connected(&self, thread_id: &str, session_id: &str) {
        self.emit(SessionEvent::Connected {
            thread_id: thread_id.to_string(),
            session_id: session_id.to_string(),
        });
    }

    fn on_disconnected(&self) {
        self.emit(SessionEvent::Disconnected);
    }

    fn on_error(&self, payload: &Value) {
        self.emit(SessionEvent::Error(payload.clone()));
    }

    fn on_permanent_failure(&self, error: &LtpError) {
        self.emit(SessionEvent::PermanentFailure(error.to_string()));
    }

    fn on_state_update(&self, payload: &Value) {
        self.emit(SessionEvent::StateUpdate(payload.clone()));
    }

    fn on_event(&self, payload: &Value) {
        self.emit(SessionEvent::Event(payload.clone()));
    }

    fn on_pong(&self) {
        self.emit(SessionEvent::Pong);
    }

    fn on_message(&self, raw: &str) {
        self.emit(SessionEvent::Message(raw.to_string()));
    }
}
