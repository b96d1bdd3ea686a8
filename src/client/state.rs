//! Connection state.

use std::fmt;

/// Which handshake is outstanding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeKind {
    /// `handshake_init` sent
    Init,
    /// `handshake_resume` sent
    Resume,
}

/// Connection state of one client. Mutated only by the session driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected and not trying to be
    #[default]
    Disconnected,
    /// Transport connect in progress
    Connecting,
    /// Socket open, handshake sent, waiting for ack or reject
    AwaitingHandshake(HandshakeKind),
    /// Session established
    Established,
    /// Waiting for reconnect attempt `n` (1-based)
    Reconnecting(u32),
    /// Gave up; only an explicit `connect()` leaves this state
    PermanentlyFailed,
}

impl ConnectionState {
    /// True when messages can be sent
    pub fn is_established(&self) -> bool {
        matches!(self, Self::Established)
    }

    /// True while a connect attempt is in flight or scheduled
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::AwaitingHandshake(_) | Self::Reconnecting(_)
        )
    }

    /// True when a transport loss in this state triggers a reconnect
    pub(crate) fn reconnects_on_loss(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::AwaitingHandshake(_) | Self::Established
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::AwaitingHandshake(HandshakeKind::Init) => f.write_str("awaiting handshake (init)"),
            Self::AwaitingHandshake(HandshakeKind::Resume) => {
                f.write_str("awaiting handshake (resume)")
            },
            Self::Established => f.write_str("established"),
            Self::Reconnecting(attempt) => write!(f, "reconnecting (attempt {attempt})"),
            Self::PermanentlyFailed => f.write_str("permanently failed"),
        }
    }
}
