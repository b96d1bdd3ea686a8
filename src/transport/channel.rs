//! In-process transport.
//!
//! [`ChannelTransport::pair`] returns the client end and a [`PeerHandle`]
//! that plays the server: it observes connect attempts and outbound frames
//! and injects open, message, close and error signals.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use super::{BoxFuture, ReadyState, Transport, TransportEvent, TransportEvents};
use crate::error::{LtpError, Result};

#[derive(Debug, Default)]
struct Link {
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    ready: ReadyState,
    connects: usize,
    refuse: bool,
}

#[derive(Debug, Default)]
struct Shared {
    link: Mutex<Link>,
}

impl Shared {
    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: TransportEvent) -> bool {
        self.link()
            .events
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    fn emit_close(&self, code: Option<u16>, reason: &str) -> bool {
        let tx = {
            let mut link = self.link();
            link.ready = ReadyState::Closed;
            link.events.take()
        };
        tx.is_some_and(|tx| {
            tx.send(TransportEvent::Close {
                code,
                reason: reason.to_string(),
            })
            .is_ok()
        })
    }
}

/// Client end of an in-process connection
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    shared: Arc<Shared>,
    connects: mpsc::UnboundedSender<(String, String)>,
    frames: mpsc::UnboundedSender<String>,
}

/// Server end of a [`ChannelTransport`]
#[derive(Debug)]
pub struct PeerHandle {
    shared: Arc<Shared>,
    connects: AsyncMutex<mpsc::UnboundedReceiver<(String, String)>>,
    frames: AsyncMutex<mpsc::UnboundedReceiver<String>>,
}

impl ChannelTransport {
    /// Create a connected client/peer pair
    pub fn pair() -> (Self, PeerHandle) {
        let shared = Arc::new(Shared::default());
        let (connects_tx, connects_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        let transport = Self {
            shared: shared.clone(),
            connects: connects_tx,
            frames: frames_tx,
        };
        let peer = PeerHandle {
            shared,
            connects: AsyncMutex::new(connects_rx),
            frames: AsyncMutex::new(frames_rx),
        };
        (transport, peer)
    }
}

impl Transport for ChannelTransport {
    fn connect(&self, url: &str, subprotocol: &str) -> BoxFuture<Result<TransportEvents>> {
        let shared = self.shared.clone();
        let connects = self.connects.clone();
        let request = (url.to_string(), subprotocol.to_string());

        Box::pin(async move {
            let rx = {
                let mut link = shared.link();
                link.connects += 1;
                if link.refuse {
                    link.ready = ReadyState::Closed;
                    None
                } else {
                    let (tx, rx) = mpsc::unbounded_channel();
                    link.events = Some(tx);
                    link.ready = ReadyState::Connecting;
                    Some(rx)
                }
            };
            // Peer may have been dropped; attempts are still counted.
            let _ = connects.send(request);
            rx.ok_or_else(|| LtpError::Transport("connection refused".to_string()))
        })
    }

    fn send(&self, frame: String) -> Result<()> {
        let ready = self.shared.link().ready;
        if ready != ReadyState::Open {
            return Err(LtpError::Transport(format!("cannot send while {ready}")));
        }
        self.frames
            .send(frame)
            .map_err(|_| LtpError::Transport("peer gone".to_string()))
    }

    fn close(&self) {
        self.shared.emit_close(Some(1000), "closed by client");
    }

    fn ready_state(&self) -> ReadyState {
        self.shared.link().ready
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

impl PeerHandle {
    /// Wait for the next connect attempt; returns `(url, subprotocol)`
    pub async fn next_connect(&self) -> Option<(String, String)> {
        self.connects.lock().await.recv().await
    }

    /// Accept the current connection
    pub fn open(&self) -> bool {
        let accepted = {
            let mut link = self.shared.link();
            if link.events.is_some() {
                link.ready = ReadyState::Open;
                true
            } else {
                false
            }
        };
        accepted && self.shared.emit(TransportEvent::Open)
    }

    /// Deliver one raw frame to the client
    pub fn deliver(&self, frame: impl Into<String>) -> bool {
        self.shared.emit(TransportEvent::Message(frame.into()))
    }

    /// Deliver a JSON value as one frame
    pub fn deliver_json(&self, value: &Value) -> bool {
        self.deliver(value.to_string())
    }

    /// Close the current connection from the server side
    pub fn close(&self, reason: &str) -> bool {
        self.shared.emit_close(Some(1006), reason)
    }

    /// Signal a socket error without closing
    pub fn error(&self, message: &str) -> bool {
        self.shared.emit(TransportEvent::Error(message.to_string()))
    }

    /// Make subsequent connect attempts fail (`true`) or succeed
    pub fn refuse_connects(&self, refuse: bool) {
        self.shared.link().refuse = refuse;
    }

    /// Next frame sent by the client
    pub async fn next_frame(&self) -> Option<String> {
        self.frames.lock().await.recv().await
    }

    /// Next frame sent by the client, parsed as JSON
    pub async fn next_json(&self) -> Option<Value> {
        let frame = self.next_frame().await?;
        serde_json::from_str(&frame).ok()
    }

    /// Frame already sent by the client, without waiting
    pub fn try_next_frame(&self) -> Option<String> {
        self.frames.try_lock().ok()?.try_recv().ok()
    }

    /// Connect attempts made so far
    pub fn connect_count(&self) -> usize {
        self.shared.link().connects
    }

    /// Readiness as seen by the client
    pub fn ready_state(&self) -> ReadyState {
        self.shared.link().ready
    }
}
