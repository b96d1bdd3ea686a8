//! WebSocket transport over `tokio-tungstenite`.
//!
//! Each connection runs a reader task (socket to events) and a writer task
//! (outbound queue to socket). `close()` reports the close to the driver
//! immediately; it does not wait for the peer's close frame, which a dead
//! link would never send.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use super::{BoxFuture, ReadyState, Transport, TransportEvent, TransportEvents};
use crate::error::{LtpError, Result};

#[derive(Debug, Default)]
struct Socket {
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    ready: ReadyState,
}

/// WebSocket client transport
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    socket: Arc<Mutex<Socket>>,
}

impl WebSocketTransport {
    /// Create an unconnected transport
    pub fn new() -> Self {
        Self::default()
    }

    fn socket(&self) -> MutexGuard<'_, Socket> {
        lock(&self.socket)
    }
}

fn lock(socket: &Mutex<Socket>) -> MutexGuard<'_, Socket> {
    socket.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Transport for WebSocketTransport {
    fn connect(&self, url: &str, subprotocol: &str) -> BoxFuture<Result<TransportEvents>> {
        let socket = self.socket.clone();
        let url = url.to_string();
        let subprotocol = subprotocol.to_string();

        Box::pin(async move {
            let mut request = url
                .as_str()
                .into_client_request()
                .map_err(|e| LtpError::Transport(format!("Invalid URL {url}: {e}")))?;
            let protocol = HeaderValue::from_str(&subprotocol)
                .map_err(|e| LtpError::Transport(format!("Invalid subprotocol: {e}")))?;
            request
                .headers_mut()
                .insert("Sec-WebSocket-Protocol", protocol);

            let generation = {
                let mut s = lock(&socket);
                s.generation += 1;
                s.outbound = None;
                s.events = None;
                s.ready = ReadyState::Connecting;
                s.generation
            };

            let (stream, _response) = match tokio_tungstenite::connect_async(request).await {
                Ok(connected) => connected,
                Err(e) => {
                    let mut s = lock(&socket);
                    if s.generation == generation {
                        s.ready = ReadyState::Closed;
                    }
                    return Err(LtpError::Transport(format!("WebSocket connect failed: {e}")));
                },
            };
            tracing::debug!("WebSocket connected to {}", url);

            let (mut sink, mut source) = stream.split();
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

            {
                let mut s = lock(&socket);
                if s.generation != generation {
                    return Err(LtpError::Transport("superseded by a newer connect".to_string()));
                }
                s.outbound = Some(out_tx);
                s.events = Some(events_tx.clone());
                s.ready = ReadyState::Open;
            }
            let _ = events_tx.send(TransportEvent::Open);

            tokio::spawn(async move {
                while let Some(message) = out_rx.recv().await {
                    let closing = matches!(message, Message::Close(_));
                    if let Err(e) = sink.send(message).await {
                        tracing::debug!("WebSocket write failed: {}", e);
                        break;
                    }
                    if closing {
                        break;
                    }
                }
                let _ = sink.close().await;
            });

            let reader_socket = socket.clone();
            tokio::spawn(async move {
                let mut close = TransportEvent::Close {
                    code: None,
                    reason: "stream ended".to_string(),
                };
                while let Some(item) = source.next().await {
                    match item {
                        Ok(Message::Text(text)) => {
                            let _ = events_tx.send(TransportEvent::Message(text));
                        },
                        Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                            Ok(text) => {
                                let _ = events_tx.send(TransportEvent::Message(text));
                            },
                            Err(_) => tracing::warn!("Dropping non UTF-8 binary frame"),
                        },
                        Ok(Message::Close(frame)) => {
                            close = TransportEvent::Close {
                                code: frame.as_ref().map(|f| u16::from(f.code)),
                                reason: frame.map(|f| f.reason.into_owned()).unwrap_or_default(),
                            };
                            break;
                        },
                        Ok(_) => {},
                        Err(e) => {
                            let _ = events_tx.send(TransportEvent::Error(e.to_string()));
                            break;
                        },
                    }
                }

                {
                    let mut s = lock(&reader_socket);
                    if s.generation == generation {
                        s.ready = ReadyState::Closed;
                        s.outbound = None;
                        s.events = None;
                    }
                }
                let _ = events_tx.send(close);
            });

            Ok(events_rx)
        })
    }

    fn send(&self, frame: String) -> Result<()> {
        let s = self.socket();
        match (&s.outbound, s.ready) {
            (Some(outbound), ReadyState::Open) => outbound
                .send(Message::Text(frame))
                .map_err(|_| LtpError::Transport("WebSocket writer stopped".to_string())),
            (_, ready) => Err(LtpError::Transport(format!("cannot send while {ready}"))),
        }
    }

    fn close(&self) {
        let (outbound, events) = {
            let mut s = self.socket();
            s.ready = ReadyState::Closed;
            (s.outbound.take(), s.events.take())
        };
        if let Some(outbound) = outbound {
            let _ = outbound.send(Message::Close(None));
        }
        if let Some(events) = events {
            let _ = events.send(TransportEvent::Close {
                code: Some(1000),
                reason: "closed by client".to_string(),
            });
        }
    }

    fn ready_state(&self) -> ReadyState {
        self.socket().ready
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}
