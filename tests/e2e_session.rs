//! End-to-end session lifecycle tests.
//!
//! Each test drives a real client through the in-process transport; the
//! test plays the server via `PeerHandle`. Time is paused, so backoff and
//! heartbeat timing is exact and instant.

use std::sync::Arc;
use std::time::Duration;

use ltp::auth::{AuthPipeline, Verification, VerificationPolicy};
use ltp::client::{ChannelEvents, ConnectionState, LtpClient, SessionEvent};
use ltp::config::{ClientConfig, HeartbeatConfig, ReconnectConfig};
use ltp::crypto::{derive_session_keys, KeyPair, PublicKey, SoftwareCrypto};
use ltp::error::LtpError;
use ltp::protocol::{Envelope, EnvelopeBuilder, PLACEHOLDER_SIGNATURE};
use ltp::storage::{MemoryStorage, Storage};
use ltp::transport::{ChannelTransport, PeerHandle, ReadyState};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::Instant;

struct Harness {
    client: LtpClient,
    peer: PeerHandle,
    storage: Arc<MemoryStorage>,
    events: UnboundedReceiver<SessionEvent>,
}

fn config() -> ClientConfig {
    ClientConfig::new("ws://ltp.test/ws", "c1")
}

fn start(config: ClientConfig) -> Harness {
    start_with_storage(config, Arc::new(MemoryStorage::new()))
}

fn start_with_storage(config: ClientConfig, storage: Arc<MemoryStorage>) -> Harness {
    let (transport, peer) = ChannelTransport::pair();
    let (events, rx) = ChannelEvents::new();
    let client = LtpClient::spawn(
        config,
        Arc::new(transport),
        storage.clone(),
        Arc::new(events),
    )
    .unwrap();
    Harness {
        client,
        peer,
        storage,
        events: rx,
    }
}

fn ack(thread_id: &str, session_id: &str, heartbeat_ms: u64) -> Value {
    json!({
        "type": "handshake_ack",
        "ltp_version": "0.5",
        "thread_id": thread_id,
        "session_id": session_id,
        "server_capabilities": ["state-update", "events", "ping-pong"],
        "heartbeat_interval_ms": heartbeat_ms
    })
}

fn reject(reason: &str) -> Value {
    json!({"type": "handshake_reject", "ltp_version": "0.5", "reason": reason})
}

fn pong() -> Value {
    json!({"type": "pong", "thread_id": "t1", "session_id": "s1", "timestamp": 0, "payload": {}})
}

fn assert_elapsed(start: Instant, ms: u64) {
    let elapsed = start.elapsed();
    let expected = Duration::from_millis(ms);
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(5),
        "elapsed {elapsed:?}, expected {expected:?}"
    );
}

impl Harness {
    fn connect(&self) -> JoinHandle<ltp::Result<()>> {
        let client = self.client.clone();
        tokio::spawn(async move { client.connect().await })
    }

    /// Accept the next connect attempt and return the handshake it sends
    async fn accept(&self) -> Value {
        self.peer.next_connect().await.unwrap();
        assert!(self.peer.open());
        self.peer.next_json().await.unwrap()
    }

    async fn establish(&self, heartbeat_ms: u64) {
        let connecting = self.connect();
        let handshake = self.accept().await;
        assert!(handshake["type"].as_str().unwrap().starts_with("handshake_"));
        self.peer.deliver_json(&ack("t1", "s1", heartbeat_ms));
        connecting.await.unwrap().unwrap();
    }

    /// Next event that is not a raw-frame notification
    async fn next_event(&mut self) -> SessionEvent {
        loop {
            match self.events.recv().await.unwrap() {
                SessionEvent::Message(_) => continue,
                event => return event,
            }
        }
    }

    /// Let every timer run out, then collect queued events
    async fn settle(&mut self) -> Vec<SessionEvent> {
        tokio::time::sleep(Duration::from_secs(300)).await;
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if !matches!(event, SessionEvent::Message(_)) {
                events.push(event);
            }
        }
        events
    }
}

fn count(events: &[SessionEvent], pred: impl Fn(&SessionEvent) -> bool) -> usize {
    events.iter().filter(|e| pred(e)).count()
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_connect_scenario() {
    let mut h = start(config());

    let connecting = h.connect();
    let (url, subprotocol) = h.peer.next_connect().await.unwrap();
    assert_eq!(url, "ws://ltp.test/ws");
    assert_eq!(subprotocol, "ltp.v0.5");

    h.peer.open();
    let init = h.peer.next_json().await.unwrap();
    assert_eq!(init["type"], "handshake_init");
    assert_eq!(init["client_id"], "c1");
    assert_eq!(init["ltp_version"], "0.5");
    assert!(init.get("thread_id").is_none());

    h.peer.deliver_json(&ack("t1", "s1", 5000));
    connecting.await.unwrap().unwrap();
    let established_at = Instant::now();
    assert_eq!(h.client.state(), ConnectionState::Established);

    assert_eq!(
        h.next_event().await,
        SessionEvent::Connected {
            thread_id: "t1".to_string(),
            session_id: "s1".to_string()
        }
    );

    let ping = h.peer.next_json().await.unwrap();
    assert_eq!(ping["type"], "ping");
    assert_eq!(ping["thread_id"], "t1");
    assert_eq!(ping["session_id"], "s1");
    assert_elapsed(established_at, 5000);

    assert_eq!(h.storage.get("ltp_thread_id:c1").unwrap().as_deref(), Some("t1"));
    assert_eq!(h.storage.get("ltp_session_id:c1").unwrap().as_deref(), Some("s1"));

    let snapshot = h.client.session().await.unwrap();
    assert_eq!(snapshot.thread_id.as_deref(), Some("t1"));
    assert_eq!(snapshot.heartbeat_interval, Some(Duration::from_millis(5000)));

    h.peer.deliver_json(&pong());
    let events = h.settle().await;
    assert_eq!(
        count(&events, |e| matches!(e, SessionEvent::Connected { .. })),
        0,
        "on_connected fired more than once"
    );
}

#[tokio::test(start_paused = true)]
async fn test_handshake_init_carries_configured_fields() {
    let mut config = config();
    config.handshake.device_fingerprint = Some("fp-1".to_string());
    config.handshake.intent = Some("companion".to_string());
    config.handshake.metadata = Some(json!({"locale": "en"}));
    let h = start(config);

    let _connecting = h.connect();
    let init = h.accept().await;
    assert_eq!(init["device_fingerprint"], "fp-1");
    assert_eq!(init["intent"], "companion");
    assert_eq!(init["capabilities"], json!(["state-update", "events", "ping-pong"]));
    assert_eq!(init["metadata"]["locale"], "en");
    assert!(init.get("client_public_key").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_connect_is_idempotent_and_coalesced() {
    let h = start(config());

    let first = h.connect();
    let second = h.connect();
    h.accept().await;
    h.peer.deliver_json(&ack("t1", "s1", 5000));

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    assert_eq!(h.peer.connect_count(), 1);

    h.client.connect().await.unwrap();
    assert_eq!(h.peer.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_persisted_thread_is_not_a_session_until_ack() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set("ltp_thread_id:c1", "t-old").unwrap();
    storage.set("ltp_session_id:c1", "s-old").unwrap();
    let h = start_with_storage(config(), storage);

    let snapshot = h.client.session().await.unwrap();
    assert!(snapshot.thread_id.is_none());
    assert!(snapshot.session_id.is_none());

    let connecting = h.connect();
    let resume = h.accept().await;
    assert_eq!(resume["type"], "handshake_resume");
    assert_eq!(resume["thread_id"], "t-old");

    let snapshot = h.client.session().await.unwrap();
    assert!(snapshot.thread_id.is_none());

    h.peer.deliver_json(&ack("t-old", "s2", 5000));
    connecting.await.unwrap().unwrap();
    let snapshot = h.client.session().await.unwrap();
    assert_eq!(snapshot.thread_id.as_deref(), Some("t-old"));
    assert_eq!(snapshot.session_id.as_deref(), Some("s2"));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_resume_falls_back_to_init() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set("ltp_thread_id:c1", "t-old").unwrap();
    storage.set("ltp_session_id:c1", "s-old").unwrap();
    let h = start_with_storage(config(), storage);

    let connecting = h.connect();
    let resume = h.accept().await;
    assert_eq!(resume["type"], "handshake_resume");
    assert_eq!(resume["thread_id"], "t-old");
    assert_eq!(resume["client_id"], "c1");

    h.peer.deliver_json(&reject("unknown thread"));
    let init = h.peer.next_json().await.unwrap();
    assert_eq!(init["type"], "handshake_init");
    assert!(init.get("thread_id").is_none());
    assert!(h.storage.get("ltp_thread_id:c1").unwrap().is_none());
    assert!(h.storage.get("ltp_session_id:c1").unwrap().is_none());
    assert_eq!(h.peer.connect_count(), 1);

    h.peer.deliver_json(&ack("t-new", "s-new", 5000));
    connecting.await.unwrap().unwrap();
    assert_eq!(h.storage.get("ltp_thread_id:c1").unwrap().as_deref(), Some("t-new"));
}

#[tokio::test(start_paused = true)]
async fn test_second_rejection_is_fatal() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set("ltp_thread_id:c1", "t-old").unwrap();
    let mut h = start_with_storage(config(), storage);

    let connecting = h.connect();
    h.accept().await;
    h.peer.deliver_json(&reject("unknown thread"));
    h.peer.next_json().await.unwrap();
    h.peer.deliver_json(&reject("client banned"));

    let err = connecting.await.unwrap().unwrap_err();
    assert!(matches!(err, LtpError::ProtocolRejection { ref reason } if reason == "client banned"));
    assert!(err.is_fatal());
    assert_eq!(h.client.state(), ConnectionState::PermanentlyFailed);
    assert_eq!(h.peer.ready_state(), ReadyState::Closed);

    let events = h.settle().await;
    assert_eq!(count(&events, |e| matches!(e, SessionEvent::PermanentFailure(_))), 1);
    assert_eq!(h.peer.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_init_is_fatal() {
    let h = start(config());

    let connecting = h.connect();
    assert_eq!(h.accept().await["type"], "handshake_init");
    h.peer.deliver_json(&reject("unsupported version"));

    assert!(matches!(
        connecting.await.unwrap(),
        Err(LtpError::ProtocolRejection { .. })
    ));
    assert_eq!(h.client.state(), ConnectionState::PermanentlyFailed);
}

#[tokio::test(start_paused = true)]
async fn test_connect_after_permanent_failure_starts_over() {
    let h = start(config());

    let connecting = h.connect();
    h.accept().await;
    h.peer.deliver_json(&reject("try later"));
    assert!(connecting.await.unwrap().is_err());

    let connecting = h.connect();
    assert_eq!(h.accept().await["type"], "handshake_init");
    h.peer.deliver_json(&ack("t1", "s1", 5000));
    connecting.await.unwrap().unwrap();
    assert_eq!(h.peer.connect_count(), 2);
}

// ============================================================================
// Reconnect
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_backoff_delays_then_permanent_failure() {
    let config = config().with_reconnect(ReconnectConfig {
        base_delay_ms: 1000,
        max_delay_ms: 30_000,
        max_retries: 5,
    });
    let mut h = start(config);

    let connecting = h.connect();
    h.peer.next_connect().await.unwrap();

    for (attempt, expected) in [1000u64, 2000, 4000, 8000, 16000].into_iter().enumerate() {
        let closed_at = Instant::now();
        assert!(h.peer.close("connection refused"));
        h.peer.next_connect().await.unwrap();
        assert_elapsed(closed_at, expected);
        assert_eq!(h.peer.connect_count(), attempt + 2);
    }

    h.peer.close("connection refused");
    let err = connecting.await.unwrap().unwrap_err();
    match err {
        LtpError::RetryExhausted { attempts, cause } => {
            assert_eq!(attempts, 5);
            assert!(cause.contains("connection refused"), "{cause}");
        },
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(h.client.state(), ConnectionState::PermanentlyFailed);

    let events = h.settle().await;
    assert_eq!(count(&events, |e| matches!(e, SessionEvent::PermanentFailure(_))), 1);
    assert_eq!(h.peer.connect_count(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_delay_is_capped() {
    let config = config().with_reconnect(ReconnectConfig {
        base_delay_ms: 1000,
        max_delay_ms: 3000,
        max_retries: 10,
    });
    let h = start(config);

    let _connecting = h.connect();
    h.peer.next_connect().await.unwrap();

    for expected in [1000u64, 2000, 3000, 3000] {
        let closed_at = Instant::now();
        h.peer.close("reset");
        h.peer.next_connect().await.unwrap();
        assert_elapsed(closed_at, expected);
    }
}

#[tokio::test(start_paused = true)]
async fn test_refused_transport_counts_as_close() {
    let config = config().with_reconnect(ReconnectConfig {
        base_delay_ms: 100,
        max_delay_ms: 1000,
        max_retries: 2,
    });
    let h = start(config);
    h.peer.refuse_connects(true);

    let result = h.client.connect().await;
    assert!(matches!(result, Err(LtpError::RetryExhausted { attempts: 2, .. })));
    assert_eq!(h.peer.connect_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_lost_session_resumes_and_resets_backoff() {
    let mut h = start(config());
    h.establish(5000).await;
    assert!(matches!(h.next_event().await, SessionEvent::Connected { .. }));

    let closed_at = Instant::now();
    h.peer.close("server restart");
    assert_eq!(h.next_event().await, SessionEvent::Disconnected);

    let resume = h.accept().await;
    assert_elapsed(closed_at, 1000);
    assert_eq!(resume["type"], "handshake_resume");
    assert_eq!(resume["thread_id"], "t1");
    assert_eq!(resume["resume_reason"], "reconnect");

    h.peer.deliver_json(&ack("t1", "s2", 5000));
    assert_eq!(
        h.next_event().await,
        SessionEvent::Connected {
            thread_id: "t1".to_string(),
            session_id: "s2".to_string()
        }
    );

    // Backoff starts from the base again after a successful handshake.
    let closed_at = Instant::now();
    h.peer.close("server restart");
    h.peer.next_connect().await.unwrap();
    assert_elapsed(closed_at, 1000);
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_triggers_single_reconnect() {
    let mut h = start(config());
    h.establish(5000).await;

    h.peer.error("connection reset by peer");
    h.peer.close("connection reset by peer");
    h.peer.next_connect().await.unwrap();

    let events = h.settle().await;
    assert_eq!(count(&events, |e| *e == SessionEvent::Disconnected), 1);
    assert_eq!(h.peer.connect_count(), 2);
}

// ============================================================================
// Heartbeat
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_heartbeat_timeout_triggers_one_reconnect() {
    let mut h = start(config());
    h.establish(5000).await;
    let established_at = Instant::now();

    h.peer.next_connect().await.unwrap();
    // First unanswered ping at 5s, watchdog 10s, then 1s backoff.
    assert_elapsed(established_at, 16_000);

    let events = h.settle().await;
    assert_eq!(count(&events, |e| *e == SessionEvent::Disconnected), 1);
    assert_eq!(h.peer.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_timeout_racing_disconnect() {
    let mut h = start(config());
    h.establish(5000).await;

    tokio::time::sleep(Duration::from_millis(15_000)).await;
    h.client.disconnect().await.unwrap();

    let events = h.settle().await;
    assert_eq!(h.peer.connect_count(), 1);
    assert_eq!(h.client.state(), ConnectionState::Disconnected);
    assert_eq!(count(&events, |e| matches!(e, SessionEvent::PermanentFailure(_))), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pongs_keep_session_alive() {
    let mut h = start(config());
    h.establish(5000).await;
    let established_at = Instant::now();

    let mut pings = 0;
    while established_at.elapsed() < Duration::from_secs(60) {
        let frame = h.peer.next_json().await.unwrap();
        if frame["type"] == "ping" {
            pings += 1;
            h.peer.deliver_json(&pong());
        }
    }
    assert_eq!(pings, 12);
    assert_eq!(h.peer.connect_count(), 1);
    assert_eq!(h.client.state(), ConnectionState::Established);
    assert!(matches!(h.next_event().await, SessionEvent::Connected { .. }));
    assert_eq!(h.next_event().await, SessionEvent::Pong);
}

#[tokio::test(start_paused = true)]
async fn test_minimal_pongs_keep_session_alive() {
    let mut h = start(config());
    h.establish(5000).await;
    let established_at = Instant::now();

    let replies = [
        json!({"type": "pong"}),
        json!({"type": "pong", "timestamp": 1_700_000_000.75}),
    ];
    let mut pings = 0;
    while established_at.elapsed() < Duration::from_secs(30) {
        let frame = h.peer.next_json().await.unwrap();
        if frame["type"] == "ping" {
            h.peer.deliver_json(&replies[pings % replies.len()]);
            pings += 1;
        }
    }
    assert_eq!(pings, 6);
    assert_eq!(h.peer.connect_count(), 1);
    assert_eq!(h.client.state(), ConnectionState::Established);
    assert!(matches!(h.next_event().await, SessionEvent::Connected { .. }));
    assert_eq!(h.next_event().await, SessionEvent::Pong);
    assert_eq!(h.next_event().await, SessionEvent::Pong);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_override_and_disable() {
    let config = config().with_heartbeat(HeartbeatConfig {
        enabled: true,
        interval_ms: Some(750),
        timeout_ms: 10_000,
    });
    let h = start(config);
    h.establish(5000).await;
    let established_at = Instant::now();
    assert_eq!(h.peer.next_json().await.unwrap()["type"], "ping");
    assert_elapsed(established_at, 750);

    let config = ClientConfig::new("ws://ltp.test/ws", "c2").with_heartbeat(HeartbeatConfig {
        enabled: false,
        ..HeartbeatConfig::default()
    });
    let mut h = start(config);
    h.establish(5000).await;
    h.settle().await;
    assert!(h.peer.try_next_frame().is_none());
    assert_eq!(h.peer.connect_count(), 1);
}

// ============================================================================
// Disconnect
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_disconnect_rejects_pending_connect() {
    let h = start(config());

    let connecting = h.connect();
    h.peer.next_connect().await.unwrap();
    h.client.disconnect().await.unwrap();

    assert!(matches!(
        connecting.await.unwrap(),
        Err(LtpError::ClientDisconnected)
    ));
    assert_eq!(h.client.state(), ConnectionState::Disconnected);

    // A fresh connect is still allowed.
    let connecting = h.connect();
    h.accept().await;
    h.peer.deliver_json(&ack("t1", "s1", 5000));
    connecting.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_reconnect() {
    let mut h = start(config());
    h.establish(5000).await;

    h.peer.close("gone");
    h.client.disconnect().await.unwrap();

    let events = h.settle().await;
    assert_eq!(h.peer.connect_count(), 1);
    assert_eq!(count(&events, |e| *e == SessionEvent::Disconnected), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_closes_established_session() {
    let mut h = start(config());
    h.establish(5000).await;

    h.client.disconnect().await.unwrap();
    assert_eq!(h.peer.ready_state(), ReadyState::Closed);
    assert!(matches!(h.next_event().await, SessionEvent::Connected { .. }));
    assert_eq!(h.next_event().await, SessionEvent::Disconnected);

    let snapshot = h.client.session().await.unwrap();
    assert_eq!(snapshot.thread_id.as_deref(), Some("t1"));
    assert!(!snapshot.has_session_keys);
}

#[tokio::test(start_paused = true)]
async fn test_state_watch_sees_transitions() {
    let h = start(config());
    let mut watch = h.client.watch_state();

    let _connecting = h.connect();
    watch.changed().await.unwrap();
    assert_eq!(*watch.borrow_and_update(), ConnectionState::Connecting);

    h.accept().await;
    h.peer.deliver_json(&ack("t1", "s1", 5000));
    watch
        .wait_for(|s| *s == ConnectionState::Established)
        .await
        .unwrap();
}

// ============================================================================
// Outbound
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_send_without_key_uses_placeholder() {
    let h = start(config());
    h.establish(5000).await;

    h.client.send_event("clicked", json!({"id": 3})).unwrap();
    let frame = h.peer.next_json().await.unwrap();
    assert_eq!(frame["type"], "event");
    assert_eq!(frame["payload"]["event_type"], "clicked");
    assert_eq!(frame["payload"]["data"]["id"], 3);
    assert_eq!(frame["thread_id"], "t1");
    assert_eq!(frame["session_id"], "s1");
    assert_eq!(frame["meta"]["client_id"], "c1");
    assert_eq!(frame["signature"], PLACEHOLDER_SIGNATURE);
    assert!(frame["nonce"].as_str().unwrap().starts_with("c1-"));
}

#[tokio::test(start_paused = true)]
async fn test_send_with_secret_is_verifiable() {
    let h = start(config().with_secret_key("s3cret"));
    h.establish(5000).await;

    h.client.send_state_update(json!({"mood": "calm", "level": 2})).unwrap();
    let frame = h.peer.next_frame().await.unwrap();
    let envelope = Envelope::from_json(&frame).unwrap();
    assert_ne!(envelope.signature.as_deref(), Some(PLACEHOLDER_SIGNATURE));

    let server = AuthPipeline::new(
        "server",
        Arc::new(SoftwareCrypto),
        Some("s3cret"),
        VerificationPolicy::Strict,
    );
    assert_eq!(server.verify(&envelope, None), Verification::Valid);

    let wrong = AuthPipeline::new(
        "server",
        Arc::new(SoftwareCrypto),
        Some("other"),
        VerificationPolicy::Strict,
    );
    assert_eq!(wrong.verify(&envelope, None), Verification::Mismatch);
}

#[tokio::test(start_paused = true)]
async fn test_sends_keep_submission_order() {
    let h = start(config().with_secret_key("s3cret"));
    h.establish(60_000).await;

    for seq in 0..50 {
        h.client.send_state_update(json!({"seq": seq})).unwrap();
    }
    for seq in 0..50 {
        let frame = h.peer.next_json().await.unwrap();
        assert_eq!(frame["payload"]["seq"], seq);
    }
    assert_eq!(h.client.session().await.unwrap().messages_sent, 50);
}

#[tokio::test(start_paused = true)]
async fn test_send_while_reconnecting_is_dropped() {
    let h = start(config());
    h.establish(5000).await;

    h.peer.close("gone");
    h.client
        .send(EnvelopeBuilder::state_update(json!({"lost": true})))
        .unwrap();

    let resume = h.accept().await;
    assert_eq!(resume["type"], "handshake_resume");
    assert!(h.peer.try_next_frame().is_none());
}

// ============================================================================
// Inbound
// ============================================================================

fn server_message(auth: Option<&AuthPipeline>, builder: EnvelopeBuilder) -> String {
    let mut envelope = builder.build(Some("t1".to_string()), Some("s1".to_string()), 1_700_000_000);
    if let Some(auth) = auth {
        auth.sign(&mut envelope, None);
    }
    envelope.to_json().unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_inbound_dispatch() {
    let mut h = start(config());
    h.establish(60_000).await;
    assert!(matches!(h.next_event().await, SessionEvent::Connected { .. }));

    let raw = server_message(None, EnvelopeBuilder::state_update(json!({"x": 1})));
    h.peer.deliver(raw.clone());
    assert_eq!(h.events.recv().await.unwrap(), SessionEvent::Message(raw));
    assert_eq!(h.events.recv().await.unwrap(), SessionEvent::StateUpdate(json!({"x": 1})));

    h.peer.deliver(server_message(None, EnvelopeBuilder::event("nudge", json!({"n": 1}))));
    assert_eq!(
        h.next_event().await,
        SessionEvent::Event(json!({"event_type": "nudge", "data": {"n": 1}}))
    );

    h.peer.deliver(server_message(
        None,
        EnvelopeBuilder::new("error").payload(json!({"code": "rate_limited"})),
    ));
    assert_eq!(h.next_event().await, SessionEvent::Error(json!({"code": "rate_limited"})));

    h.peer.deliver("not json");
    h.peer.deliver_json(&pong());
    assert_eq!(h.next_event().await, SessionEvent::Pong);
    assert_eq!(h.client.state(), ConnectionState::Established);
}

#[tokio::test(start_paused = true)]
async fn test_lenient_delivers_bad_signatures() {
    let mut h = start(config().with_secret_key("s3cret"));
    h.establish(60_000).await;

    let forger = AuthPipeline::new(
        "server",
        Arc::new(SoftwareCrypto),
        Some("wrong"),
        VerificationPolicy::Lenient,
    );
    h.peer.deliver(server_message(
        Some(&forger),
        EnvelopeBuilder::state_update(json!({"forged": true})),
    ));
    h.peer.deliver(server_message(None, EnvelopeBuilder::state_update(json!({"unsigned": true}))));

    assert!(matches!(h.next_event().await, SessionEvent::Connected { .. }));
    assert_eq!(h.next_event().await, SessionEvent::StateUpdate(json!({"forged": true})));
    assert_eq!(h.next_event().await, SessionEvent::StateUpdate(json!({"unsigned": true})));
}

#[tokio::test(start_paused = true)]
async fn test_strict_drops_unverified_messages() {
    let config = config()
        .with_secret_key("s3cret")
        .with_verification(VerificationPolicy::Strict);
    let mut h = start(config);
    h.establish(60_000).await;
    assert!(matches!(h.next_event().await, SessionEvent::Connected { .. }));

    h.peer.deliver(server_message(None, EnvelopeBuilder::state_update(json!({"unsigned": true}))));
    match h.next_event().await {
        SessionEvent::Error(payload) => {
            assert_eq!(payload["code"], "verification_failed");
            assert_eq!(payload["message_type"], "state_update");
        },
        other => panic!("unexpected {other:?}"),
    }

    let server = AuthPipeline::new(
        "server",
        Arc::new(SoftwareCrypto),
        Some("s3cret"),
        VerificationPolicy::Strict,
    );
    h.peer.deliver(server_message(
        Some(&server),
        EnvelopeBuilder::state_update(json!({"signed": true})),
    ));
    assert_eq!(h.next_event().await, SessionEvent::StateUpdate(json!({"signed": true})));

    let snapshot = h.client.session().await.unwrap();
    assert_eq!(snapshot.verification_failures, 1);
    assert_eq!(snapshot.messages_received, 2);
}

// ============================================================================
// Key exchange
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_key_exchange_derives_session_mac_key() {
    let h = start(config().with_key_exchange(true));

    let connecting = h.connect();
    let init = h.accept().await;
    let client_key = PublicKey::from_base64(init["client_public_key"].as_str().unwrap()).unwrap();

    let server_pair = KeyPair::generate();
    let shared = server_pair.diffie_hellman(&client_key);
    let keys = derive_session_keys(&shared, "s1").unwrap();

    let mut ack = ack("t1", "s1", 60_000);
    ack["server_public_key"] = json!(server_pair.public_key().to_base64());
    h.peer.deliver_json(&ack);
    connecting.await.unwrap().unwrap();
    assert!(h.client.session().await.unwrap().has_session_keys);

    h.client.send_event("hello", json!({})).unwrap();
    let envelope = Envelope::from_json(&h.peer.next_frame().await.unwrap()).unwrap();

    let server = AuthPipeline::new(
        "server",
        Arc::new(SoftwareCrypto),
        None,
        VerificationPolicy::Strict,
    );
    assert_eq!(server.verify(&envelope, Some(&keys.mac_key())), Verification::Valid);
    assert_eq!(server.verify(&envelope, None), Verification::NoKey);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_server_key_is_not_fatal() {
    let h = start(config().with_key_exchange(true));

    let connecting = h.connect();
    h.accept().await;
    let mut ack = ack("t1", "s1", 60_000);
    ack["server_public_key"] = json!("definitely not a key");
    h.peer.deliver_json(&ack);
    connecting.await.unwrap().unwrap();

    assert!(!h.client.session().await.unwrap().has_session_keys);
    h.client.send_ping().unwrap();
    assert_eq!(h.peer.next_json().await.unwrap()["signature"], PLACEHOLDER_SIGNATURE);
}

#[tokio::test(start_paused = true)]
async fn test_session_keys_dropped_on_loss() {
    let h = start(config().with_key_exchange(true));

    let connecting = h.connect();
    let init = h.accept().await;
    let client_key = PublicKey::from_base64(init["client_public_key"].as_str().unwrap()).unwrap();
    let server_pair = KeyPair::generate();
    let _ = server_pair.diffie_hellman(&client_key);
    let mut ack = ack("t1", "s1", 60_000);
    ack["server_public_key"] = json!(server_pair.public_key().to_base64());
    h.peer.deliver_json(&ack);
    connecting.await.unwrap().unwrap();

    h.peer.close("gone");
    let resume = h.accept().await;
    assert_eq!(resume["type"], "handshake_resume");
    // Fresh ephemeral key per handshake.
    assert_ne!(resume["client_public_key"], init["client_public_key"]);
    assert!(!h.client.session().await.unwrap().has_session_keys);
}
