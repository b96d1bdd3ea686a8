//! Heartbeat liveness.
//!
//! A ping timer fires every interval. The first unanswered ping arms the
//! watchdog; a pong disarms it. If the watchdog fires the link is
//! considered dead.

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::Sleep;

/// A cancellable one-shot timer. Disarmed timers never fire.
#[derive(Debug, Default)]
pub(crate) struct Timer {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl Timer {
    /// (Re)arm to fire after `after`, replacing any previous deadline
    pub(crate) fn arm(&mut self, after: Duration) {
        self.sleep = Some(Box::pin(tokio::time::sleep(after)));
    }

    pub(crate) fn cancel(&mut self) {
        self.sleep = None;
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    /// Resolves when the armed deadline passes, then disarms. Pending
    /// forever while disarmed. Cancel-safe.
    pub(crate) async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
            },
            None => pending().await,
        }
    }
}

/// What the heartbeat wants done
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeartbeatTick {
    /// Send a ping now
    Ping,
    /// No pong in time
    Timeout,
}

/// Ping scheduler plus pong watchdog
#[derive(Debug)]
pub(crate) struct HeartbeatMonitor {
    interval: Option<Duration>,
    timeout: Duration,
    ping_timer: Timer,
    timeout_timer: Timer,
}

impl HeartbeatMonitor {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            interval: None,
            timeout,
            ping_timer: Timer::default(),
            timeout_timer: Timer::default(),
        }
    }

    /// Start pinging every `interval`. Clears any previous run first.
    pub(crate) fn start(&mut self, interval: Duration) {
        self.stop();
        self.interval = Some(interval);
        self.ping_timer.arm(interval);
    }

    /// Cancel both timers
    pub(crate) fn stop(&mut self) {
        self.interval = None;
        self.ping_timer.cancel();
        self.timeout_timer.cancel();
    }

    pub(crate) fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// A ping went out: schedule the next one and arm the watchdog unless
    /// an earlier ping is still unanswered.
    pub(crate) fn ping_sent(&mut self) {
        let Some(interval) = self.interval else {
            return;
        };
        self.ping_timer.arm(interval);
        if !self.timeout_timer.is_armed() {
            self.timeout_timer.arm(self.timeout);
        }
    }

    /// A pong arrived
    pub(crate) fn pong_received(&mut self) {
        self.timeout_timer.cancel();
    }

    /// Next heartbeat action. Pending forever while stopped.
    pub(crate) async fn tick(&mut self) -> HeartbeatTick {
        tokio::select! {
            () = self.ping_timer.fired() => HeartbeatTick::Ping,
            () = self.timeout_timer.fired() => HeartbeatTick::Timeout,
        }
    }
}
