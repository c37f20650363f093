//! Heartbeat liveness monitoring.
//!
//! Clients send a `Heartbeat` command every `heartbeat_interval` ms. The
//! liveness task wakes every `check` interval and gives up once nothing has
//! been heard for `timeout`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Last time a client proved it was alive.
#[derive(Debug)]
pub struct Heartbeat {
    last: Mutex<Instant>,
}

impl Heartbeat {
    /// Start counting from now.
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    /// Record a heartbeat.
    pub fn beat(&self) {
        *self.last.lock() = Instant::now();
    }

    /// Time since the last heartbeat.
    pub fn elapsed(&self) -> Duration {
        self.last.lock().elapsed()
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of the liveness loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivenessResult {
    /// The client went silent for longer than the timeout.
    TimedOut,
    /// The owning session cancelled the timer.
    Cancelled,
}

/// Watch a heartbeat until it goes stale or `cancel` fires.
pub async fn run_liveness(
    heartbeat: Arc<Heartbeat>,
    check: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> LivenessResult {
    let mut ticker = time::interval(check);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if heartbeat.elapsed() > timeout {
                    return LivenessResult::TimedOut;
                }
            }
            () = cancel.cancelled() => {
                return LivenessResult::Cancelled;
            }
        }
    }
}
