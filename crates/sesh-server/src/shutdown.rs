//! Ordered gateway shutdown.
//!
//! 1. Refuse new upgrades.
//! 2. Close every live socket with `GOING_AWAY`.
//! 3. Wait for the socket tasks to finish.
//! 4. Stop the listeners and wait for them.
//!
//! All waiting shares one deadline.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::gateway::Gateway;

/// Deadline used by the binary for the whole sequence.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// What a shutdown managed to finish before its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Connections asked to close.
    pub closed: usize,
    /// Every socket task exited.
    pub sockets_drained: bool,
    /// Every listener task exited.
    pub listeners_stopped: bool,
}

/// Drives the shutdown sequence for one gateway.
pub struct ShutdownCoordinator {
    gateway: Arc<Gateway>,
    sockets: TaskTracker,
    listeners: CancellationToken,
}

impl ShutdownCoordinator {
    /// Coordinator for `gateway`, whose socket tasks run under `sockets`.
    pub fn new(gateway: Arc<Gateway>, sockets: TaskTracker) -> Self {
        Self {
            gateway,
            sockets,
            listeners: CancellationToken::new(),
        }
    }

    /// Token the listeners watch; cancelled once the sockets have drained.
    pub fn listener_token(&self) -> CancellationToken {
        self.listeners.clone()
    }

    /// Whether new upgrades should be refused.
    pub fn is_draining(&self) -> bool {
        self.sockets.is_closed()
    }

    /// Run the sequence, giving up on whatever is still running after `timeout`.
    pub async fn run(&self, listeners: Vec<JoinHandle<()>>, timeout: Duration) -> ShutdownReport {
        let deadline = Instant::now() + timeout;
        let _ = self.sockets.close();

        let closed = self.gateway.close_all();
        info!(closed, live = self.sockets.len(), "draining sockets");
        let sockets_drained = timeout_at(deadline, self.sockets.wait()).await.is_ok();
        if !sockets_drained {
            warn!(remaining = self.sockets.len(), "sockets still open at shutdown deadline");
        }

        self.listeners.cancel();
        let listeners_stopped = timeout_at(deadline, futures::future::join_all(listeners))
            .await
            .is_ok();
        if !listeners_stopped {
            warn!("listeners still running at shutdown deadline");
        }

        ShutdownReport {
            closed,
            sockets_drained,
            listeners_stopped,
        }
    }
}
