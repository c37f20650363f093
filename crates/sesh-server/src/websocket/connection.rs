//! WebSocket client connection handle.
//!
//! A [`ClientConnection`] is the gateway's only way to reach a socket. The
//! socket task owns the actual stream; the handle enqueues text frames and
//! raises a close signal that the socket task turns into a close frame.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sesh_core::{OutboundFrame, SessionId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Server going away.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Client stopped sending heartbeats.
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4000;
/// Session was resumed on another connection.
pub const CLOSE_SESSION_REPLACED: u16 = 4001;

/// Close code and reason requested by the gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseRequest {
    /// WebSocket close code.
    pub code: u16,
    /// Human-readable reason.
    pub reason: String,
}

/// Represents a connected WebSocket client.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: String,
    /// Session currently driven by this connection. Changes on resume.
    session_id: Mutex<Option<SessionId>>,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Raised once the connection is closing or closed.
    closed: CancellationToken,
    /// First close request wins.
    close_request: Mutex<Option<CloseRequest>>,
    /// Count of messages dropped due to a full or closed channel.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection.
    pub fn new(id: String, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            session_id: Mutex::new(None),
            tx,
            connected_at: Instant::now(),
            closed: CancellationToken::new(),
            close_request: Mutex::new(None),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Bind this connection to a session.
    pub fn bind_session(&self, session_id: SessionId) {
        *self.session_id.lock() = Some(session_id);
    }

    /// Get the currently bound session ID.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id.lock().clone()
    }

    /// Whether frames can still be delivered.
    pub fn is_open(&self) -> bool {
        !self.closed.is_cancelled() && !self.tx.is_closed()
    }

    /// Send a text message to the client.
    ///
    /// Messages to a closed connection are dropped without queuing. Returns
    /// `false` if the message was not enqueued.
    pub fn send(&self, message: Arc<String>) -> bool {
        if !self.is_open() {
            return false;
        }
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize a frame and send it to the client.
    pub fn send_frame(&self, frame: &OutboundFrame) -> bool {
        match frame.to_text() {
            Some(text) => self.send(Arc::new(text)),
            None => false,
        }
    }

    /// Request the connection be closed with `code` and `reason`.
    ///
    /// Safe to call repeatedly; only the first request is kept.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        {
            let mut request = self.close_request.lock();
            if request.is_none() {
                *request = Some(CloseRequest {
                    code,
                    reason: reason.into(),
                });
            }
        }
        self.closed.cancel();
    }

    /// Mark the connection closed without a close frame (peer went away).
    pub fn mark_closed(&self) {
        self.closed.cancel();
    }

    /// Token cancelled when the connection starts closing.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// The close request, if the gateway asked for one.
    pub fn close_request(&self) -> Option<CloseRequest> {
        self.close_request.lock().clone()
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
