//! Shared fixtures for unit tests.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sesh_core::{InboundFrame, Op, SessionId};
use sesh_settings::GatewaySettings;
use tokio::sync::mpsc;

use crate::gateway::{Collaborators, Gateway};
use crate::identity::MockIdentityVerifier;
use crate::presence::MemoryPresenceStore;
use crate::ratelimit::MemoryCounterStore;
use crate::validation::{DEFAULT_BLOCKED_TERMS, NameFilter};
use crate::websocket::connection::ClientConnection;

pub(crate) fn gateway_with(settings: GatewaySettings) -> Arc<Gateway> {
    gateway_with_verifier(settings, MockIdentityVerifier::new())
}

pub(crate) fn gateway_with_verifier(
    settings: GatewaySettings,
    verifier: MockIdentityVerifier,
) -> Arc<Gateway> {
    let names = NameFilter::new(DEFAULT_BLOCKED_TERMS).unwrap();
    Gateway::new(settings, Collaborators::in_memory(Arc::new(verifier), names))
}

/// A gateway whose presence writes can be inspected.
pub(crate) fn gateway_with_presence(
    settings: GatewaySettings,
) -> (Arc<Gateway>, Arc<MemoryPresenceStore>) {
    let presence = Arc::new(MemoryPresenceStore::new());
    let collaborators = Collaborators {
        counters: Arc::new(MemoryCounterStore::new()),
        presence: Arc::clone(&presence) as _,
        verifier: Arc::new(MockIdentityVerifier::new()),
        names: NameFilter::new(DEFAULT_BLOCKED_TERMS).unwrap(),
    };
    (Gateway::new(settings, collaborators), presence)
}

/// A session driven directly through the gateway, without a socket.
pub(crate) struct TestClient {
    pub session_id: SessionId,
    pub connection: Arc<ClientConnection>,
    rx: mpsc::Receiver<Arc<String>>,
}

impl TestClient {
    pub fn open(gateway: &Arc<Gateway>) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let connection = Arc::new(ClientConnection::new(uuid::Uuid::new_v4().to_string(), tx));
        let session_id = gateway.open_session(Arc::clone(&connection));
        Self {
            session_id,
            connection,
            rx,
        }
    }

    /// Open a client and discard its greeting.
    pub fn ready(gateway: &Arc<Gateway>) -> Self {
        let mut client = Self::open(gateway);
        client.drain();
        client
    }

    /// Dispatch a command as this client's connection would.
    pub async fn send(&self, gateway: &Arc<Gateway>, op: Op, d: Value) {
        let session_id = self.connection.session_id().unwrap();
        let frame = InboundFrame {
            op: u64::from(u8::from(op)),
            d: if d.is_null() { None } else { Some(d) },
        };
        gateway
            .commands
            .dispatch(gateway, &self.connection, session_id, frame)
            .await;
    }

    pub async fn next_frame(&mut self) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(1), self.rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("channel closed");
        serde_json::from_str(&text).unwrap()
    }

    pub async fn next_any(&mut self) -> (String, Value) {
        let frame = self.next_frame().await;
        (
            frame["t"].as_str().unwrap_or_default().to_string(),
            frame["d"].clone(),
        )
    }

    /// Skip frames until an event named `name` arrives; return its payload.
    pub async fn next_event(&mut self, name: &str) -> Value {
        loop {
            let (t, d) = self.next_any().await;
            if t == name {
                return d;
            }
        }
    }

    pub fn try_event(&mut self) -> Option<(String, Value)> {
        let text = self.rx.try_recv().ok()?;
        let frame: Value = serde_json::from_str(&text).unwrap();
        Some((
            frame["t"].as_str().unwrap_or_default().to_string(),
            frame["d"].clone(),
        ))
    }

    /// Every queued event, in order.
    pub fn events(&mut self) -> Vec<(String, Value)> {
        std::iter::from_fn(|| self.try_event()).collect()
    }

    /// Names of every queued event, in order.
    pub fn names(&mut self) -> Vec<String> {
        self.events().into_iter().map(|(t, _)| t).collect()
    }

    pub fn drain(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }

    /// Simulate the socket going away.
    pub fn drop_socket(&self, gateway: &Arc<Gateway>) {
        self.connection.mark_closed();
        gateway.connection_closed(&self.connection);
    }
}
