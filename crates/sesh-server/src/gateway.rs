//! Process-wide coordinator.
//!
//! [`Gateway`] owns the registries and the collaborators, runs the per-session
//! timers, and exposes the administrative surface. Registry access goes
//! through [`Gateway::with_registry`], which holds the lock only for the
//! duration of a synchronous closure.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sesh_core::protocol::Hello;
use sesh_core::{Event, GatewayError, GroupId, LinkedUser, OutboundFrame, SessionId};
use sesh_settings::GatewaySettings;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::CommandRegistry;
use crate::group::GroupSummary;
use crate::health::HealthResponse;
use crate::identity::IdentityVerifier;
use crate::metrics::{
    COLLABORATOR_ERRORS_TOTAL, HEARTBEAT_TIMEOUTS_TOTAL, SESSIONS_EVICTED_TOTAL,
};
use crate::presence::{DevicePresence, MemoryPresenceStore, PresenceStore};
use crate::ratelimit::{CounterStore, MemoryCounterStore, RateLimiter};
use crate::registry::{Departure, Registry};
use crate::session::Session;
use crate::stores;
use crate::validation::NameFilter;
use crate::websocket::connection::{
    CLOSE_GOING_AWAY, CLOSE_HEARTBEAT_TIMEOUT, CLOSE_NORMAL, ClientConnection,
};
use crate::websocket::heartbeat::{Heartbeat, LivenessResult, run_liveness};

/// External services the gateway depends on.
pub struct Collaborators {
    /// Rate-limit counters.
    pub counters: Arc<dyn CounterStore>,
    /// Device presence sink.
    pub presence: Arc<dyn PresenceStore>,
    /// Bearer token verification.
    pub verifier: Arc<dyn IdentityVerifier>,
    /// Group name blocklist.
    pub names: NameFilter,
}

impl Collaborators {
    /// In-memory stores around `verifier`.
    pub fn in_memory(verifier: Arc<dyn IdentityVerifier>, names: NameFilter) -> Self {
        Self {
            counters: Arc::new(MemoryCounterStore::new()),
            presence: Arc::new(MemoryPresenceStore::new()),
            verifier,
            names,
        }
    }
}

/// Remote actions the administrative layer can push to a user's sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum RemoteActionKind {
    BeginHeat,
    CancelHeat,
    InquireDab,
    Disconnect,
    Refresh,
}

/// A remote action and its opaque data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteActionPayload {
    /// What to do.
    pub action: RemoteActionKind,
    /// Action-specific data, forwarded untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RemoteActionPayload {
    /// Device MAC addressed by a heat action: base64 after the first `_` in
    /// `data.id`.
    pub fn target_mac(&self) -> Option<String> {
        let id = self.data.as_ref()?.get("id")?.as_str()?;
        let (_, encoded) = id.split_once('_')?;
        let bytes = STANDARD.decode(encoded).ok()?;
        String::from_utf8(bytes).ok()
    }
}

/// Failure delivering a remote action.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RemoteActionError {
    /// No session is linked to the user.
    #[error("no session linked to user")]
    UserNotFound,
}

/// The coordinator shared by every connection.
pub struct Gateway {
    registry: Mutex<Registry>,
    pub(crate) settings: GatewaySettings,
    pub(crate) limiter: RateLimiter,
    pub(crate) presence: Arc<dyn PresenceStore>,
    pub(crate) verifier: Arc<dyn IdentityVerifier>,
    pub(crate) names: NameFilter,
    pub(crate) commands: CommandRegistry,
    started: Instant,
}

impl Gateway {
    /// Build a gateway from settings and collaborators.
    pub fn new(settings: GatewaySettings, collaborators: Collaborators) -> Arc<Self> {
        let limiter = RateLimiter::new(collaborators.counters, settings.services.store_timeout());
        let commands = CommandRegistry::standard(&settings.rate_limits);
        Arc::new(Self {
            registry: Mutex::new(Registry::new()),
            settings,
            limiter,
            presence: collaborators.presence,
            verifier: collaborators.verifier,
            names: collaborators.names,
            commands,
            started: Instant::now(),
        })
    }

    /// Run `f` with exclusive access to the registries.
    ///
    /// `f` is synchronous, so the lock is never held across a suspension point.
    pub fn with_registry<R>(&self, f: impl FnOnce(&mut Registry) -> R) -> R {
        f(&mut self.registry.lock())
    }

    /// Settings the gateway was built with.
    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    // ── Session lifecycle ───────────────────────────────────────────

    /// Register a session for a new connection, greet it, and start its
    /// liveness timer.
    pub fn open_session(self: &Arc<Self>, connection: Arc<ClientConnection>) -> SessionId {
        let session = Session::new(connection);
        let session_id = session.id.clone();
        let hello = Hello {
            session_id: session_id.clone(),
            session_token: session.token().clone(),
            heartbeat_interval: self.settings.server.heartbeat_interval_ms,
        };
        let _ = session.send_frame(&OutboundFrame::hello(&hello));
        let heartbeat = Arc::clone(session.heartbeat());
        let liveness = session.liveness_token();
        self.with_registry(|reg| reg.insert_session(session));

        self.spawn_liveness(session_id.clone(), heartbeat, liveness);
        info!(session_id = %session_id, "session opened");
        session_id
    }

    /// Start the liveness task for a session.
    pub(crate) fn spawn_liveness(
        self: &Arc<Self>,
        session_id: SessionId,
        heartbeat: Arc<Heartbeat>,
        cancel: CancellationToken,
    ) {
        let gateway = Arc::downgrade(self);
        let check = self.settings.server.liveness_check();
        let timeout = self.settings.server.heartbeat_timeout();
        let _ = tokio::spawn(async move {
            if run_liveness(heartbeat, check, timeout, cancel).await == LivenessResult::TimedOut {
                if let Some(gateway) = gateway.upgrade() {
                    gateway.heartbeat_timed_out(&session_id);
                }
            }
        });
    }

    fn heartbeat_timed_out(&self, session_id: &SessionId) {
        let connection = self.with_registry(|reg| {
            reg.session(session_id).map(|s| Arc::clone(s.connection()))
        });
        if let Some(connection) = connection {
            warn!(session_id = %session_id, "heartbeat timeout");
            counter!(HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
            connection.close(CLOSE_HEARTBEAT_TIMEOUT, "Heartbeat timeout");
        }
    }

    /// Record a client heartbeat.
    pub fn heartbeat(&self, session_id: &SessionId) {
        self.with_registry(|reg| {
            if let Some(session) = reg.session(session_id) {
                session.heartbeat().beat();
            }
        });
    }

    /// Handle the end of a socket.
    ///
    /// Ignored when the session has since moved to another connection.
    /// Otherwise the session is marked disconnected, its group is told, and
    /// it is evicted unless a resume arrives within the disconnect grace.
    pub fn connection_closed(self: &Arc<Self>, connection: &Arc<ClientConnection>) {
        let Some(session_id) = connection.session_id() else {
            return;
        };
        let eviction = self.with_registry(|reg| {
            let session = reg.session_mut(&session_id)?;
            if session.connection().id != connection.id {
                return None;
            }
            session.disconnected = true;
            session.cancel_timers();
            let token = session.arm_eviction();
            if let Some(group_id) = session.group_id.clone() {
                let _ = reg.broadcast(
                    &group_id,
                    Event::GroupUserUpdate,
                    json!({ "group_id": group_id, "session_id": session_id, "disconnected": true }),
                    &[&session_id],
                );
            }
            Some(token)
        });
        let Some(token) = eviction else {
            return;
        };

        debug!(session_id = %session_id, "connection closed, awaiting resume");
        let gateway: Weak<Self> = Arc::downgrade(self);
        let grace = self.settings.server.disconnect_grace();
        let _ = tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(grace) => {
                    if let Some(gateway) = gateway.upgrade() {
                        gateway.evict_if_disconnected(&session_id).await;
                    }
                }
                () = token.cancelled() => {}
            }
        });
    }

    async fn evict_if_disconnected(self: &Arc<Self>, session_id: &SessionId) {
        let still_gone = self.with_registry(|reg| reg.session(session_id).is_some_and(|s| !s.is_open()));
        if still_gone {
            info!(session_id = %session_id, "evicting disconnected session");
            counter!(SESSIONS_EVICTED_TOTAL).increment(1);
            self.evict_session(session_id).await;
        }
    }

    /// Leave the session's group, close its connection, and unregister it.
    pub async fn evict_session(self: &Arc<Self>, session_id: &SessionId) {
        let evicted = self.with_registry(|reg| {
            let departure = reg.leave(session_id).ok();
            let mut session = reg.remove_session(session_id)?;
            session.cancel_timers();
            Some((departure, Arc::clone(session.connection())))
        });
        let Some((departure, connection)) = evicted else {
            return;
        };
        connection.close(CLOSE_NORMAL, "Session closed");
        if let Some(departure) = departure {
            self.after_departure(departure).await;
        }
    }

    /// Close every connection with `GOING_AWAY` and return how many were
    /// asked to close. Sessions stay registered until the process exits.
    pub fn close_all(&self) -> usize {
        let connections = self.with_registry(|reg| {
            let mut connections = Vec::new();
            for id in reg.session_ids() {
                if let Some(session) = reg.session_mut(&id) {
                    session.cancel_timers();
                    connections.push(Arc::clone(session.connection()));
                }
            }
            connections
        });
        info!(count = connections.len(), "closing connections for shutdown");
        for connection in &connections {
            connection.close(CLOSE_GOING_AWAY, "Server shutting down");
        }
        connections.len()
    }

    // ── Groups ──────────────────────────────────────────────────────

    /// Leave the session's group and run the follow-up work.
    pub async fn leave_group(self: &Arc<Self>, session_id: &SessionId) -> Result<(), GatewayError> {
        let departure = self.with_registry(|reg| reg.leave(session_id))?;
        self.after_departure(departure).await;
        Ok(())
    }

    /// Clear presence and arm empty-group deletion after a leave.
    pub(crate) async fn after_departure(self: &Arc<Self>, departure: Departure) {
        if departure.now_empty && !departure.persistent {
            self.schedule_group_deletion(&departure.group_id);
        }
        if let Some(mac) = &departure.device_mac {
            self.clear_presence(mac).await;
        }
    }

    /// Delete `group_id` after the empty-group grace unless someone joins.
    pub(crate) fn schedule_group_deletion(self: &Arc<Self>, group_id: &GroupId) {
        let Some(token) = self.with_registry(|reg| Some(reg.group_mut(group_id)?.arm_deletion()))
        else {
            return;
        };
        let gateway = Arc::downgrade(self);
        let grace = self.settings.server.empty_group_grace();
        let group_id = group_id.clone();
        debug!(group_id = %group_id, grace_ms = grace.as_millis() as u64, "group empty, deletion scheduled");
        let _ = tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(grace) => {
                    if let Some(gateway) = gateway.upgrade() {
                        gateway.delete_if_empty(&group_id);
                    }
                }
                () = token.cancelled() => {}
            }
        });
    }

    fn delete_if_empty(&self, group_id: &GroupId) {
        self.with_registry(|reg| {
            let Some(group) = reg.group(group_id) else {
                return;
            };
            if !group.is_empty() || group.persistent {
                return;
            }
            let public = group.is_public();
            let _ = reg.remove_group(group_id);
            info!(group_id = %group_id, "empty group deleted");
            if public {
                reg.push_public_groups();
            }
        });
    }

    // ── Presence ────────────────────────────────────────────────────

    /// Publish device presence. Failures are logged only.
    pub(crate) async fn set_presence(&self, mac: &str, presence: &DevicePresence) {
        let limit = self.settings.services.store_timeout();
        if let Err(error) = stores::bounded(limit, self.presence.set(mac, presence)).await {
            warn!(%error, "presence write failed");
            counter!(COLLABORATOR_ERRORS_TOTAL, "collaborator" => "presence").increment(1);
        }
    }

    /// Remove device presence. Failures are logged only.
    pub(crate) async fn clear_presence(&self, mac: &str) {
        let limit = self.settings.services.store_timeout();
        if let Err(error) = stores::bounded(limit, self.presence.clear(mac)).await {
            warn!(%error, "presence clear failed");
            counter!(COLLABORATOR_ERRORS_TOTAL, "collaborator" => "presence").increment(1);
        }
    }

    // ── Administrative surface ──────────────────────────────────────

    /// Liveness counters for `/health`.
    pub fn health(&self) -> HealthResponse {
        self.with_registry(|reg| HealthResponse::collect(self.started, reg))
    }

    /// Directory of public groups.
    pub fn public_groups(&self) -> Vec<GroupSummary> {
        self.with_registry(|reg| reg.public_summaries())
    }

    /// Full snapshot of one group.
    pub fn group_snapshot(&self, group_id: &GroupId) -> Option<Value> {
        self.with_registry(|reg| reg.snapshot(group_id))
    }

    /// Sessions linked to an external user.
    pub fn sessions_for_user(&self, user_id: &str) -> Vec<SessionId> {
        self.with_registry(|reg| reg.sessions_by_user(user_id))
    }

    /// Push a refreshed user record and voice state into every session
    /// linked to `user_id`. For each, `None` leaves the field alone and
    /// `Some(None)` clears it, so `user: Some(None)` unlinks. Returns how many
    /// sessions matched.
    pub fn update_linked_user(
        &self,
        user_id: &str,
        user: Option<Option<LinkedUser>>,
        voice: Option<Option<Value>>,
    ) -> usize {
        self.with_registry(|reg| {
            let matched = reg.sessions_by_user(user_id);
            for session_id in &matched {
                let Some(session) = reg.session_mut(session_id) else {
                    continue;
                };
                if let Some(user) = &user {
                    session.user.clone_from(user);
                }
                if let Some(voice) = &voice {
                    session.voice.clone_from(voice);
                }
                let payload = json!({
                    "session_id": session_id,
                    "user": session.user,
                    "voice": session.voice,
                });
                if let Some(group_id) = session.group_id.clone() {
                    let mut payload = payload;
                    payload["group_id"] = json!(group_id);
                    let _ = reg.broadcast(&group_id, Event::GroupUserUpdate, payload, &[]);
                }
            }
            matched.len()
        })
    }

    /// Deliver a remote action to the matching sessions of `user_id`.
    ///
    /// Returns how many sessions the action was delivered to.
    pub fn remote_action(
        &self,
        user_id: &str,
        payload: &RemoteActionPayload,
    ) -> Result<usize, RemoteActionError> {
        self.with_registry(|reg| {
            let sessions = reg.sessions_by_user(user_id);
            if sessions.is_empty() {
                return Err(RemoteActionError::UserNotFound);
            }
            let targets: Vec<&SessionId> = match payload.action {
                RemoteActionKind::BeginHeat | RemoteActionKind::CancelHeat => {
                    let mac = payload.target_mac();
                    sessions
                        .iter()
                        .filter(|id| {
                            mac.is_some()
                                && reg.session(id).and_then(Session::device_mac) == mac.as_deref()
                        })
                        .take(1)
                        .collect()
                }
                RemoteActionKind::InquireDab => sessions
                    .iter()
                    .filter(|id| reg.session(id).is_some_and(|s| s.group_id.is_some()))
                    .take(1)
                    .collect(),
                RemoteActionKind::Disconnect | RemoteActionKind::Refresh => sessions.iter().collect(),
            };
            let data = json!(payload);
            let delivered = targets
                .into_iter()
                .filter(|id| reg.send_to(id, Event::RemoteAction, data.clone()))
                .count();
            debug!(user_id, action = ?payload.action, delivered, "remote action");
            Ok(delivered)
        })
    }

    /// Time allowed for a single command handler.
    pub(crate) fn handler_timeout(&self) -> Duration {
        self.settings.server.handler_timeout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestClient, gateway_with};
    use crate::group::Visibility;

    #[test]
    fn target_mac_decodes_suffix() {
        let encoded = STANDARD.encode("AA:BB:CC");
        let payload = RemoteActionPayload {
            action: RemoteActionKind::BeginHeat,
            data: Some(json!({ "id": format!("dev_{encoded}") })),
        };
        assert_eq!(payload.target_mac().as_deref(), Some("AA:BB:CC"));

        let bad = RemoteActionPayload {
            action: RemoteActionKind::BeginHeat,
            data: Some(json!({ "id": "nounderscore" })),
        };
        assert!(bad.target_mac().is_none());
    }

    #[tokio::test]
    async fn open_session_sends_hello() {
        let gateway = gateway_with(GatewaySettings::default());
        let mut client = TestClient::open(&gateway);
        let hello = client.next_frame().await;
        assert_eq!(hello["op"], 0);
        assert_eq!(hello["d"]["session_id"], client.session_id.as_str());
        assert_eq!(hello["d"]["heartbeat_interval"], 5000);
        assert_eq!(hello["d"]["session_token"].as_str().unwrap().len(), 32);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_client_is_closed_with_heartbeat_code() {
        let gateway = gateway_with(GatewaySettings::default());
        let client = TestClient::open(&gateway);
        tokio::time::sleep(Duration::from_secs(17)).await;
        let request = client.connection.close_request().unwrap();
        assert_eq!(request.code, CLOSE_HEARTBEAT_TIMEOUT);
        assert_eq!(request.reason, "Heartbeat timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_keep_session_alive() {
        let gateway = gateway_with(GatewaySettings::default());
        let client = TestClient::open(&gateway);
        for _ in 0..6 {
            tokio::time::sleep(Duration::from_secs(5)).await;
            gateway.heartbeat(&client.session_id);
        }
        assert!(client.connection.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_session_evicted_after_grace() {
        let gateway = gateway_with(GatewaySettings::default());
        let a = TestClient::open(&gateway);
        let mut b = TestClient::open(&gateway);
        let gid = gateway
            .with_registry(|reg| reg.create_group(&a.session_id, "g".into(), Visibility::Private, chrono::Utc::now()))
            .unwrap();
        gateway
            .with_registry(|reg| reg.join(&b.session_id, &gid, chrono::Utc::now()))
            .unwrap();
        b.drain();

        a.drop_socket(&gateway);
        let update = b.next_event("GROUP_USER_UPDATE").await;
        assert_eq!(update["disconnected"], true);
        assert_eq!(update["session_id"], a.session_id.as_str());

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(gateway.with_registry(|reg| reg.session(&a.session_id).is_some()));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(gateway.with_registry(|reg| reg.session(&a.session_id).is_none()));
        let left = b.next_event("GROUP_USER_LEFT").await;
        assert_eq!(left["session_id"], a.session_id.as_str());
        assert_eq!(
            gateway.with_registry(|reg| reg.group(&gid).unwrap().owner_session_id.clone()),
            b.session_id
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_group_survives_until_grace_and_rejoin_cancels() {
        let gateway = gateway_with(GatewaySettings::default());
        let a = TestClient::open(&gateway);
        let b = TestClient::open(&gateway);
        let gid = gateway
            .with_registry(|reg| reg.create_group(&a.session_id, "g".into(), Visibility::Private, chrono::Utc::now()))
            .unwrap();

        gateway.leave_group(&a.session_id).await.unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(gateway.group_snapshot(&gid).is_some());

        gateway
            .with_registry(|reg| reg.join(&b.session_id, &gid, chrono::Utc::now()))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(gateway.group_snapshot(&gid).is_some());

        gateway.leave_group(&b.session_id).await.unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(gateway.group_snapshot(&gid).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_group_is_not_deleted() {
        let gateway = gateway_with(GatewaySettings::default());
        let a = TestClient::open(&gateway);
        let gid = gateway
            .with_registry(|reg| reg.create_group(&a.session_id, "g".into(), Visibility::Private, chrono::Utc::now()))
            .unwrap();
        gateway.with_registry(|reg| reg.group_mut(&gid).unwrap().persistent = true);
        gateway.leave_group(&a.session_id).await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(gateway.group_snapshot(&gid).is_some());
    }

    #[tokio::test]
    async fn update_linked_user_counts_matches() {
        let gateway = gateway_with(GatewaySettings::default());
        let a = TestClient::open(&gateway);
        gateway.with_registry(|reg| {
            reg.session_mut(&a.session_id).unwrap().user =
                Some(serde_json::from_value(json!({"id": "u1"})).unwrap());
        });
        let user: LinkedUser = serde_json::from_value(json!({"id": "u1", "name": "new"})).unwrap();
        assert_eq!(
            gateway.update_linked_user("u1", Some(Some(user)), Some(Some(json!({"channel": 1})))),
            1
        );
        assert_eq!(gateway.update_linked_user("u2", None, None), 0);
        gateway.with_registry(|reg| {
            let session = reg.session(&a.session_id).unwrap();
            assert_eq!(session.user.as_ref().unwrap().profile["name"], "new");
            assert_eq!(session.voice, Some(json!({"channel": 1})));
        });

        assert_eq!(gateway.update_linked_user("u1", None, Some(None)), 1);
        assert!(gateway.with_registry(|reg| reg.session(&a.session_id).unwrap().voice.is_none()));
        assert_eq!(gateway.update_linked_user("u1", Some(None), None), 1);
        assert!(gateway.sessions_for_user("u1").is_empty());
    }

    #[tokio::test]
    async fn remote_action_targets() {
        let gateway = gateway_with(GatewaySettings::default());
        let mut a = TestClient::open(&gateway);
        let mut b = TestClient::open(&gateway);
        gateway.with_registry(|reg| {
            for id in [&a.session_id, &b.session_id] {
                reg.session_mut(id).unwrap().user =
                    Some(serde_json::from_value(json!({"id": "u1"})).unwrap());
            }
            reg.session_mut(&b.session_id).unwrap().device_state =
                Some(serde_json::from_value(json!({"deviceMac": "AA:BB", "state": 5})).unwrap());
        });
        a.drain();
        b.drain();

        let heat = RemoteActionPayload {
            action: RemoteActionKind::BeginHeat,
            data: Some(json!({ "id": format!("x_{}", STANDARD.encode("AA:BB")) })),
        };
        assert_eq!(gateway.remote_action("u1", &heat), Ok(1));
        let event = b.next_event("REMOTE_ACTION").await;
        assert_eq!(event["action"], "BEGIN_HEAT");
        assert!(a.try_event().is_none());

        let refresh = RemoteActionPayload {
            action: RemoteActionKind::Refresh,
            data: None,
        };
        assert_eq!(gateway.remote_action("u1", &refresh), Ok(2));
        assert_eq!(
            gateway.remote_action("nobody", &refresh),
            Err(RemoteActionError::UserNotFound)
        );
    }

    #[tokio::test]
    async fn close_all_closes_connections() {
        let gateway = gateway_with(GatewaySettings::default());
        let a = TestClient::open(&gateway);
        assert_eq!(gateway.close_all(), 1);
        assert_eq!(a.connection.close_request().unwrap().code, CLOSE_GOING_AWAY);
    }
}
