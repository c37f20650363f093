//! Per-client session state.
//!
//! A [`Session`] outlives any single connection: on resume a new
//! connection is moved onto an existing session and the session keeps its
//! id, group membership, and device state.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value, json};
use sesh_core::{DeviceState, Event, GroupId, LinkedUser, OutboundFrame, SessionId, SessionToken};
use tokio_util::sync::CancellationToken;

use crate::websocket::connection::ClientConnection;
use crate::websocket::heartbeat::Heartbeat;

/// One connected (or recently disconnected) client.
pub struct Session {
    /// Stable id, survives resumes.
    pub id: SessionId,
    token: SessionToken,
    connection: Arc<ClientConnection>,
    /// The connection dropped and no resume has arrived yet.
    pub disconnected: bool,
    /// Client reports being on a mobile device.
    pub mobile: bool,
    /// Client reports being away.
    pub away: bool,
    /// Display strain tag.
    pub strain: Option<String>,
    /// Current group, if any.
    pub group_id: Option<GroupId>,
    /// Latest merged device telemetry.
    pub device_state: Option<DeviceState>,
    /// Linked external account.
    pub user: Option<LinkedUser>,
    /// Voice channel state pushed by the administrative layer.
    pub voice: Option<Value>,
    heartbeat: Arc<Heartbeat>,
    liveness: CancellationToken,
    eviction: Option<CancellationToken>,
}

impl Session {
    /// Create a session for a fresh connection.
    pub fn new(connection: Arc<ClientConnection>) -> Self {
        let id = SessionId::new();
        connection.bind_session(id.clone());
        Self {
            id,
            token: SessionToken::new(),
            connection,
            disconnected: false,
            mobile: false,
            away: false,
            strain: None,
            group_id: None,
            device_state: None,
            user: None,
            voice: None,
            heartbeat: Arc::new(Heartbeat::new()),
            liveness: CancellationToken::new(),
            eviction: None,
        }
    }

    /// The resume secret.
    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    /// The connection currently driving this session.
    pub fn connection(&self) -> &Arc<ClientConnection> {
        &self.connection
    }

    /// Whether the current connection can still receive frames.
    pub fn is_open(&self) -> bool {
        self.connection.is_open()
    }

    /// Whether the linked account holds admin rights.
    pub fn is_admin(&self) -> bool {
        self.user.as_ref().is_some_and(LinkedUser::is_admin)
    }

    /// Whether a valid device is attached.
    pub fn has_valid_device(&self) -> bool {
        self.device_state.as_ref().is_some_and(DeviceState::is_valid)
    }

    /// Device MAC, if known.
    pub fn device_mac(&self) -> Option<&str> {
        self.device_state.as_ref()?.device_mac.as_deref()
    }

    /// Deliver an event. Dropped silently when the connection is closed.
    pub fn send(&self, event: Event, data: Value) -> bool {
        self.connection.send_frame(&OutboundFrame::event(event, data))
    }

    /// Deliver an error event with a machine-readable code.
    pub fn error(&self, event: Event, code: &str) -> bool {
        self.send(event, json!({ "code": code }))
    }

    /// Deliver a pre-built frame.
    pub fn send_frame(&self, frame: &OutboundFrame) -> bool {
        self.connection.send_frame(frame)
    }

    /// Heartbeat tracker shared with the liveness task.
    pub fn heartbeat(&self) -> &Arc<Heartbeat> {
        &self.heartbeat
    }

    /// Replace the liveness timer token, cancelling the old one.
    pub(crate) fn reset_liveness(&mut self) -> CancellationToken {
        self.liveness.cancel();
        self.liveness = CancellationToken::new();
        self.heartbeat.beat();
        self.liveness.clone()
    }

    /// Current liveness timer token.
    pub(crate) fn liveness_token(&self) -> CancellationToken {
        self.liveness.clone()
    }

    /// Arm the disconnect-grace timer, cancelling any previous one.
    pub(crate) fn arm_eviction(&mut self) -> CancellationToken {
        self.cancel_eviction();
        let token = CancellationToken::new();
        self.eviction = Some(token.clone());
        token
    }

    /// Disarm the disconnect-grace timer.
    pub(crate) fn cancel_eviction(&mut self) {
        if let Some(token) = self.eviction.take() {
            token.cancel();
        }
    }

    /// Stop every timer owned by this session.
    pub(crate) fn cancel_timers(&mut self) {
        self.liveness.cancel();
        self.cancel_eviction();
    }

    /// Take over another session's connection and credentials.
    ///
    /// Returns the connection this session was using before.
    pub(crate) fn adopt(&mut self, from: Session) -> Arc<ClientConnection> {
        from.connection.bind_session(self.id.clone());
        self.token = from.token;
        self.mobile = from.mobile;
        self.away = from.away;
        self.disconnected = false;
        self.cancel_eviction();
        std::mem::replace(&mut self.connection, from.connection)
    }

    /// Member projection sent to group members.
    pub fn member_view(&self, joined: DateTime<Utc>) -> Value {
        json!({
            "session_id": self.id,
            "device_state": self.device_state,
            "away": self.away,
            "group_joined": joined.to_rfc3339_opts(SecondsFormat::Millis, true),
            "disconnected": self.disconnected,
            "mobile": self.mobile,
            "strain": self.strain,
            "user": self.user,
            "voice": self.voice,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn make_session() -> (Session, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(16);
        let conn = Arc::new(ClientConnection::new("c1".into(), tx));
        (Session::new(conn), rx)
    }

    #[test]
    fn new_session_binds_connection() {
        let (session, _rx) = make_session();
        assert_eq!(session.connection().session_id(), Some(session.id.clone()));
        assert!(!session.disconnected);
        assert!(session.group_id.is_none());
        assert_eq!(session.token().len(), 32);
    }

    #[tokio::test]
    async fn send_then_closed_drops() {
        let (session, mut rx) = make_session();
        assert!(session.error(Event::GroupActionError, "NOT_IN_GROUP"));
        let msg = rx.recv().await.unwrap();
        assert!(msg.contains("NOT_IN_GROUP"));

        session.connection().mark_closed();
        assert!(!session.send(Event::GroupUpdate, json!({})));
    }

    #[test]
    fn adopt_moves_connection_and_token() {
        let (mut old, _rx_old) = make_session();
        let (new, _rx_new) = make_session();
        let new_conn_id = new.connection().id.clone();
        let new_token = new.token().clone();
        let mut new = new;
        new.mobile = true;
        new.away = true;
        old.disconnected = true;
        let eviction = old.arm_eviction();

        let previous = old.adopt(new);
        assert_eq!(previous.id, "c1");
        assert_eq!(old.connection().id, new_conn_id);
        assert_eq!(old.token(), &new_token);
        assert_eq!(old.connection().session_id(), Some(old.id.clone()));
        assert!(old.mobile && old.away);
        assert!(!old.disconnected);
        assert!(eviction.is_cancelled());
    }

    #[test]
    fn reset_liveness_cancels_previous() {
        let (mut session, _rx) = make_session();
        let first = session.liveness_token();
        let second = session.reset_liveness();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        session.cancel_timers();
        assert!(second.is_cancelled());
    }

    #[test]
    fn member_view_fields() {
        let (mut session, _rx) = make_session();
        session.strain = Some("Blue Dream".into());
        let view = session.member_view(Utc::now());
        assert_eq!(view["session_id"], session.id.as_str());
        assert_eq!(view["strain"], "Blue Dream");
        assert_eq!(view["away"], false);
        assert!(view["group_joined"].as_str().unwrap().ends_with('Z'));
        assert!(view["device_state"].is_null());
    }

    #[test]
    fn admin_requires_linked_flag() {
        let (mut session, _rx) = make_session();
        assert!(!session.is_admin());
        session.user = Some(
            serde_json::from_value(json!({"id": "u1", "flags": 1})).unwrap(),
        );
        assert!(session.is_admin());
    }
}
