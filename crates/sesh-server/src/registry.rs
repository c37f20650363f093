//! Session and group registries.
//!
//! The [`Registry`] is the only owner of sessions and groups. Cross-entity
//! references are ids, and every lookup can miss. Mutations that touch both
//! sides of the session ↔ group association live here so the two stay
//! consistent.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use metrics::gauge;
use serde_json::{Value, json};
use sesh_core::errors::{ALREADY_IN_A_GROUP, INVALID_GROUP, NOT_IN_GROUP};
use sesh_core::{Event, GatewayError, GroupId, OutboundFrame, SessionId};
use tracing::debug;

use crate::group::{self, Group, GroupSummary, Presence, Visibility};
use crate::metrics::{GROUPS_ACTIVE, SESSIONS_ACTIVE};
use crate::session::Session;

/// What a completed leave left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    /// Group that was left.
    pub group_id: GroupId,
    /// Nobody remains.
    pub now_empty: bool,
    /// The group is exempt from empty-group deletion.
    pub persistent: bool,
    /// Device whose presence should be cleared.
    pub device_mac: Option<String>,
}

/// Authoritative session and group stores.
#[derive(Default)]
pub struct Registry {
    sessions: HashMap<SessionId, Session>,
    groups: HashMap<GroupId, Group>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Sessions ────────────────────────────────────────────────────

    /// Look up a session.
    pub fn session(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Look up a session mutably.
    pub fn session_mut(&mut self, id: &SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    /// Register a session.
    pub fn insert_session(&mut self, session: Session) {
        let _ = self.sessions.insert(session.id.clone(), session);
        gauge!(SESSIONS_ACTIVE).set(self.sessions.len() as f64);
    }

    /// Unregister a session. The caller is responsible for detaching it
    /// from its group first.
    pub fn remove_session(&mut self, id: &SessionId) -> Option<Session> {
        let removed = self.sessions.remove(id);
        gauge!(SESSIONS_ACTIVE).set(self.sessions.len() as f64);
        removed
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Sessions whose connection is still open.
    pub fn open_connection_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_open()).count()
    }

    /// Sessions linked to an external user id.
    ///
    /// Full scan; fine at the scale a single gateway process serves.
    pub fn sessions_by_user(&self, user_id: &str) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|s| s.user.as_ref().is_some_and(|u| u.id == user_id))
            .map(|s| s.id.clone())
            .collect()
    }

    /// Every session id, for shutdown.
    pub(crate) fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.keys().cloned().collect()
    }

    // ── Groups ──────────────────────────────────────────────────────

    /// Look up a group.
    pub fn group(&self, id: &GroupId) -> Option<&Group> {
        self.groups.get(id)
    }

    /// Look up a group mutably.
    pub fn group_mut(&mut self, id: &GroupId) -> Option<&mut Group> {
        self.groups.get_mut(id)
    }

    /// Register a group, re-rolling its id on the rare collision.
    pub fn insert_group(&mut self, mut group: Group) -> GroupId {
        while self.groups.contains_key(&group.id) {
            group.id = GroupId::new();
        }
        let id = group.id.clone();
        let _ = self.groups.insert(id.clone(), group);
        gauge!(GROUPS_ACTIVE).set(self.groups.len() as f64);
        id
    }

    /// Unregister a group, cancelling its timers.
    pub fn remove_group(&mut self, id: &GroupId) -> Option<Group> {
        let mut removed = self.groups.remove(id)?;
        removed.cancel_deletion();
        gauge!(GROUPS_ACTIVE).set(self.groups.len() as f64);
        Some(removed)
    }

    /// Number of registered groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Presence classification for a group.
    pub fn presence(&self, group_id: &GroupId) -> Option<Presence> {
        Some(Presence::of(self.group(group_id)?, &self.sessions))
    }

    /// Full snapshot of a group.
    pub fn snapshot(&self, group_id: &GroupId) -> Option<Value> {
        Some(group::snapshot(self.group(group_id)?, &self.sessions))
    }

    /// Member projections for a group, seshers first.
    pub fn member_views(&self, group_id: &GroupId) -> Vec<Value> {
        self.group(group_id)
            .map(|g| group::member_views(g, &self.sessions))
            .unwrap_or_default()
    }

    /// Directory entries for every public group.
    pub fn public_summaries(&self) -> Vec<GroupSummary> {
        let mut summaries: Vec<GroupSummary> = self
            .groups
            .values()
            .filter(|g| g.is_public())
            .map(|g| GroupSummary::of(g, &self.sessions))
            .collect();
        summaries.sort_by(|a, b| a.group_id.as_str().cmp(b.group_id.as_str()));
        summaries
    }

    // ── Delivery ────────────────────────────────────────────────────

    /// Send an event to one session. Misses and closed connections are
    /// silently dropped.
    pub fn send_to(&self, id: &SessionId, event: Event, data: Value) -> bool {
        self.session(id).is_some_and(|s| s.send(event, data))
    }

    /// Send an event to every member of a group except `ignored`.
    ///
    /// Delivery is best-effort per member. Returns how many members the
    /// event was enqueued for.
    pub fn broadcast(
        &self,
        group_id: &GroupId,
        event: Event,
        data: Value,
        ignored: &[&SessionId],
    ) -> usize {
        let Some(group) = self.group(group_id) else {
            return 0;
        };
        let Some(text) = OutboundFrame::event(event, data).to_text() else {
            return 0;
        };
        let text = Arc::new(text);
        let mut delivered = 0;
        for member in group.member_ids() {
            if ignored.contains(&member) {
                continue;
            }
            let Some(session) = self.sessions.get(member) else {
                continue;
            };
            if session.connection().send(Arc::clone(&text)) {
                delivered += 1;
            } else {
                debug!(group_id = %group_id, session_id = %member, ?event, "broadcast delivery dropped");
            }
        }
        delivered
    }

    /// Push the public directory to every connected session.
    pub fn push_public_groups(&self) {
        let data = json!(self.public_summaries());
        let Some(text) = OutboundFrame::event(Event::PublicGroupsUpdate, data).to_text() else {
            return;
        };
        let text = Arc::new(text);
        for session in self.sessions.values() {
            let _ = session.connection().send(Arc::clone(&text));
        }
    }

    // ── Membership ──────────────────────────────────────────────────

    /// Create a group owned by `session_id` and make it the first member.
    pub fn create_group(
        &mut self,
        session_id: &SessionId,
        name: String,
        visibility: Visibility,
        now: DateTime<Utc>,
    ) -> Result<GroupId, GatewayError> {
        let session = self
            .session(session_id)
            .ok_or_else(|| GatewayError::state(NOT_IN_GROUP))?;
        if session.group_id.is_some() {
            return Err(GatewayError::state(ALREADY_IN_A_GROUP));
        }

        let group_id = self.insert_group(Group::new(name, visibility, session_id.clone()));
        if let Some(group) = self.group_mut(&group_id) {
            let _ = group.add_member(session_id.clone(), now);
        }
        if let Some(session) = self.session_mut(session_id) {
            session.group_id = Some(group_id.clone());
            session.strain = None;
        }

        if let Some(group) = self.group(&group_id) {
            let _ = self.send_to(
                session_id,
                Event::GroupCreate,
                json!({
                    "group_id": group.id,
                    "name": group.name,
                    "visibility": group.visibility,
                    "owner_session_id": group.owner_session_id,
                }),
            );
        }
        if let Some(snapshot) = self.snapshot(&group_id) {
            let _ = self.send_to(session_id, Event::JoinedGroup, snapshot);
        }
        if visibility == Visibility::Public {
            self.push_public_groups();
        }
        Ok(group_id)
    }

    /// Add `session_id` to `group_id`.
    ///
    /// An empty group hands ownership to the joiner and stops its pending
    /// deletion.
    pub fn join(
        &mut self,
        session_id: &SessionId,
        group_id: &GroupId,
        now: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        let session = self
            .session(session_id)
            .ok_or_else(|| GatewayError::state(INVALID_GROUP))?;
        if session.group_id.is_some() {
            return Err(GatewayError::state(ALREADY_IN_A_GROUP));
        }
        let group = self
            .group_mut(group_id)
            .ok_or_else(|| GatewayError::state(INVALID_GROUP))?;

        if group.is_empty() {
            group.owner_session_id = session_id.clone();
        }
        group.cancel_deletion();
        let _ = group.add_member(session_id.clone(), now);
        let public = group.is_public();

        if let Some(session) = self.session_mut(session_id) {
            session.group_id = Some(group_id.clone());
            session.strain = None;
        }

        if let Some(session) = self.session(session_id) {
            let mut view = session.member_view(now);
            view["group_id"] = json!(group_id);
            view["group_joined"] = json!(now.to_rfc3339_opts(SecondsFormat::Millis, true));
            let _ = self.broadcast(group_id, Event::GroupUserJoin, view, &[session_id]);
        }
        if let Some(snapshot) = self.snapshot(group_id) {
            let _ = self.send_to(session_id, Event::JoinedGroup, snapshot);
        }
        if public {
            self.push_public_groups();
        }
        Ok(())
    }

    /// Remove `session_id` from its group.
    ///
    /// Broadcasts the departure and the new roster, and hands ownership to
    /// the earliest remaining member when the owner leaves. Scheduling the
    /// deletion of a now-empty group is left to the caller.
    pub fn leave(&mut self, session_id: &SessionId) -> Result<Departure, GatewayError> {
        let session = self
            .session_mut(session_id)
            .ok_or_else(|| GatewayError::state(NOT_IN_GROUP))?;
        let group_id = session
            .group_id
            .take()
            .ok_or_else(|| GatewayError::state(NOT_IN_GROUP))?;
        session.strain = None;
        let device_mac = session.device_mac().map(str::to_owned);

        let group = self
            .group_mut(&group_id)
            .ok_or_else(|| GatewayError::state(NOT_IN_GROUP))?;
        let _ = group.remove_member(session_id);

        let mut new_owner = None;
        if group.is_owner(session_id) {
            if let Some(next) = group.first_member().cloned() {
                group.owner_session_id = next.clone();
                new_owner = Some(next);
            }
        }
        let now_empty = group.is_empty();
        let persistent = group.persistent;
        let public = group.is_public();
        let ready = group.ready_list();

        let _ = self.broadcast(
            &group_id,
            Event::GroupUserLeft,
            json!({ "group_id": group_id, "session_id": session_id }),
            &[],
        );
        let members = self.member_views(&group_id);
        let _ = self.broadcast(
            &group_id,
            Event::GroupUpdate,
            json!({ "group_id": group_id, "members": members, "ready": ready }),
            &[],
        );
        if let Some(owner) = new_owner {
            debug!(group_id = %group_id, owner = %owner, "ownership transferred on leave");
            let _ = self.broadcast(
                &group_id,
                Event::GroupUpdate,
                json!({ "group_id": group_id, "owner_session_id": owner }),
                &[],
            );
        }
        if public {
            self.push_public_groups();
        }

        Ok(Departure {
            group_id,
            now_empty,
            persistent,
            device_mac,
        })
    }

    /// Detach every member from a group and unregister it.
    ///
    /// Returns the removed group and the device MACs whose presence should
    /// be cleared. No per-member broadcasts are sent.
    pub fn dissolve(&mut self, group_id: &GroupId) -> Option<(Group, Vec<String>)> {
        let group = self.remove_group(group_id)?;
        let mut macs = Vec::new();
        for member in group.member_ids() {
            if let Some(session) = self.sessions.get_mut(member) {
                if session.group_id.as_ref() == Some(group_id) {
                    session.group_id = None;
                    session.strain = None;
                    if let Some(mac) = session.device_mac() {
                        macs.push(mac.to_owned());
                    }
                }
            }
        }
        if group.is_public() {
            self.push_public_groups();
        }
        Some((group, macs))
    }
}
