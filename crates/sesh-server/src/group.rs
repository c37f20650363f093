//! Group model: membership, ready set, heat state, and projections.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sesh_core::{GroupId, SessionId};
use tokio_util::sync::CancellationToken;

use crate::session::Session;

/// Who can find the group in the public directory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Listed in the public directory.
    Public,
    /// Reachable by id only.
    #[default]
    Private,
}

/// Heat cycle state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupState {
    /// Idle.
    #[default]
    Chilling,
    /// Waiting for members to report ready.
    Awaiting,
    /// Cycle running.
    Seshing,
}

/// A named, ownable collection of sessions.
pub struct Group {
    /// Group id.
    pub id: GroupId,
    /// Display name.
    pub name: String,
    /// Directory visibility.
    pub visibility: Visibility,
    /// Exempt from empty-group deletion.
    pub persistent: bool,
    /// Heat cycle state.
    pub state: GroupState,
    /// Completed cycles.
    pub sesh_counter: u64,
    /// Current owner. A member whenever the group is non-empty.
    pub owner_session_id: SessionId,
    members: IndexMap<SessionId, DateTime<Utc>>,
    ready: IndexSet<SessionId>,
    deletion: Option<CancellationToken>,
}

impl Group {
    /// Create an empty group owned by `owner`.
    pub fn new(name: String, visibility: Visibility, owner: SessionId) -> Self {
        Self {
            id: GroupId::new(),
            name,
            visibility,
            persistent: false,
            state: GroupState::Chilling,
            sesh_counter: 0,
            owner_session_id: owner,
            members: IndexMap::new(),
            ready: IndexSet::new(),
            deletion: None,
        }
    }

    /// Whether the group is listed publicly.
    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    // ── Membership ──────────────────────────────────────────────────

    /// Add a member joining at `joined`. Returns `false` if already present.
    pub fn add_member(&mut self, session_id: SessionId, joined: DateTime<Utc>) -> bool {
        if self.members.contains_key(&session_id) {
            return false;
        }
        let _ = self.members.insert(session_id, joined);
        true
    }

    /// Remove a member, dropping it from the ready set too.
    pub fn remove_member(&mut self, session_id: &SessionId) -> bool {
        let _ = self.ready.shift_remove(session_id);
        self.members.shift_remove(session_id).is_some()
    }

    /// Whether `session_id` is a member.
    pub fn is_member(&self, session_id: &SessionId) -> bool {
        self.members.contains_key(session_id)
    }

    /// When `session_id` joined.
    pub fn joined_at(&self, session_id: &SessionId) -> Option<DateTime<Utc>> {
        self.members.get(session_id).copied()
    }

    /// Member ids in join order.
    pub fn member_ids(&self) -> impl Iterator<Item = &SessionId> {
        self.members.keys()
    }

    /// Earliest remaining member.
    pub fn first_member(&self) -> Option<&SessionId> {
        self.members.keys().next()
    }

    /// Number of members.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Whether the group has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether `session_id` may administer the group.
    pub fn is_owner(&self, session_id: &SessionId) -> bool {
        &self.owner_session_id == session_id
    }

    // ── Ready set ───────────────────────────────────────────────────

    /// Mark a member ready. Returns `false` for non-members and repeats.
    pub fn mark_ready(&mut self, session_id: &SessionId) -> bool {
        self.is_member(session_id) && self.ready.insert(session_id.clone())
    }

    /// Whether `session_id` is ready.
    pub fn is_ready(&self, session_id: &SessionId) -> bool {
        self.ready.contains(session_id)
    }

    /// Ready members in the order they became ready.
    pub fn ready_list(&self) -> Vec<SessionId> {
        self.ready.iter().cloned().collect()
    }

    // ── State ───────────────────────────────────────────────────────

    /// Return to chilling, clearing the ready set.
    pub fn chill(&mut self) {
        self.state = GroupState::Chilling;
        self.ready.clear();
    }

    /// Complete a cycle: count it and return to chilling.
    pub fn complete_cycle(&mut self) {
        self.sesh_counter += 1;
        self.chill();
    }

    // ── Deletion timer ──────────────────────────────────────────────

    /// Arm the empty-group deletion timer, cancelling any previous one.
    pub(crate) fn arm_deletion(&mut self) -> CancellationToken {
        self.cancel_deletion();
        let token = CancellationToken::new();
        self.deletion = Some(token.clone());
        token
    }

    /// Disarm the deletion timer.
    pub(crate) fn cancel_deletion(&mut self) {
        if let Some(token) = self.deletion.take() {
            token.cancel();
        }
    }

    /// Whether a deletion is pending.
    pub fn deletion_pending(&self) -> bool {
        self.deletion.is_some()
    }
}

/// Presence classification of a group's members.
///
/// `away` overlaps the other two lists.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Presence {
    /// Members with a valid device attached.
    pub seshers: Vec<SessionId>,
    /// Members without one.
    pub watchers: Vec<SessionId>,
    /// Members flagged away.
    pub away: Vec<SessionId>,
}

impl Presence {
    /// Classify `group`'s members. Members missing from `sessions` are skipped.
    pub fn of(group: &Group, sessions: &HashMap<SessionId, Session>) -> Self {
        let mut presence = Self::default();
        for id in group.member_ids() {
            let Some(session) = sessions.get(id) else {
                continue;
            };
            if session.has_valid_device() {
                presence.seshers.push(id.clone());
            } else {
                presence.watchers.push(id.clone());
            }
            if session.away {
                presence.away.push(id.clone());
            }
        }
        presence
    }

    /// Whether `id` is a watcher.
    pub fn is_watcher(&self, id: &SessionId) -> bool {
        self.watchers.contains(id)
    }

    /// Whether `id` is away.
    pub fn is_away(&self, id: &SessionId) -> bool {
        self.away.contains(id)
    }

    /// Seshers that are not away.
    pub fn active_seshers(&self) -> impl Iterator<Item = &SessionId> {
        self.seshers.iter().filter(|id| !self.away.contains(id))
    }
}

/// Directory entry for a public group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroupSummary {
    /// Group id.
    pub group_id: GroupId,
    /// Display name.
    pub name: String,
    /// Visibility.
    pub visibility: Visibility,
    /// Heat state.
    pub state: GroupState,
    /// Persistence flag.
    pub persistent: bool,
    /// Completed cycles.
    pub sesh_counter: u64,
    /// Total members.
    pub member_count: usize,
    /// Members with a valid device.
    pub sesher_count: usize,
    /// Members without one.
    pub watcher_count: usize,
}

impl GroupSummary {
    /// Summarize `group`.
    pub fn of(group: &Group, sessions: &HashMap<SessionId, Session>) -> Self {
        let presence = Presence::of(group, sessions);
        Self {
            group_id: group.id.clone(),
            name: group.name.clone(),
            visibility: group.visibility,
            state: group.state,
            persistent: group.persistent,
            sesh_counter: group.sesh_counter,
            member_count: group.member_count(),
            sesher_count: presence.seshers.len(),
            watcher_count: presence.watchers.len(),
        }
    }
}

/// Member projections, seshers first then watchers.
pub fn member_views(group: &Group, sessions: &HashMap<SessionId, Session>) -> Vec<Value> {
    let presence = Presence::of(group, sessions);
    presence
        .seshers
        .iter()
        .chain(presence.watchers.iter())
        .filter_map(|id| {
            let session = sessions.get(id)?;
            Some(session.member_view(group.joined_at(id)?))
        })
        .collect()
}

/// Full group snapshot sent on join and by the administrative lookup.
pub fn snapshot(group: &Group, sessions: &HashMap<SessionId, Session>) -> Value {
    json!({
        "group_id": group.id,
        "name": group.name,
        "visibility": group.visibility,
        "persistent": group.persistent,
        "owner_session_id": group.owner_session_id,
        "state": group.state,
        "sesh_counter": group.sesh_counter,
        "ready": group.ready_list(),
        "members": member_views(group, sessions),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_with(ids: &[&str]) -> Group {
        let mut group = Group::new("Blue Dream".into(), Visibility::Public, SessionId::from(ids[0]));
        for id in ids {
            assert!(group.add_member(SessionId::from(*id), Utc::now()));
        }
        group
    }

    #[test]
    fn new_group_defaults() {
        let group = Group::new("x".into(), Visibility::default(), SessionId::from("a"));
        assert_eq!(group.state, GroupState::Chilling);
        assert_eq!(group.visibility, Visibility::Private);
        assert_eq!(group.sesh_counter, 0);
        assert!(group.is_empty());
        assert_eq!(group.id.len(), 6);
    }

    #[test]
    fn duplicate_member_rejected() {
        let mut group = group_with(&["a"]);
        assert!(!group.add_member(SessionId::from("a"), Utc::now()));
        assert_eq!(group.member_count(), 1);
    }

    #[test]
    fn members_keep_join_order() {
        let mut group = group_with(&["a", "b", "c"]);
        let _ = group.remove_member(&SessionId::from("a"));
        assert_eq!(group.first_member().unwrap().as_str(), "b");
        let order: Vec<&str> = group.member_ids().map(SessionId::as_str).collect();
        assert_eq!(order, ["b", "c"]);
    }

    #[test]
    fn remove_member_drops_ready() {
        let mut group = group_with(&["a", "b"]);
        let b = SessionId::from("b");
        assert!(group.mark_ready(&b));
        assert!(group.remove_member(&b));
        assert!(!group.is_ready(&b));
        assert!(group.ready_list().is_empty());
    }

    #[test]
    fn ready_only_for_members_once() {
        let mut group = group_with(&["a"]);
        assert!(!group.mark_ready(&SessionId::from("z")));
        assert!(group.mark_ready(&SessionId::from("a")));
        assert!(!group.mark_ready(&SessionId::from("a")));
    }

    #[test]
    fn complete_cycle_counts_and_clears() {
        let mut group = group_with(&["a"]);
        group.state = GroupState::Seshing;
        let _ = group.mark_ready(&SessionId::from("a"));
        group.complete_cycle();
        assert_eq!(group.state, GroupState::Chilling);
        assert_eq!(group.sesh_counter, 1);
        assert!(group.ready_list().is_empty());
    }

    #[test]
    fn chill_does_not_count() {
        let mut group = group_with(&["a"]);
        group.state = GroupState::Awaiting;
        group.chill();
        assert_eq!(group.sesh_counter, 0);
    }

    #[test]
    fn deletion_timer_rearm_cancels_previous() {
        let mut group = group_with(&["a"]);
        let first = group.arm_deletion();
        let second = group.arm_deletion();
        assert!(first.is_cancelled());
        assert!(group.deletion_pending());
        group.cancel_deletion();
        assert!(second.is_cancelled());
        assert!(!group.deletion_pending());
    }

    #[test]
    fn enums_serialize_lowercase() {
        assert_eq!(serde_json::to_value(GroupState::Seshing).unwrap(), "seshing");
        assert_eq!(serde_json::to_value(Visibility::Public).unwrap(), "public");
        let v: Visibility = serde_json::from_value(json!("private")).unwrap();
        assert_eq!(v, Visibility::Private);
    }

    #[test]
    fn presence_skips_missing_sessions() {
        let group = group_with(&["a", "b"]);
        let presence = Presence::of(&group, &HashMap::new());
        assert_eq!(presence, Presence::default());
    }
}
