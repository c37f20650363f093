//! Command handlers, one per client opcode.
//!
//! Handlers share a shape: check membership and authority under the
//! registry lock, apply the change, broadcast, and release the lock before
//! touching any collaborator.

pub mod chat;
pub mod group;
pub mod heat;
pub mod member;
pub mod session;

use sesh_core::errors::{NOT_IN_GROUP, NOT_OWNER};
use sesh_core::{GatewayError, GroupId, Op, SessionId};
use sesh_settings::RateLimitSettings;

use crate::dispatch::CommandRegistry;
use crate::registry::Registry;
use crate::session::Session;

/// Register every handler with its configured rate limit.
pub fn register_all(registry: &mut CommandRegistry, limits: &RateLimitSettings) {
    let rule = |op: Op| limits.rule(op.as_str());

    registry.register(Op::Join, group::JoinGroup, rule(Op::Join));
    registry.register(Op::CreateGroup, group::CreateGroup, rule(Op::CreateGroup));
    registry.register(Op::SendDeviceState, member::SendDeviceState, rule(Op::SendDeviceState));
    registry.register(Op::UpdateGroup, group::UpdateGroup, rule(Op::UpdateGroup));
    registry.register(Op::UpdateUser, member::UpdateUser, rule(Op::UpdateUser));
    registry.register(Op::LeaveGroup, group::LeaveGroup, rule(Op::LeaveGroup));
    registry.register(Op::InquireHeating, heat::InquireHeat, rule(Op::InquireHeating));
    registry.register(Op::StartWithReady, heat::StartWithReady, rule(Op::StartWithReady));
    registry.register(Op::DisconnectDevice, member::DisconnectDevice, rule(Op::DisconnectDevice));
    registry.register(Op::SendMessage, chat::SendMessage, rule(Op::SendMessage));
    registry.register(Op::StopAwaiting, heat::StopHeat, rule(Op::StopAwaiting));
    registry.register(Op::ResumeSession, session::ResumeSession, rule(Op::ResumeSession));
    registry.register(Op::SendReaction, chat::SendReaction, rule(Op::SendReaction));
    registry.register(Op::DeleteGroup, group::DeleteGroup, rule(Op::DeleteGroup));
    registry.register(Op::TransferOwnership, group::TransferOwnership, rule(Op::TransferOwnership));
    registry.register(Op::KickFromGroup, group::KickMember, rule(Op::KickFromGroup));
    registry.register(Op::LinkUser, member::LinkUser, rule(Op::LinkUser));
    registry.register(Op::Heartbeat, session::Heartbeat, None);

    registry.deprecate(Op::AwayState);
    registry.deprecate(Op::GroupStrain);
    registry.deprecate(Op::SetMobile);
}

/// The caller's group, which must still exist.
pub(crate) fn current_group(reg: &Registry, session_id: &SessionId) -> Result<GroupId, GatewayError> {
    let group_id = reg
        .session(session_id)
        .and_then(|s| s.group_id.clone())
        .ok_or_else(|| GatewayError::state(NOT_IN_GROUP))?;
    if reg.group(&group_id).is_none() {
        return Err(GatewayError::state(NOT_IN_GROUP));
    }
    Ok(group_id)
}

/// Whether the session's linked account is an admin.
pub(crate) fn is_admin(reg: &Registry, session_id: &SessionId) -> bool {
    reg.session(session_id).is_some_and(Session::is_admin)
}

/// Require the caller to own `group_id` or be an admin.
pub(crate) fn require_owner_or_admin(
    reg: &Registry,
    session_id: &SessionId,
    group_id: &GroupId,
) -> Result<(), GatewayError> {
    let owner = reg.group(group_id).is_some_and(|g| g.is_owner(session_id));
    if !owner && !is_admin(reg, session_id) {
        return Err(GatewayError::state(NOT_OWNER));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use sesh_core::{GroupId, Op};
    use sesh_settings::GatewaySettings;

    use crate::group::GroupState;
    use crate::test_support::{TestClient, gateway_with};

    fn device(mac: &str) -> serde_json::Value {
        json!({ "deviceMac": mac, "state": 1 })
    }

    #[tokio::test]
    async fn two_seshers_auto_start_and_finish() {
        let gateway = gateway_with(GatewaySettings::default());
        let mut a = TestClient::ready(&gateway);
        let mut b = TestClient::ready(&gateway);

        a.send(&gateway, Op::CreateGroup, json!({ "name": "Session" })).await;
        let raw_id = a.next_event("JOINED_GROUP").await["group_id"].clone();
        let group_id = GroupId::from(raw_id.as_str().unwrap());
        b.send(&gateway, Op::Join, json!({ "group_id": raw_id })).await;
        assert_eq!(a.next_event("GROUP_USER_JOIN").await["session_id"], b.session_id.as_str());
        let _ = b.next_event("JOINED_GROUP").await;

        a.send(&gateway, Op::SendDeviceState, device("AA")).await;
        b.send(&gateway, Op::SendDeviceState, device("BB")).await;
        a.drain();
        b.drain();

        a.send(&gateway, Op::InquireHeating, json!(null)).await;
        for client in [&mut a, &mut b] {
            let inquiry = client.next_event("GROUP_HEAT_INQUIRY").await;
            assert_eq!(inquiry["watcher"], false);
        }

        b.send(&gateway, Op::SendDeviceState, json!({ "state": 6 })).await;
        let state = |gateway: &crate::gateway::Gateway| {
            gateway.with_registry(|reg| reg.group(&group_id).unwrap().state)
        };
        assert_eq!(state(&gateway), GroupState::Awaiting);

        a.send(&gateway, Op::SendDeviceState, json!({ "state": 6 })).await;
        assert_eq!(state(&gateway), GroupState::Seshing);
        for client in [&mut a, &mut b] {
            let begin = client.next_event("GROUP_HEAT_BEGIN").await;
            assert_eq!(begin["excluded"], false);
        }

        b.send(&gateway, Op::SendDeviceState, json!({ "state": 7 })).await;
        let update = a.next_event("GROUP_UPDATE").await;
        assert_eq!(update["sesh_counter"], 1);
        assert_eq!(update["state"], "chilling");
        assert_eq!(state(&gateway), GroupState::Chilling);
        gateway.with_registry(|reg| assert!(reg.group(&group_id).unwrap().ready_list().is_empty()));
    }

    #[tokio::test]
    async fn watcher_does_not_block_auto_start() {
        let gateway = gateway_with(GatewaySettings::default());
        let mut a = TestClient::ready(&gateway);
        let mut watcher = TestClient::ready(&gateway);
        a.send(&gateway, Op::CreateGroup, json!({})).await;
        let raw_id = a.next_event("JOINED_GROUP").await["group_id"].clone();
        watcher.send(&gateway, Op::Join, json!({ "group_id": raw_id })).await;
        a.send(&gateway, Op::SendDeviceState, device("AA")).await;
        a.send(&gateway, Op::InquireHeating, json!(null)).await;
        watcher.drain();

        a.send(&gateway, Op::SendDeviceState, json!({ "state": 6 })).await;
        let begin = watcher.next_event("GROUP_HEAT_BEGIN").await;
        assert_eq!(begin["excluded"], true);
        assert_eq!(begin["watcher"], true);
    }
}
