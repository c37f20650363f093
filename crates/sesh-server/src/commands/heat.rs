//! Heat cycle commands.
//!
//! `chilling → awaiting → seshing → chilling`. Device reports drive the
//! ready and finished transitions (see [`super::member::SendDeviceState`]);
//! the commands here cover the explicit ones.

use async_trait::async_trait;
use serde_json::{Value, json};
use sesh_core::errors::INVALID_GROUP_STATE;
use sesh_core::{Event, GatewayError, GroupId, SessionId};
use tracing::{info, instrument};

use super::current_group;
use crate::dispatch::{CommandContext, CommandHandler};
use crate::group::GroupState;
use crate::registry::Registry;

fn broadcast_state(reg: &Registry, group_id: &GroupId, state: GroupState) {
    let _ = reg.broadcast(
        group_id,
        Event::GroupUpdate,
        json!({ "group_id": group_id, "state": state }),
        &[],
    );
}

/// Move an awaiting group to seshing and tell every member whether it takes
/// part.
pub(crate) fn start_with_ready(
    reg: &mut Registry,
    group_id: &GroupId,
    initiator: &SessionId,
) -> Result<(), GatewayError> {
    let group = reg
        .group_mut(group_id)
        .ok_or_else(|| GatewayError::state(INVALID_GROUP_STATE))?;
    if group.state != GroupState::Awaiting {
        return Err(GatewayError::state(INVALID_GROUP_STATE));
    }
    group.state = GroupState::Seshing;
    info!(group_id = %group_id, initiator = %initiator, "heat started");

    broadcast_state(reg, group_id, GroupState::Seshing);

    let (Some(group), Some(presence)) = (reg.group(group_id), reg.presence(group_id)) else {
        return Ok(());
    };
    for member in group.member_ids() {
        let _ = reg.send_to(
            member,
            Event::GroupHeatBegin,
            json!({
                "group_id": group_id,
                "session_id": initiator,
                "excluded": !group.is_ready(member),
                "watcher": presence.is_watcher(member),
                "away": presence.is_away(member),
            }),
        );
    }
    Ok(())
}

/// Whether every active sesher has reported ready. False when there are none.
pub(crate) fn all_ready(reg: &Registry, group_id: &GroupId) -> bool {
    let (Some(group), Some(presence)) = (reg.group(group_id), reg.presence(group_id)) else {
        return false;
    };
    let mut active = presence.active_seshers().peekable();
    active.peek().is_some() && active.all(|id| group.is_ready(id))
}

/// `InquireHeating`: ask the group whether it is ready to heat.
pub struct InquireHeat;

#[async_trait]
impl CommandHandler for InquireHeat {
    #[instrument(skip_all, fields(session_id = %ctx.session_id))]
    async fn handle(&self, ctx: &CommandContext, _data: Option<Value>) -> Result<(), GatewayError> {
        ctx.gateway.with_registry(|reg| {
            let group_id = current_group(reg, &ctx.session_id)?;
            let group = reg
                .group_mut(&group_id)
                .ok_or_else(|| GatewayError::state(INVALID_GROUP_STATE))?;
            if group.state != GroupState::Chilling {
                return Err(GatewayError::state(INVALID_GROUP_STATE));
            }
            group.state = GroupState::Awaiting;
            info!(group_id = %group_id, "heat inquiry");

            broadcast_state(reg, &group_id, GroupState::Awaiting);

            let (Some(group), Some(presence)) = (reg.group(&group_id), reg.presence(&group_id))
            else {
                return Ok(());
            };
            for member in group.member_ids() {
                let _ = reg.send_to(
                    member,
                    Event::GroupHeatInquiry,
                    json!({
                        "group_id": group_id,
                        "session_id": ctx.session_id,
                        "watcher": presence.is_watcher(member),
                        "away": presence.is_away(member),
                    }),
                );
            }
            Ok(())
        })
    }
}

/// `StartWithReady`: begin the cycle with whoever is ready.
pub struct StartWithReady;

#[async_trait]
impl CommandHandler for StartWithReady {
    #[instrument(skip_all, fields(session_id = %ctx.session_id))]
    async fn handle(&self, ctx: &CommandContext, _data: Option<Value>) -> Result<(), GatewayError> {
        ctx.gateway.with_registry(|reg| {
            let group_id = current_group(reg, &ctx.session_id)?;
            start_with_ready(reg, &group_id, &ctx.session_id)
        })
    }
}

/// `StopAwaiting`: abandon the cycle without counting it.
pub struct StopHeat;

#[async_trait]
impl CommandHandler for StopHeat {
    #[instrument(skip_all, fields(session_id = %ctx.session_id))]
    async fn handle(&self, ctx: &CommandContext, _data: Option<Value>) -> Result<(), GatewayError> {
        ctx.gateway.with_registry(|reg| {
            let group_id = current_group(reg, &ctx.session_id)?;
            if let Some(group) = reg.group_mut(&group_id) {
                group.chill();
            }
            let _ = reg.broadcast(
                &group_id,
                Event::GroupUpdate,
                json!({ "group_id": group_id, "state": GroupState::Chilling, "ready": [] }),
                &[],
            );
            Ok(())
        })
    }
}
