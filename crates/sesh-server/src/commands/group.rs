//! Group membership and administration commands.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value, json};
use sesh_core::errors::{CANNOT_DELETE_PERSISTENT_GROUP, CANNOT_KICK_OWNER, NOT_OWNER, USER_NOT_IN_GROUP};
use sesh_core::{Event, GatewayError};
use tracing::{info, instrument};

use super::{current_group, is_admin, require_owner_or_admin};
use crate::dispatch::{CommandContext, CommandHandler};
use crate::group::Group;
use crate::names;
use crate::validation::{CreateGroupPayload, GroupPatch, JoinPayload, TargetPayload, parse_payload};

/// `CreateGroup`: start a group owned by the caller.
pub struct CreateGroup;

#[async_trait]
impl CommandHandler for CreateGroup {
    fn error_channel(&self) -> Event {
        Event::GroupCreateError
    }

    #[instrument(skip_all, fields(session_id = %ctx.session_id))]
    async fn handle(&self, ctx: &CommandContext, data: Option<Value>) -> Result<(), GatewayError> {
        let payload = CreateGroupPayload::parse(data)?;
        let name = match payload.name.filter(|n| !n.trim().is_empty()) {
            Some(name) => {
                ctx.gateway.names.check(&name)?;
                name
            }
            None => names::random_strain(),
        };
        let visibility = payload.visibility.unwrap_or_default();
        let group_id = ctx.gateway.with_registry(|reg| {
            reg.create_group(&ctx.session_id, name, visibility, Utc::now())
        })?;
        info!(group_id = %group_id, ?visibility, "group created");
        Ok(())
    }
}

/// `Join`: enter an existing group.
pub struct JoinGroup;

#[async_trait]
impl CommandHandler for JoinGroup {
    fn error_channel(&self) -> Event {
        Event::GroupJoinError
    }

    #[instrument(skip_all, fields(session_id = %ctx.session_id))]
    async fn handle(&self, ctx: &CommandContext, data: Option<Value>) -> Result<(), GatewayError> {
        let payload: JoinPayload = parse_payload(data)?;
        ctx.gateway
            .with_registry(|reg| reg.join(&ctx.session_id, &payload.group_id, Utc::now()))?;
        info!(group_id = %payload.group_id, "joined group");
        Ok(())
    }
}

/// `LeaveGroup`.
pub struct LeaveGroup;

#[async_trait]
impl CommandHandler for LeaveGroup {
    async fn handle(&self, ctx: &CommandContext, _data: Option<Value>) -> Result<(), GatewayError> {
        ctx.gateway.leave_group(&ctx.session_id).await
    }
}

/// Apply a validated patch and return the fields that were set.
fn apply_patch(group: &mut Group, patch: GroupPatch) -> Map<String, Value> {
    let mut diff = Map::new();
    if let Some(name) = patch.name {
        let _ = diff.insert("name".into(), json!(name));
        group.name = name;
    }
    if let Some(visibility) = patch.visibility {
        let _ = diff.insert("visibility".into(), json!(visibility));
        group.visibility = visibility;
    }
    if let Some(persistent) = patch.persistent {
        let _ = diff.insert("persistent".into(), json!(persistent));
        group.persistent = persistent;
    }
    diff
}

/// `UpdateGroup`: rename, change visibility, or toggle persistence.
pub struct UpdateGroup;

#[async_trait]
impl CommandHandler for UpdateGroup {
    #[instrument(skip_all, fields(session_id = %ctx.session_id))]
    async fn handle(&self, ctx: &CommandContext, data: Option<Value>) -> Result<(), GatewayError> {
        let gateway = &ctx.gateway;
        gateway.with_registry(|reg| {
            let group_id = current_group(reg, &ctx.session_id)?;
            require_owner_or_admin(reg, &ctx.session_id, &group_id)?;
            let patch = GroupPatch::parse(data)?;
            if let Some(name) = &patch.name {
                gateway.names.check(name)?;
            }

            let group = reg
                .group_mut(&group_id)
                .ok_or_else(GatewayError::invalid_data)?;
            let was_public = group.is_public();
            let mut diff = apply_patch(group, patch);
            let now_public = group.is_public();
            let _ = diff.insert("group_id".into(), json!(group_id));

            let _ = reg.broadcast(&group_id, Event::GroupUpdate, Value::Object(diff), &[]);
            if was_public || now_public {
                reg.push_public_groups();
            }
            Ok(())
        })
    }
}

/// `TransferOwnership`: hand the group to another member.
pub struct TransferOwnership;

#[async_trait]
impl CommandHandler for TransferOwnership {
    #[instrument(skip_all, fields(session_id = %ctx.session_id))]
    async fn handle(&self, ctx: &CommandContext, data: Option<Value>) -> Result<(), GatewayError> {
        ctx.gateway.with_registry(|reg| {
            let group_id = current_group(reg, &ctx.session_id)?;
            require_owner_or_admin(reg, &ctx.session_id, &group_id)?;
            let target = TargetPayload::parse(data)?.session_id;
            let group = reg
                .group_mut(&group_id)
                .ok_or_else(GatewayError::invalid_data)?;
            if !group.is_member(&target) {
                return Err(GatewayError::state(USER_NOT_IN_GROUP));
            }
            group.owner_session_id = target.clone();
            info!(group_id = %group_id, owner = %target, "ownership transferred");
            let _ = reg.broadcast(
                &group_id,
                Event::GroupUpdate,
                json!({ "group_id": group_id, "owner_session_id": target }),
                &[],
            );
            Ok(())
        })
    }
}

/// `KickFromGroup`: owner removes a member.
pub struct KickMember;

#[async_trait]
impl CommandHandler for KickMember {
    #[instrument(skip_all, fields(session_id = %ctx.session_id))]
    async fn handle(&self, ctx: &CommandContext, data: Option<Value>) -> Result<(), GatewayError> {
        let departure = ctx.gateway.with_registry(|reg| {
            let group_id = current_group(reg, &ctx.session_id)?;
            let target = TargetPayload::parse(data)?.session_id;
            let group = reg.group(&group_id).ok_or_else(GatewayError::invalid_data)?;
            if group.is_owner(&target) {
                return Err(GatewayError::state(CANNOT_KICK_OWNER));
            }
            if !group.is_owner(&ctx.session_id) {
                return Err(GatewayError::state(NOT_OWNER));
            }
            if !group.is_member(&target) {
                return Err(GatewayError::state(USER_NOT_IN_GROUP));
            }

            let departure = reg.leave(&target)?;
            let _ = reg.send_to(&target, Event::GroupUserKicked, json!({ "group_id": group_id }));
            info!(group_id = %group_id, target = %target, "member kicked");
            Ok(departure)
        })?;
        ctx.gateway.after_departure(departure).await;
        Ok(())
    }
}

/// `DeleteGroup`: dissolve the group for everyone.
pub struct DeleteGroup;

#[async_trait]
impl CommandHandler for DeleteGroup {
    #[instrument(skip_all, fields(session_id = %ctx.session_id))]
    async fn handle(&self, ctx: &CommandContext, _data: Option<Value>) -> Result<(), GatewayError> {
        let macs = ctx.gateway.with_registry(|reg| {
            let group_id = current_group(reg, &ctx.session_id)?;
            let admin = is_admin(reg, &ctx.session_id);
            let group = reg.group(&group_id).ok_or_else(GatewayError::invalid_data)?;
            if !group.is_owner(&ctx.session_id) && !admin {
                return Err(GatewayError::state(NOT_OWNER));
            }
            if group.persistent && !admin {
                return Err(GatewayError::state(CANNOT_DELETE_PERSISTENT_GROUP));
            }

            let _ = reg.broadcast(&group_id, Event::GroupDelete, json!({ "group_id": group_id }), &[]);
            let macs = reg
                .dissolve(&group_id)
                .map(|(_, macs)| macs)
                .unwrap_or_default();
            info!(group_id = %group_id, "group deleted");
            Ok(macs)
        })?;
        for mac in &macs {
            ctx.gateway.clear_presence(mac).await;
        }
        Ok(())
    }
}
