//! Per-member commands: profile flags, device telemetry, identity linking.

use async_trait::async_trait;
use metrics::counter;
use serde_json::{Map, Value, json};
use sesh_core::device::state_code::{FINISHED, READY};
use sesh_core::errors::{INVALID_TOKEN, NOT_IN_GROUP, NO_DEVICE_CONNECTED, VERIFICATION_UNAVAILABLE};
use sesh_core::{DeviceState, Event, GatewayError, GroupId, SessionId};
use tracing::{debug, info, instrument, warn};

use super::{current_group, heat};
use crate::dispatch::{CommandContext, CommandHandler};
use crate::group::GroupState;
use crate::identity::Verification;
use crate::metrics::{COLLABORATOR_ERRORS_TOTAL, HEAT_CYCLES_TOTAL};
use crate::presence::DevicePresence;
use crate::registry::Registry;
use crate::session::Session;
use crate::validation::{LinkPayload, UserPatch, parse_payload};

fn session_mut<'a>(reg: &'a mut Registry, id: &SessionId) -> Result<&'a mut Session, GatewayError> {
    reg.session_mut(id)
        .ok_or_else(|| GatewayError::state(NOT_IN_GROUP))
}

// ── UpdateUser ──────────────────────────────────────────────────────

fn apply_user_patch(session: &mut Session, patch: UserPatch) -> Map<String, Value> {
    let mut diff = Map::new();
    if let Some(strain) = patch.strain {
        let _ = diff.insert("strain".into(), json!(strain));
        session.strain = strain;
    }
    if let Some(away) = patch.away {
        let _ = diff.insert("away".into(), json!(away));
        session.away = away;
    }
    if let Some(mobile) = patch.mobile {
        let _ = diff.insert("mobile".into(), json!(mobile));
        session.mobile = mobile;
    }
    diff
}

/// `UpdateUser`: strain tag, away and mobile flags.
pub struct UpdateUser;

#[async_trait]
impl CommandHandler for UpdateUser {
    #[instrument(skip_all, fields(session_id = %ctx.session_id))]
    async fn handle(&self, ctx: &CommandContext, data: Option<Value>) -> Result<(), GatewayError> {
        ctx.gateway.with_registry(|reg| {
            let group_id = current_group(reg, &ctx.session_id)?;
            let patch = UserPatch::parse(data)?;
            let mut diff = apply_user_patch(session_mut(reg, &ctx.session_id)?, patch);
            let _ = diff.insert("group_id".into(), json!(group_id));
            let _ = diff.insert("session_id".into(), json!(ctx.session_id));
            let _ = reg.broadcast(&group_id, Event::GroupUserUpdate, Value::Object(diff), &[]);
            Ok(())
        })
    }
}

// ── SendDeviceState ─────────────────────────────────────────────────

/// Apply the ready and finished transitions for a reported state code.
fn apply_state_code(
    reg: &mut Registry,
    group_id: &GroupId,
    session_id: &SessionId,
    code: u8,
) -> Result<(), GatewayError> {
    let Some(group) = reg.group_mut(group_id) else {
        return Ok(());
    };
    let state = group.state;
    match state {
        GroupState::Awaiting if code == READY => {
            if !group.mark_ready(session_id) {
                return Ok(());
            }
            let ready = group.ready_list();
            let _ = reg.broadcast(
                group_id,
                Event::GroupUpdate,
                json!({ "group_id": group_id, "ready": ready }),
                &[],
            );
            if heat::all_ready(reg, group_id) {
                debug!(group_id = %group_id, "every sesher ready, starting");
                heat::start_with_ready(reg, group_id, session_id)?;
            }
        }
        GroupState::Seshing if code == FINISHED => {
            group.complete_cycle();
            let sesh_counter = group.sesh_counter;
            counter!(HEAT_CYCLES_TOTAL).increment(1);
            info!(group_id = %group_id, sesh_counter, "heat cycle finished");
            let _ = reg.broadcast(
                group_id,
                Event::GroupUpdate,
                json!({
                    "group_id": group_id,
                    "sesh_counter": sesh_counter,
                    "state": GroupState::Chilling,
                    "ready": [],
                }),
                &[],
            );
        }
        _ => {}
    }
    Ok(())
}

/// `SendDeviceState`: merge partial telemetry and react to state codes.
pub struct SendDeviceState;

#[async_trait]
impl CommandHandler for SendDeviceState {
    #[instrument(skip_all, fields(session_id = %ctx.session_id))]
    async fn handle(&self, ctx: &CommandContext, data: Option<Value>) -> Result<(), GatewayError> {
        let write = ctx.gateway.with_registry(|reg| {
            let group_id = current_group(reg, &ctx.session_id)?;
            let patch: DeviceState = parse_payload(data)?;
            let joined = reg
                .group(&group_id)
                .and_then(|g| g.joined_at(&ctx.session_id))
                .map(|t| t.timestamp_millis());

            let session = session_mut(reg, &ctx.session_id)?;
            let was_valid = session.has_valid_device();
            session
                .device_state
                .get_or_insert_with(DeviceState::default)
                .merge(patch.clone());
            let now_valid = session.has_valid_device();
            let away = session.away;
            let write = patch.device_mac.clone().map(|mac| {
                let presence = DevicePresence {
                    session_id: session.id.clone(),
                    user_id: session.user.as_ref().map(|u| u.id.clone()),
                    group_id: group_id.clone(),
                    away,
                    mobile: session.mobile,
                    joined,
                };
                (mac, presence)
            });

            let _ = reg.broadcast(
                &group_id,
                Event::GroupUserDeviceUpdate,
                json!({
                    "group_id": group_id,
                    "session_id": ctx.session_id,
                    "device_state": patch,
                }),
                &[],
            );
            if let (false, Some(code)) = (away, patch.state) {
                apply_state_code(reg, &group_id, &ctx.session_id, code)?;
            }
            if was_valid != now_valid && reg.group(&group_id).is_some_and(|g| g.is_public()) {
                reg.push_public_groups();
            }
            Ok::<_, GatewayError>(write)
        })?;

        if let Some((mac, presence)) = write {
            ctx.gateway.set_presence(&mac, &presence).await;
        }
        Ok(())
    }
}

// ── DisconnectDevice ────────────────────────────────────────────────

/// `DisconnectDevice`: drop the session's device.
pub struct DisconnectDevice;

#[async_trait]
impl CommandHandler for DisconnectDevice {
    #[instrument(skip_all, fields(session_id = %ctx.session_id))]
    async fn handle(&self, ctx: &CommandContext, _data: Option<Value>) -> Result<(), GatewayError> {
        let mac = ctx.gateway.with_registry(|reg| {
            let group_id = current_group(reg, &ctx.session_id)?;
            let device = session_mut(reg, &ctx.session_id)?
                .device_state
                .take()
                .ok_or_else(|| GatewayError::state(NO_DEVICE_CONNECTED))?;
            let _ = reg.broadcast(
                &group_id,
                Event::GroupUserDeviceDisconnect,
                json!({ "group_id": group_id, "session_id": ctx.session_id }),
                &[],
            );
            if device.is_valid() && reg.group(&group_id).is_some_and(|g| g.is_public()) {
                reg.push_public_groups();
            }
            Ok::<_, GatewayError>(device.device_mac)
        })?;

        if let Some(mac) = mac {
            ctx.gateway.clear_presence(&mac).await;
        }
        Ok(())
    }
}

// ── LinkUser ────────────────────────────────────────────────────────

/// `LinkUser`: attach a verified external identity.
pub struct LinkUser;

#[async_trait]
impl CommandHandler for LinkUser {
    fn error_channel(&self) -> Event {
        Event::UserLinkError
    }

    #[instrument(skip_all, fields(session_id = %ctx.session_id))]
    async fn handle(&self, ctx: &CommandContext, data: Option<Value>) -> Result<(), GatewayError> {
        let payload: LinkPayload = parse_payload(data)?;
        let limit = ctx.gateway.settings.services.verify_timeout();

        let outcome = tokio::time::timeout(limit, ctx.gateway.verifier.verify(&payload.token)).await;
        let user = match outcome {
            Ok(Ok(Verification::Valid(user))) => user,
            Ok(Ok(Verification::Invalid)) => {
                return Err(GatewayError::Rejected {
                    event: Event::UserLinkError,
                    code: INVALID_TOKEN,
                });
            }
            Ok(Err(error)) => {
                warn!(%error, "identity verification failed");
                counter!(COLLABORATOR_ERRORS_TOTAL, "collaborator" => "identity").increment(1);
                return Err(GatewayError::Collaborator {
                    code: VERIFICATION_UNAVAILABLE,
                    message: error.to_string(),
                });
            }
            Err(_elapsed) => {
                warn!("identity verification timed out after {limit:?}");
                counter!(COLLABORATOR_ERRORS_TOTAL, "collaborator" => "identity").increment(1);
                return Err(GatewayError::Collaborator {
                    code: VERIFICATION_UNAVAILABLE,
                    message: format!("timed out after {limit:?}"),
                });
            }
        };

        ctx.gateway.with_registry(|reg| {
            let Some(session) = reg.session_mut(&ctx.session_id) else {
                return;
            };
            session.user = Some(user.clone());
            let group_id = session.group_id.clone();
            let disconnected = session.disconnected;
            info!(user_id = %user.id, "user linked");

            let _ = reg.send_to(&ctx.session_id, Event::UserLinkSuccess, json!({ "id": user.id }));
            if let Some(group_id) = group_id {
                let _ = reg.broadcast(
                    &group_id,
                    Event::GroupUserUpdate,
                    json!({
                        "group_id": group_id,
                        "session_id": ctx.session_id,
                        "disconnected": disconnected,
                        "user": user,
                    }),
                    &[],
                );
            }
        });
        Ok(())
    }
}
