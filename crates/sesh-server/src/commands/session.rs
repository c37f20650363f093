//! Connection-level commands: resume and heartbeat.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use serde_json::{Value, json};
use sesh_core::errors::{INVALID_SESSION, INVALID_SESSION_RESUME_DATA};
use sesh_core::{Event, GatewayError};
use tracing::{info, instrument};

use crate::dispatch::{CommandContext, CommandHandler};
use crate::metrics::SESSIONS_RESUMED_TOTAL;
use crate::validation::{ResumePayload, parse_payload};
use crate::websocket::connection::CLOSE_SESSION_REPLACED;

fn invalid_session() -> GatewayError {
    GatewayError::Rejected {
        event: Event::SessionResumeError,
        code: INVALID_SESSION,
    }
}

/// `ResumeSession`: move this connection onto an earlier session.
///
/// The issuing session is discarded; the connection continues under the
/// target's id with the issuing session's token.
pub struct ResumeSession;

#[async_trait]
impl CommandHandler for ResumeSession {
    fn error_channel(&self) -> Event {
        Event::SessionResumeError
    }

    #[instrument(skip_all, fields(session_id = %ctx.session_id))]
    async fn handle(&self, ctx: &CommandContext, data: Option<Value>) -> Result<(), GatewayError> {
        let payload: ResumePayload = parse_payload(data).map_err(|_| GatewayError::Rejected {
            event: Event::InternalError,
            code: INVALID_SESSION_RESUME_DATA,
        })?;
        let ephemeral_id = &ctx.session_id;
        let target_id = &payload.session_id;

        let (previous, heartbeat, liveness, departure) = ctx.gateway.with_registry(|reg| {
            let valid = target_id != ephemeral_id
                && reg
                    .session(target_id)
                    .is_some_and(|s| s.token().matches(&payload.session_token));
            if !valid {
                return Err(invalid_session());
            }

            let departure = reg.leave(ephemeral_id).ok();
            let mut ephemeral = reg.remove_session(ephemeral_id).ok_or_else(invalid_session)?;
            ephemeral.cancel_timers();

            let target = reg.session_mut(target_id).ok_or_else(invalid_session)?;
            let previous = target.adopt(ephemeral);
            let liveness = target.reset_liveness();
            let heartbeat = Arc::clone(target.heartbeat());
            let group_id = target.group_id.clone();
            let _ = target.send(Event::SessionResumed, json!({ "session_id": target_id }));

            if let Some(group_id) = group_id {
                let _ = reg.broadcast(
                    &group_id,
                    Event::GroupUserUpdate,
                    json!({ "group_id": group_id, "session_id": target_id, "disconnected": false }),
                    &[],
                );
            }
            Ok((previous, heartbeat, liveness, departure))
        })?;

        previous.close(CLOSE_SESSION_REPLACED, "Session resumed elsewhere");
        ctx.gateway
            .spawn_liveness(target_id.clone(), heartbeat, liveness);
        counter!(SESSIONS_RESUMED_TOTAL).increment(1);
        info!(resumed = %target_id, "session resumed");

        if let Some(departure) = departure {
            ctx.gateway.after_departure(departure).await;
        }
        Ok(())
    }
}

/// `Heartbeat`.
pub struct Heartbeat;

#[async_trait]
impl CommandHandler for Heartbeat {
    async fn handle(&self, ctx: &CommandContext, _data: Option<Value>) -> Result<(), GatewayError> {
        ctx.gateway.heartbeat(&ctx.session_id);
        Ok(())
    }
}
