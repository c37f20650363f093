//! Internal administrative HTTP router.
//!
//! Served on the admin port only. Exposes health, metrics, the public
//! group directory, and the hooks other services use to push linked-user
//! updates and remote actions into live sessions.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{Value, json};
use sesh_core::{GroupId, LinkedUser};
use tracing::info;

use crate::gateway::{RemoteActionError, RemoteActionPayload};
use crate::health::HealthResponse;
use crate::metrics;
use crate::server::AppState;
use crate::validation::double_option;

/// Build the admin router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/v1/groups", get(list_groups))
        .route("/v1/groups/{id}", get(get_group))
        .route("/user/{id}/update", post(update_user))
        .route("/remote_action", post(remote_action))
        .with_state(state)
}

fn error(status: StatusCode, code: &str) -> Response {
    (status, Json(json!({ "code": code }))).into_response()
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(state.gateway.health())
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => metrics::render(handle).into_response(),
        None => error(StatusCode::SERVICE_UNAVAILABLE, "metrics_disabled"),
    }
}

/// GET /v1/groups
async fn list_groups(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "success": true, "data": state.gateway.public_groups() }))
}

/// GET /v1/groups/{id}
async fn get_group(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.gateway.group_snapshot(&GroupId::from(id)) {
        Some(snapshot) => Json(json!({ "success": true, "data": snapshot })).into_response(),
        None => error(StatusCode::NOT_FOUND, "not_found"),
    }
}

/// Absent fields are left alone; `null` clears.
#[derive(Deserialize)]
struct UserUpdate {
    #[serde(default, deserialize_with = "double_option")]
    user: Option<Option<LinkedUser>>,
    #[serde(default, deserialize_with = "double_option")]
    voice: Option<Option<Value>>,
}

/// POST /user/{id}/update
async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UserUpdate>,
) -> Response {
    let matched = state.gateway.update_linked_user(&id, body.user, body.voice);
    info!(user_id = %id, matched, "linked user updated");
    if matched == 0 {
        return error(StatusCode::NOT_FOUND, "user_not_found");
    }
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Deserialize)]
struct UserRef {
    id: String,
}

#[derive(Deserialize)]
struct RemoteActionRequest {
    user: UserRef,
    payload: RemoteActionPayload,
}

/// POST /remote_action
async fn remote_action(
    State(state): State<AppState>,
    Json(body): Json<RemoteActionRequest>,
) -> Response {
    match state.gateway.remote_action(&body.user.id, &body.payload) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(RemoteActionError::UserNotFound) => error(StatusCode::BAD_REQUEST, "user_not_found"),
    }
}
