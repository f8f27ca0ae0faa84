//! HTTP handlers
//!
//! Each protected route is guarded by a [`GateLayer`](lt_auth::GateLayer) built in
//! [`build_router`](crate::build_router); handlers only read the identity
//! the gates attached.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use lt_auth::{
    decode_unsafe, gates::bearer_token, is_expiring_soon, owner_fn, AuthenticatedUser, GateError,
    MaybeUser, OwnerLookupError, OwnershipGate,
};
use lt_core::AuthErrorCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub success: bool,
    pub token: String,
    pub expires_in: i64,
}

/// Exchange a valid or expired token for a fresh one
pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RefreshRequest>,
) -> Response {
    match state.auth.codec.refresh(&request.token) {
        Ok(token) => Json(TokenResponse {
            success: true,
            token,
            expires_in: state.auth.codec.options().time_to_live.num_seconds(),
        })
        .into_response(),
        Err(e) => GateError::new(AuthErrorCode::InvalidToken)
            .with_message(e.to_string())
            .into_response(),
    }
}

/// Whether the presented token should be refreshed soon
pub async fn token_status(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return GateError::new(AuthErrorCode::NoToken).into_response();
    };

    let threshold = state.config.auth.refresh_threshold_minutes;
    let expires_at = decode_unsafe(token).and_then(|claims| claims.expires_at());

    Json(json!({
        "success": true,
        "expiring_soon": is_expiring_soon(token, threshold),
        "expires_at": expires_at,
    }))
    .into_response()
}

pub async fn current_user(user: AuthenticatedUser) -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "user": user.0,
    }))
}

pub async fn list_groups(user: MaybeUser) -> Json<serde_json::Value> {
    let viewer = user.0.as_ref().map(|u| u.subject_id.clone());
    Json(json!({
        "success": true,
        "anonymous": viewer.is_none(),
        "viewer": viewer,
        "groups": [],
    }))
}

pub async fn admin_config(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Json<serde_json::Value> {
    info!(user_id = %user.subject_id, "Configuration viewed");
    let options = state.auth.codec.options();
    Json(json!({
        "success": true,
        "issuer": options.issuer,
        "audience": options.audience,
        "token_ttl_seconds": options.time_to_live.num_seconds(),
        "refresh_threshold_minutes": state.config.auth.refresh_threshold_minutes,
    }))
}

pub async fn reports(user: AuthenticatedUser) -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "requested_by": user.subject_id,
        "reports": [],
    }))
}

pub async fn user_profile(user: AuthenticatedUser) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "profile": { "id": user.subject_id, "email": user.email },
        })),
    )
}

/// Owner of `/api/users/:id/...` is the `:id` segment
pub fn profile_owner_gate() -> OwnershipGate {
    OwnershipGate::new(owner_fn(|parts: &Parts| {
        parts
            .uri
            .path()
            .split('/')
            .nth(3)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| OwnerLookupError::from("missing user id in path"))
    }))
}
