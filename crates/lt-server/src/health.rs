//! Health Check System
//!
//! Self-checks for the components the gates depend on: the token codec must
//! round-trip a probe identity and the role table must be consistent.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use lt_auth::{Identity, TokenOutcome};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::AppState;

/// Health check status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Individual component health
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: &'static str,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub response_time_ms: u64,
}

/// Overall health report
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: Vec<ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthReport {
    pub fn http_status(&self) -> StatusCode {
        match self.status {
            HealthStatus::Healthy => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Run every component check
pub fn check(state: &AppState) -> HealthReport {
    let components = vec![check_token_codec(state), check_role_table(state)];

    let status = if components
        .iter()
        .all(|c| c.status == HealthStatus::Healthy)
    {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    };

    HealthReport {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        components,
        timestamp: chrono::Utc::now(),
    }
}

fn check_token_codec(state: &AppState) -> ComponentHealth {
    let start = Instant::now();
    let probe = Identity::new("health-probe", "health@latanda.online");

    let result = state
        .auth
        .codec
        .issue(&probe)
        .map_err(|e| e.to_string())
        .and_then(|token| match state.auth.codec.verify(&token) {
            TokenOutcome::Valid(_) => Ok(()),
            TokenOutcome::Invalid(invalid) => Err(invalid.reason.to_string()),
        });

    let (status, message) = match result {
        Ok(()) => (HealthStatus::Healthy, None),
        Err(message) => {
            warn!(error = %message, "Token codec self-check failed");
            (HealthStatus::Unhealthy, Some(message))
        }
    };

    ComponentHealth {
        name: "token_codec",
        status,
        message,
        response_time_ms: start.elapsed().as_millis() as u64,
    }
}

fn check_role_table(state: &AppState) -> ComponentHealth {
    let start = Instant::now();
    let (status, message) = match state.auth.roles.validate() {
        Ok(()) => (HealthStatus::Healthy, None),
        Err(e) => (HealthStatus::Unhealthy, Some(e.to_string())),
    };

    ComponentHealth {
        name: "role_table",
        status,
        message,
        response_time_ms: start.elapsed().as_millis() as u64,
    }
}

/// Liveness probe
pub async fn liveness() -> &'static str {
    "OK"
}

/// Full health report
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthReport>) {
    let report = check(&state);
    (report.http_status(), Json(report))
}
