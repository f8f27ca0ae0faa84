//! Authentication Middleware
//!
//! Axum integration for the gates: a tower layer that runs a gate against
//! the request, handler extractors for the resulting identity, and the JSON
//! rejection body.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    async_trait,
    body::Body,
    extract::FromRequestParts,
    http::{request::Parts, Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use lt_core::{AuthErrorCode, AuthSettings, ConfigError};
use serde::Serialize;
use tower::{Layer, Service};

use crate::context::{AuthUser, RequestContext};
use crate::gates::{Gate, GateError, OptionalAuth, RequireAuth, RoleGate};
use crate::jwt::TokenCodec;
use crate::roles::RoleTable;

// ============================================================================
// Rejection response
// ============================================================================

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: &'a GateError,
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            success: false,
            error: &self,
        };
        (status, Json(body)).into_response()
    }
}

/// Custom response for a rejected request
///
/// Receives the request parts and the rejection record and fully controls
/// the response.
pub trait FailureHandler: Send + Sync {
    fn handle(&self, parts: &Parts, error: GateError) -> Response;
}

impl<F> FailureHandler for F
where
    F: Fn(&Parts, GateError) -> Response + Send + Sync,
{
    fn handle(&self, parts: &Parts, error: GateError) -> Response {
        self(parts, error)
    }
}

// ============================================================================
// Shared state
// ============================================================================

/// Codec and role table shared by every gate of an application
#[derive(Debug, Clone)]
pub struct AuthState {
    pub codec: Arc<TokenCodec>,
    pub roles: Arc<RoleTable>,
}

impl AuthState {
    pub fn new(codec: TokenCodec, roles: RoleTable) -> Result<Self, ConfigError> {
        roles.validate()?;
        Ok(Self {
            codec: Arc::new(codec),
            roles: Arc::new(roles),
        })
    }

    /// Codec from settings with the default role table
    pub fn from_settings(settings: &AuthSettings) -> Result<Self, ConfigError> {
        Self::new(TokenCodec::from_settings(settings)?, RoleTable::default())
    }

    pub fn require_auth(&self) -> RequireAuth {
        RequireAuth::new(self.codec.clone(), self.roles.clone())
    }

    pub fn optional_auth(&self) -> OptionalAuth {
        OptionalAuth::new(self.codec.clone(), self.roles.clone())
    }

    pub fn role_gate(&self, minimum_role: &str) -> Result<RoleGate, ConfigError> {
        RoleGate::new(minimum_role, self.roles.clone())
    }
}

// ============================================================================
// GateLayer
// ============================================================================

/// Layer running a [`Gate`] in front of a service
///
/// The context produced by earlier layers is read from request extensions
/// and the gate's output is stored back for later layers and extractors.
#[derive(Clone)]
pub struct GateLayer {
    gate: Arc<dyn Gate>,
    on_failure: Option<Arc<dyn FailureHandler>>,
}

impl GateLayer {
    pub fn new(gate: impl Gate + 'static) -> Self {
        Self {
            gate: Arc::new(gate),
            on_failure: None,
        }
    }

    pub fn with_failure_handler(mut self, handler: impl FailureHandler + 'static) -> Self {
        self.on_failure = Some(Arc::new(handler));
        self
    }
}

impl<S> Layer<S> for GateLayer {
    type Service = GateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GateService {
            inner,
            gate: self.gate.clone(),
            on_failure: self.on_failure.clone(),
        }
    }
}

#[derive(Clone)]
pub struct GateService<S> {
    inner: S,
    gate: Arc<dyn Gate>,
    on_failure: Option<Arc<dyn FailureHandler>>,
}

impl<S> Service<Request<Body>> for GateService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let gate = self.gate.clone();
        let on_failure = self.on_failure.clone();
        // Use the service that was driven to readiness
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let (mut parts, body) = req.into_parts();
            let ctx = parts
                .extensions
                .get::<RequestContext>()
                .cloned()
                .unwrap_or_default();

            match gate.check(ctx, &parts).await {
                Ok(ctx) => {
                    parts.extensions.insert(ctx);
                    inner.call(Request::from_parts(parts, body)).await
                }
                Err(error) => {
                    tracing::debug!(code = %error.code, path = %parts.uri.path(), "Request rejected");
                    Ok(match on_failure {
                        Some(handler) => handler.handle(&parts, error),
                        None => error.into_response(),
                    })
                }
            }
        })
    }
}

// ============================================================================
// Extractors
// ============================================================================

/// Authenticated user extractor
///
/// Rejects with `NO_AUTH` when no authentication layer ran before the
/// handler or it left the request anonymous.
pub struct AuthenticatedUser(pub AuthUser);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = GateError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .and_then(|ctx| ctx.user().cloned())
            .map(AuthenticatedUser)
            .ok_or_else(|| GateError::new(AuthErrorCode::NoAuth))
    }
}

impl std::ops::Deref for AuthenticatedUser {
    type Target = AuthUser;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Identity if one was attached, for optionally authenticated routes
pub struct MaybeUser(pub Option<AuthUser>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(
            parts
                .extensions
                .get::<RequestContext>()
                .and_then(|ctx| ctx.user().cloned()),
        ))
    }
}

impl std::ops::Deref for MaybeUser {
    type Target = Option<AuthUser>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ============================================================================
// Tests
// ============================================================================
