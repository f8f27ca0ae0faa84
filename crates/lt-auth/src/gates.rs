//! Request gatekeepers
//!
//! Each gate receives the current [`RequestContext`] and the request parts,
//! and either returns the context for the next stage or a [`GateError`]
//! that terminates the request. Gates compose through [`GateChain`].

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header, request::Parts, HeaderMap};
use lt_core::{AuthErrorCode, ConfigError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::context::{AuthUser, RequestContext};
use crate::jwt::{extract_bearer_token, TokenCodec, TokenOutcome};
use crate::roles::{Role, RoleTable};

// ============================================================================
// Errors
// ============================================================================

/// Structured rejection record
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{code}: {message}")]
pub struct GateError {
    pub message: String,
    pub code: AuthErrorCode,
    /// Only set for `INVALID_TOKEN`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_expired: Option<bool>,
}

impl GateError {
    /// Error with the code's default message
    pub fn new(code: AuthErrorCode) -> Self {
        Self {
            message: code.default_message().to_string(),
            code,
            is_expired: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn invalid_token(is_expired: bool) -> Self {
        let message = if is_expired {
            "Token expired"
        } else {
            "Invalid token"
        };
        Self {
            message: message.to_string(),
            code: AuthErrorCode::InvalidToken,
            is_expired: Some(is_expired),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired.unwrap_or(false)
    }
}

pub type GateResult = Result<RequestContext, GateError>;

// ============================================================================
// Gate trait
// ============================================================================

/// One stage of request authorization
#[async_trait]
pub trait Gate: Send + Sync {
    async fn check(&self, ctx: RequestContext, parts: &Parts) -> GateResult;
}

/// Bearer token from the `Authorization` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
}

fn require_user(ctx: &RequestContext) -> Result<&AuthUser, GateError> {
    ctx.user().ok_or_else(|| {
        warn!("No authenticated user in request context");
        GateError::new(AuthErrorCode::NoAuth)
    })
}

// ============================================================================
// Authentication stages
// ============================================================================

/// Rejects requests without a valid bearer token
#[derive(Debug, Clone)]
pub struct RequireAuth {
    codec: Arc<TokenCodec>,
    roles: Arc<RoleTable>,
}

impl RequireAuth {
    pub fn new(codec: Arc<TokenCodec>, roles: Arc<RoleTable>) -> Self {
        Self { codec, roles }
    }

    pub fn authenticate(&self, ctx: RequestContext, headers: &HeaderMap) -> GateResult {
        let Some(token) = bearer_token(headers) else {
            debug!("No bearer token provided");
            return Err(GateError::new(AuthErrorCode::NoToken));
        };

        match self.codec.verify(token) {
            TokenOutcome::Valid(verified) => {
                let user = AuthUser::resolve(verified.identity, &self.roles);
                debug!(subject_id = %user.subject_id, role = %user.role, "Request authenticated");
                Ok(ctx.with_token(token).authenticated(user))
            }
            TokenOutcome::Invalid(invalid) => Err(GateError::invalid_token(invalid.is_expired)),
        }
    }
}

#[async_trait]
impl Gate for RequireAuth {
    async fn check(&self, ctx: RequestContext, parts: &Parts) -> GateResult {
        self.authenticate(ctx, &parts.headers)
    }
}

/// Attaches an identity when a valid token is present, never rejects
#[derive(Debug, Clone)]
pub struct OptionalAuth {
    inner: RequireAuth,
}

impl OptionalAuth {
    pub fn new(codec: Arc<TokenCodec>, roles: Arc<RoleTable>) -> Self {
        Self {
            inner: RequireAuth::new(codec, roles),
        }
    }

    pub fn authenticate(&self, ctx: RequestContext, headers: &HeaderMap) -> RequestContext {
        match self.inner.authenticate(ctx.clone(), headers) {
            Ok(ctx) => ctx,
            Err(e) => {
                debug!(code = %e.code, "Continuing without identity");
                match bearer_token(headers) {
                    Some(token) => ctx.with_token(token).anonymous(),
                    None => ctx.anonymous(),
                }
            }
        }
    }
}

#[async_trait]
impl Gate for OptionalAuth {
    async fn check(&self, ctx: RequestContext, parts: &Parts) -> GateResult {
        Ok(self.authenticate(ctx, &parts.headers))
    }
}

// ============================================================================
// Permission gate
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionMode {
    /// At least one listed permission
    Any,
    /// Every listed permission
    All,
}

/// Requires permissions from the role table or the token's own grants
#[derive(Debug, Clone)]
pub struct PermissionGate {
    permissions: Vec<String>,
    mode: PermissionMode,
}

impl PermissionGate {
    pub fn new<I, P>(permissions: I, mode: PermissionMode) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            permissions: permissions.into_iter().map(Into::into).collect(),
            mode,
        }
    }

    pub fn require(permission: impl Into<String>) -> Self {
        Self::new([permission.into()], PermissionMode::All)
    }

    pub fn any<I, P>(permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self::new(permissions, PermissionMode::Any)
    }

    pub fn all<I, P>(permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self::new(permissions, PermissionMode::All)
    }

    pub fn authorize(&self, ctx: RequestContext) -> GateResult {
        let user = require_user(&ctx)?;

        let allowed = match self.mode {
            PermissionMode::Any => self.permissions.iter().any(|p| user.has_permission(p)),
            PermissionMode::All => self.permissions.iter().all(|p| user.has_permission(p)),
        };

        if allowed {
            Ok(ctx)
        } else {
            warn!(
                user_id = %user.subject_id,
                role = %user.role,
                required = ?self.permissions,
                mode = ?self.mode,
                "Permission denied"
            );
            Err(GateError::new(AuthErrorCode::Forbidden))
        }
    }
}

#[async_trait]
impl Gate for PermissionGate {
    async fn check(&self, ctx: RequestContext, _parts: &Parts) -> GateResult {
        self.authorize(ctx)
    }
}

// ============================================================================
// Role gate
// ============================================================================

/// Requires a minimum role level
#[derive(Debug, Clone)]
pub struct RoleGate {
    minimum: Role,
    roles: Arc<RoleTable>,
}

impl RoleGate {
    /// The role name is checked here, not at request time
    pub fn new(minimum_role: &str, roles: Arc<RoleTable>) -> Result<Self, ConfigError> {
        let minimum: Role = minimum_role.parse()?;
        if roles.get(minimum).is_none() {
            return Err(ConfigError::UndefinedRole {
                role: minimum.to_string(),
            });
        }
        Ok(Self { minimum, roles })
    }

    pub fn minimum(&self) -> Role {
        self.minimum
    }

    pub fn authorize(&self, ctx: RequestContext) -> GateResult {
        let user = require_user(&ctx)?;

        if self.roles.role_at_least(user.role, self.minimum) {
            Ok(ctx)
        } else {
            warn!(
                user_id = %user.subject_id,
                role = %user.role,
                minimum = %self.minimum,
                "Insufficient role"
            );
            Err(GateError::new(AuthErrorCode::InsufficientRole)
                .with_message(format!("Requires {} role or higher", self.minimum)))
        }
    }
}

#[async_trait]
impl Gate for RoleGate {
    async fn check(&self, ctx: RequestContext, _parts: &Parts) -> GateResult {
        self.authorize(ctx)
    }
}

// ============================================================================
// Ownership gate
// ============================================================================

pub type OwnerLookupError = Box<dyn std::error::Error + Send + Sync>;

/// Resolves the id of the user owning the requested resource
#[async_trait]
pub trait OwnerResolver: Send + Sync {
    async fn resolve_owner(&self, parts: &Parts) -> Result<String, OwnerLookupError>;
}

/// Synchronous owner accessor
pub struct OwnerFn<F>(F);

/// Wrap a synchronous closure as an [`OwnerResolver`]
pub fn owner_fn<F>(f: F) -> OwnerFn<F>
where
    F: Fn(&Parts) -> Result<String, OwnerLookupError> + Send + Sync + 'static,
{
    OwnerFn(f)
}

#[async_trait]
impl<F> OwnerResolver for OwnerFn<F>
where
    F: Fn(&Parts) -> Result<String, OwnerLookupError> + Send + Sync + 'static,
{
    async fn resolve_owner(&self, parts: &Parts) -> Result<String, OwnerLookupError> {
        (self.0)(parts)
    }
}

/// Asynchronous owner accessor
pub struct AsyncOwnerFn<F>(F);

/// Wrap a closure returning a future as an [`OwnerResolver`]
///
/// The future must own what it needs; copy values out of the parts first.
pub fn async_owner_fn<F, Fut>(f: F) -> AsyncOwnerFn<F>
where
    F: Fn(&Parts) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, OwnerLookupError>> + Send + 'static,
{
    AsyncOwnerFn(f)
}

#[async_trait]
impl<F, Fut> OwnerResolver for AsyncOwnerFn<F>
where
    F: Fn(&Parts) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, OwnerLookupError>> + Send + 'static,
{
    async fn resolve_owner(&self, parts: &Parts) -> Result<String, OwnerLookupError> {
        (self.0)(parts).await
    }
}

/// Requires the authenticated subject to own the resource; ADMIN bypasses
#[derive(Clone)]
pub struct OwnershipGate {
    resolver: Arc<dyn OwnerResolver>,
}

impl OwnershipGate {
    pub fn new(resolver: impl OwnerResolver + 'static) -> Self {
        Self {
            resolver: Arc::new(resolver),
        }
    }
}

impl std::fmt::Debug for OwnershipGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnershipGate").finish_non_exhaustive()
    }
}

#[async_trait]
impl Gate for OwnershipGate {
    async fn check(&self, ctx: RequestContext, parts: &Parts) -> GateResult {
        let user = require_user(&ctx)?;
        if user.is_admin() {
            return Ok(ctx);
        }

        match self.resolver.resolve_owner(parts).await {
            Ok(owner_id) if owner_id == user.subject_id => Ok(ctx),
            Ok(owner_id) => {
                warn!(user_id = %user.subject_id, owner_id = %owner_id, "Not the resource owner");
                Err(GateError::new(AuthErrorCode::NotOwner))
            }
            Err(e) => {
                warn!(user_id = %user.subject_id, error = %e, "Owner lookup failed");
                Err(GateError::new(AuthErrorCode::OwnershipCheckFailed))
            }
        }
    }
}

// ============================================================================
// Chain
// ============================================================================

/// Runs gates in order, stopping at the first rejection
#[derive(Clone, Default)]
pub struct GateChain {
    gates: Vec<Arc<dyn Gate>>,
}

impl GateChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, gate: impl Gate + 'static) -> Self {
        self.gates.push(Arc::new(gate));
        self
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}

#[async_trait]
impl Gate for GateChain {
    async fn check(&self, mut ctx: RequestContext, parts: &Parts) -> GateResult {
        for gate in &self.gates {
            ctx = gate.check(ctx, parts).await?;
        }
        Ok(ctx)
    }
}

// ============================================================================
// Tests
// ============================================================================
