//! # lt-auth
//!
//! Authentication and authorization for La Tanda Auth RS.
//!
//! ## Features
//!
//! - HS256 token issuing, verification and refresh ([`jwt`])
//! - Static role table with levels and permissions ([`roles`])
//! - Per-request context threaded through composable gates ([`gates`])
//! - Axum layer and extractors ([`middleware`])

pub mod context;
pub mod gates;
pub mod jwt;
pub mod middleware;
pub mod roles;

pub use context::{AuthUser, RequestContext};
pub use gates::{
    async_owner_fn, owner_fn, Gate, GateChain, GateError, GateResult, OptionalAuth,
    OwnerLookupError, OwnerResolver, OwnershipGate, PermissionGate, PermissionMode, RequireAuth,
    RoleGate,
};
pub use jwt::{
    decode_unsafe, extract_bearer_token, is_expiring_soon, Claims, Identity, InvalidReason,
    InvalidToken, JwtError, TokenCodec, TokenOptions, TokenOutcome, VerifiedToken,
};
pub use middleware::{AuthState, AuthenticatedUser, FailureHandler, GateLayer, MaybeUser};
pub use roles::{
    can_access_resource, can_perform_group_action, Group, GroupAction, Role, RoleDefinition,
    RoleTable,
};
