//! Request context
//!
//! An immutable value created per inbound request and threaded through the
//! gate chain. Each gate consumes the context it receives and hands back a
//! new one (or rejects the request).

use std::collections::BTreeSet;

use serde::Serialize;

use crate::jwt::Identity;
use crate::roles::{Role, RoleTable};

/// The identity a request was authenticated as
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthUser {
    pub subject_id: String,
    pub email: String,
    pub role: Role,
    /// Role defaults plus the grants carried by the token
    pub permissions: BTreeSet<String>,
}

impl AuthUser {
    /// Resolve the effective permissions of a verified identity
    pub fn resolve(identity: Identity, roles: &RoleTable) -> Self {
        let permissions = roles.effective_permissions(identity.role, identity.permissions);
        Self {
            subject_id: identity.subject_id,
            email: identity.email,
            role: identity.role,
            permissions,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    /// ADMIN, or the permission is among the effective permissions
    pub fn has_permission(&self, permission: &str) -> bool {
        self.is_admin() || self.permissions.contains(permission)
    }
}

/// Per-request authentication state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    token: Option<String>,
    user: Option<AuthUser>,
}

impl RequestContext {
    /// Fresh, unauthenticated context
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn authenticated(mut self, user: AuthUser) -> Self {
        self.user = Some(user);
        self
    }

    /// Keep the raw token but drop any identity
    pub fn anonymous(mut self) -> Self {
        self.user = None;
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn user(&self) -> Option<&AuthUser> {
        self.user.as_ref()
    }

    pub fn into_user(self) -> Option<AuthUser> {
        self.user
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}
