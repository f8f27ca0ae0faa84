//! Core error types for La Tanda Auth RS
//!
//! Two families live here: the request rejection codes every gate reports,
//! and configuration errors raised while wiring the library up.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejection code attached to every gate failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthErrorCode {
    /// Missing or malformed `Authorization` header
    NoToken,
    /// Signature, structure or claim failure
    InvalidToken,
    /// Gate used without a preceding authentication stage
    NoAuth,
    /// Permission gate failed
    Forbidden,
    /// Role gate failed
    InsufficientRole,
    /// Authenticated subject does not own the resource
    NotOwner,
    /// The owner lookup itself failed
    OwnershipCheckFailed,
}

impl AuthErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthErrorCode::NoToken => "NO_TOKEN",
            AuthErrorCode::InvalidToken => "INVALID_TOKEN",
            AuthErrorCode::NoAuth => "NO_AUTH",
            AuthErrorCode::Forbidden => "FORBIDDEN",
            AuthErrorCode::InsufficientRole => "INSUFFICIENT_ROLE",
            AuthErrorCode::NotOwner => "NOT_OWNER",
            AuthErrorCode::OwnershipCheckFailed => "OWNERSHIP_CHECK_FAILED",
        }
    }

    /// HTTP status code mapping
    pub fn status_code(&self) -> u16 {
        match self {
            AuthErrorCode::NoToken | AuthErrorCode::InvalidToken | AuthErrorCode::NoAuth => 401,
            AuthErrorCode::Forbidden
            | AuthErrorCode::InsufficientRole
            | AuthErrorCode::NotOwner => 403,
            AuthErrorCode::OwnershipCheckFailed => 500,
        }
    }

    /// Default human readable message for the code
    pub fn default_message(&self) -> &'static str {
        match self {
            AuthErrorCode::NoToken => "Access token required",
            AuthErrorCode::InvalidToken => "Invalid or expired token",
            AuthErrorCode::NoAuth => "Authentication required",
            AuthErrorCode::Forbidden => "Insufficient permissions",
            AuthErrorCode::InsufficientRole => "Insufficient role level",
            AuthErrorCode::NotOwner => "Access denied: not the resource owner",
            AuthErrorCode::OwnershipCheckFailed => "Error verifying resource ownership",
        }
    }
}

impl std::fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration error
///
/// Raised at setup time. These indicate a programming or deployment
/// mistake and are never deferred to request handling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Signing key must not be empty")]
    EmptySigningKey,
    #[error("Invalid role name: {0}")]
    InvalidRole(String),
    #[error("Role {role} is not defined in the role table")]
    UndefinedRole { role: String },
    #[error("Roles {first} and {second} share level {level}")]
    DuplicateRoleLevel {
        first: String,
        second: String,
        level: u32,
    },
    #[error("Environment variable not set: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_serialize_upper_snake() {
        let json = serde_json::to_string(&AuthErrorCode::OwnershipCheckFailed).unwrap();
        assert_eq!(json, "\"OWNERSHIP_CHECK_FAILED\"");

        let code: AuthErrorCode = serde_json::from_str("\"INSUFFICIENT_ROLE\"").unwrap();
        assert_eq!(code, AuthErrorCode::InsufficientRole);
    }

    #[test]
    fn test_display_matches_wire_name() {
        assert_eq!(AuthErrorCode::NoToken.to_string(), "NO_TOKEN");
        assert_eq!(AuthErrorCode::NotOwner.as_str(), "NOT_OWNER");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthErrorCode::NoToken.status_code(), 401);
        assert_eq!(AuthErrorCode::InvalidToken.status_code(), 401);
        assert_eq!(AuthErrorCode::NoAuth.status_code(), 401);
        assert_eq!(AuthErrorCode::Forbidden.status_code(), 403);
        assert_eq!(AuthErrorCode::InsufficientRole.status_code(), 403);
        assert_eq!(AuthErrorCode::NotOwner.status_code(), 403);
        assert_eq!(AuthErrorCode::OwnershipCheckFailed.status_code(), 500);
    }
}
