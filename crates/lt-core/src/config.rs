//! Configuration types and loading
//!
//! Settings are plain serde structs with sensible defaults, overridable
//! from environment variables.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default token lifetime: 8 hours
pub const DEFAULT_TOKEN_TTL_SECONDS: i64 = 8 * 60 * 60;
pub const DEFAULT_ISSUER: &str = "latanda.online";
pub const DEFAULT_AUDIENCE: &str = "latanda-web-app";
pub const DEFAULT_REFRESH_THRESHOLD_MINUTES: i64 = 30;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Token signing and validation
    pub auth: AuthSettings,

    /// HTTP listener
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthSettings {
    /// HMAC secret for token signing
    #[serde(skip_serializing)]
    pub jwt_secret: String,
    /// Token lifetime in seconds
    pub token_ttl_seconds: i64,
    /// Expected `iss` claim
    pub issuer: String,
    /// Expected `aud` claim
    pub audience: String,
    /// Minutes before expiry at which clients should refresh
    pub refresh_threshold_minutes: i64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            refresh_threshold_minutes: DEFAULT_REFRESH_THRESHOLD_MINUTES,
        }
    }
}

impl AuthSettings {
    /// Check the settings before any token is issued
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.is_empty() {
            return Err(ConfigError::EmptySigningKey);
        }
        if self.jwt_secret.len() < 32 {
            tracing::warn!("JWT secret is shorter than recommended (32 bytes)");
        }
        if self.issuer.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "JWT_ISSUER".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.audience.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "JWT_AUDIENCE".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    ///
    /// `from_env` delegates here; tests pass a map instead of touching the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Auth
        let secret = lookup("JWT_SECRET");
        if let Some(issuer) = lookup("JWT_ISSUER") {
            config.auth.issuer = issuer;
        }
        if let Some(audience) = lookup("JWT_AUDIENCE") {
            config.auth.audience = audience;
        }
        if let Some(ttl) = lookup("JWT_TTL_SECONDS") {
            config.auth.token_ttl_seconds = parse_value("JWT_TTL_SECONDS", &ttl)?;
        }
        if let Some(threshold) = lookup("JWT_REFRESH_THRESHOLD_MINUTES") {
            config.auth.refresh_threshold_minutes =
                parse_value("JWT_REFRESH_THRESHOLD_MINUTES", &threshold)?;
        }

        // Server
        if let Some(host) = lookup("HOST") {
            config.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            config.server.port = parse_value("PORT", &port)?;
        }

        config.auth.jwt_secret =
            secret.ok_or_else(|| ConfigError::MissingEnvVar("JWT_SECRET".to_string()))?;

        Ok(config)
    }

    /// Get the server address
    pub fn server_addr(&self) -> std::net::SocketAddr {
        use std::net::SocketAddr;
        let ip: std::net::IpAddr = self.server.host.parse().unwrap_or([0, 0, 0, 0].into());
        SocketAddr::new(ip, self.server.port)
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.auth.token_ttl_seconds, 8 * 60 * 60);
        assert_eq!(config.auth.issuer, "latanda.online");
        assert_eq!(config.auth.audience, "latanda-web-app");
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("JWT_SECRET", "a-very-long-secret-used-only-for-tests"),
            ("JWT_ISSUER", "issuer.test"),
            ("JWT_TTL_SECONDS", "600"),
            ("PORT", "9000"),
        ]))
        .unwrap();

        assert_eq!(config.auth.jwt_secret, "a-very-long-secret-used-only-for-tests");
        assert_eq!(config.auth.issuer, "issuer.test");
        assert_eq!(config.auth.audience, "latanda-web-app");
        assert_eq!(config.auth.token_ttl_seconds, 600);
        assert_eq!(config.server.port, 9000);
        assert!(config.auth.validate().is_ok());
    }

    #[test]
    fn test_invalid_number_is_reported() {
        let err = AppConfig::from_lookup(lookup_from(&[("JWT_TTL_SECONDS", "soon")])).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "JWT_TTL_SECONDS"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_secret_is_reported() {
        let err = AppConfig::from_lookup(lookup_from(&[("PORT", "9000")])).unwrap_err();
        assert_eq!(err, ConfigError::MissingEnvVar("JWT_SECRET".to_string()));
    }

    #[test]
    fn test_empty_secret_rejected() {
        let settings = AuthSettings::default();
        assert_eq!(settings.validate(), Err(ConfigError::EmptySigningKey));
    }

    #[test]
    fn test_server_addr() {
        let mut config = AppConfig::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 3000;
        assert_eq!(config.server_addr().to_string(), "127.0.0.1:3000");
    }
}
