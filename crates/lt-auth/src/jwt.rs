//! JWT token codec
//!
//! Issues HS256 tokens for an [`Identity`] and verifies them back, checking
//! signature, expiry, mandatory claims, issuer and audience in a fixed order
//! so failures are reported deterministically.

use std::collections::{BTreeSet, HashSet};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use lt_core::{AuthSettings, ConfigError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::roles::Role;

const ALGORITHM: Algorithm = Algorithm::HS256;

// ============================================================================
// Claims and identity
// ============================================================================

/// JWT claims as they appear on the wire
///
/// Every field is optional so that partially formed tokens still decode
/// and the verifier can name exactly which claim is missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Issued at (Unix timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Expiration time (Unix timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// JWT ID, unique per issued token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl Claims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.iat.and_then(|iat| DateTime::from_timestamp(iat, 0))
    }

    /// Time left before expiry, `None` once expired or without `exp`
    pub fn time_until_expiration(&self) -> Option<Duration> {
        let remaining = self.exp?.checked_sub(Utc::now().timestamp())?;
        (remaining > 0).then(|| Duration::seconds(remaining))
    }
}

/// The user a token speaks for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub subject_id: String,
    pub email: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
}

impl Identity {
    /// New identity with the USER role and no extra permissions
    pub fn new(subject_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            email: email.into(),
            role: Role::default(),
            permissions: BTreeSet::new(),
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_permissions<I, P>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }
}

// ============================================================================
// Outcomes and errors
// ============================================================================

/// Why a token failed verification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidReason {
    #[error("malformed")]
    Malformed,
    #[error("bad signature")]
    BadSignature,
    #[error("expired")]
    Expired,
    #[error("missing claim: {0}")]
    MissingClaim(&'static str),
    #[error("invalid claim: {0}")]
    InvalidClaim(&'static str),
    #[error("bad issuer")]
    BadIssuer,
    #[error("bad audience")]
    BadAudience,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub identity: Identity,
    pub claims: Claims,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidToken {
    pub reason: InvalidReason,
    pub is_expired: bool,
}

impl From<InvalidReason> for InvalidToken {
    fn from(reason: InvalidReason) -> Self {
        let is_expired = reason == InvalidReason::Expired;
        Self { reason, is_expired }
    }
}

/// Result of [`TokenCodec::verify`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenOutcome {
    Valid(VerifiedToken),
    Invalid(InvalidToken),
}

impl TokenOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, TokenOutcome::Valid(_))
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            TokenOutcome::Valid(verified) => Some(&verified.identity),
            TokenOutcome::Invalid(_) => None,
        }
    }

    pub fn into_result(self) -> Result<VerifiedToken, InvalidToken> {
        match self {
            TokenOutcome::Valid(verified) => Ok(verified),
            TokenOutcome::Invalid(invalid) => Err(invalid),
        }
    }
}

/// JWT errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JwtError {
    #[error("Identity is missing {0}")]
    MissingIdentity(&'static str),
    #[error("Token encoding failed: {0}")]
    EncodingFailed(String),
    #[error("Token cannot be refreshed: {0}")]
    NotRefreshable(InvalidReason),
}

// ============================================================================
// Options
// ============================================================================

/// Issuing and validation options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenOptions {
    /// May be negative, which yields an already expired token
    pub time_to_live: Duration,
    pub issuer: String,
    pub audience: String,
}

impl Default for TokenOptions {
    fn default() -> Self {
        Self::from(&AuthSettings::default())
    }
}

impl From<&AuthSettings> for TokenOptions {
    fn from(settings: &AuthSettings) -> Self {
        Self {
            time_to_live: Duration::seconds(settings.token_ttl_seconds),
            issuer: settings.issuer.clone(),
            audience: settings.audience.clone(),
        }
    }
}

impl TokenOptions {
    pub fn with_time_to_live(mut self, time_to_live: Duration) -> Self {
        self.time_to_live = time_to_live;
        self
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Stateless token codec bound to one signing key
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    options: TokenOptions,
    validation: Validation,
    /// Same checks minus expiry, used to recover the identity on refresh
    validation_ignoring_expiry: Validation,
}

impl TokenCodec {
    /// Create a codec for the given secret; an empty secret is rejected
    pub fn new(secret: &[u8], options: TokenOptions) -> Result<Self, ConfigError> {
        if secret.is_empty() {
            return Err(ConfigError::EmptySigningKey);
        }

        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        // Claim presence, issuer and audience are checked by `check` so each
        // failure gets its own reason.
        validation.required_spec_claims = HashSet::new();
        validation.validate_aud = false;

        let mut validation_ignoring_expiry = validation.clone();
        validation_ignoring_expiry.validate_exp = false;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            options,
            validation,
            validation_ignoring_expiry,
        })
    }

    /// Create from validated settings
    pub fn from_settings(settings: &AuthSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Self::new(settings.jwt_secret.as_bytes(), TokenOptions::from(settings))
    }

    pub fn options(&self) -> &TokenOptions {
        &self.options
    }

    /// Issue a token with the configured time to live
    pub fn issue(&self, identity: &Identity) -> Result<String, JwtError> {
        self.issue_with_ttl(identity, self.options.time_to_live)
    }

    /// Issue a token with an explicit time to live
    pub fn issue_with_ttl(&self, identity: &Identity, ttl: Duration) -> Result<String, JwtError> {
        if identity.subject_id.is_empty() {
            return Err(JwtError::MissingIdentity("subject_id"));
        }
        if identity.email.is_empty() {
            return Err(JwtError::MissingIdentity("email"));
        }

        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: Some(identity.subject_id.clone()),
            email: Some(identity.email.clone()),
            role: Some(identity.role.to_string()),
            permissions: identity.permissions.clone(),
            iss: Some(self.options.issuer.clone()),
            aud: Some(self.options.audience.clone()),
            iat: Some(now),
            exp: Some(now + ttl.num_seconds()),
            jti: Some(uuid::Uuid::new_v4().to_string()),
        };

        let token = encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| JwtError::EncodingFailed(e.to_string()))?;
        info!(subject_id = %identity.subject_id, role = %identity.role, "Token issued");
        Ok(token)
    }

    /// Verify a token and return the identity it carries
    pub fn verify(&self, token: &str) -> TokenOutcome {
        match self.check(token) {
            Ok(verified) => TokenOutcome::Valid(verified),
            Err(reason) => {
                debug!(reason = %reason, "Token verification failed");
                TokenOutcome::Invalid(reason.into())
            }
        }
    }

    /// Issue a fresh token for a valid or merely expired one
    ///
    /// An expired token only needs a good signature and the identity claims
    /// (subject, email, role); issuer and audience are not re-checked. Any
    /// other failure refuses the refresh.
    pub fn refresh(&self, token: &str) -> Result<String, JwtError> {
        let identity = match self.check(token) {
            Ok(verified) => verified.identity,
            Err(InvalidReason::Expired) => self
                .decode_claims(token, &self.validation_ignoring_expiry)
                .and_then(|claims| identity_from(&claims))
                .map_err(JwtError::NotRefreshable)?,
            Err(reason) => {
                debug!(reason = %reason, "Token refresh refused");
                return Err(JwtError::NotRefreshable(reason));
            }
        };

        let fresh = self.issue(&identity)?;
        info!(subject_id = %identity.subject_id, "Token refreshed");
        Ok(fresh)
    }

    /// Structure and signature; expiry too when `validation` enforces it
    fn decode_claims(&self, token: &str, validation: &Validation) -> Result<Claims, InvalidReason> {
        if token.trim().is_empty() {
            return Err(InvalidReason::Malformed);
        }
        if token.split('.').count() != 3 {
            return Err(InvalidReason::Malformed);
        }

        decode::<Claims>(token, &self.decoding_key, validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => InvalidReason::Expired,
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidAlgorithmName => InvalidReason::BadSignature,
                _ => InvalidReason::Malformed,
            })
    }

    fn check(&self, token: &str) -> Result<VerifiedToken, InvalidReason> {
        let claims = self.decode_claims(token, &self.validation)?;

        required(&claims.sub, "subject_id")?;
        required(&claims.email, "email")?;
        required(&claims.role, "role")?;
        let issuer = required(&claims.iss, "issuer")?;
        let audience = required(&claims.aud, "audience")?;
        let expires_at = claims.exp.ok_or(InvalidReason::MissingClaim("expires_at"))?;
        claims.iat.ok_or(InvalidReason::MissingClaim("issued_at"))?;

        let identity = identity_from(&claims)?;

        if Utc::now().timestamp() >= expires_at {
            return Err(InvalidReason::Expired);
        }
        if issuer != self.options.issuer {
            return Err(InvalidReason::BadIssuer);
        }
        if audience != self.options.audience {
            return Err(InvalidReason::BadAudience);
        }

        Ok(VerifiedToken { identity, claims })
    }
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.options.issuer)
            .field("audience", &self.options.audience)
            .field("time_to_live", &self.options.time_to_live)
            .finish()
    }
}

fn identity_from(claims: &Claims) -> Result<Identity, InvalidReason> {
    let subject_id = required(&claims.sub, "subject_id")?;
    let email = required(&claims.email, "email")?;
    let role: Role = required(&claims.role, "role")?
        .parse()
        .map_err(|_| InvalidReason::InvalidClaim("role"))?;

    Ok(Identity {
        subject_id: subject_id.to_string(),
        email: email.to_string(),
        role,
        permissions: claims.permissions.clone(),
    })
}

fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, InvalidReason> {
    match value.as_deref() {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(InvalidReason::MissingClaim(name)),
    }
}

// ============================================================================
// Inspection helpers
// ============================================================================

/// Decode the payload without checking the signature
///
/// For inspection only (e.g. deciding whether to refresh). Returns `None`
/// on any structural problem.
pub fn decode_unsafe(token: &str) -> Option<Claims> {
    let mut segments = token.split('.');
    let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// `true` when the token expires within `threshold_minutes`
///
/// Undecodable tokens and tokens without `exp` count as expiring.
pub fn is_expiring_soon(token: &str, threshold_minutes: i64) -> bool {
    match decode_unsafe(token).and_then(|claims| claims.exp) {
        Some(exp) => {
            exp.saturating_sub(Utc::now().timestamp()) <= threshold_minutes.saturating_mul(60)
        }
        None => true,
    }
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(authorization: &str) -> Option<&str> {
    let scheme = authorization.get(..7)?;
    if !scheme.eq_ignore_ascii_case("bearer ") {
        return None;
    }
    let token = authorization[7..].trim();
    (!token.is_empty()).then_some(token)
}

// ============================================================================
// Tests
// ============================================================================
