use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use kestrel_core::TenantId;

use crate::{PrincipalId, Role};

/// JWT claims model (transport-agnostic).
///
/// The minimal set of claims expected once a bearer token has been decoded and
/// its signature verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject / principal identifier.
    pub sub: PrincipalId,

    /// Company the token acts within.
    pub tenant_id: TenantId,

    /// RBAC roles granted within the company.
    pub roles: Vec<Role>,

    /// Issued-at timestamp.
    pub issued_at: DateTime<Utc>,

    /// Expiration timestamp.
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("malformed token: {0}")]
    Malformed(String),
}

/// Upper bound on the clock-skew leeway a validator accepts (one day).
pub const MAX_LEEWAY_SECS: i64 = 86_400;

/// Deterministically validate JWT claims against `now`.
///
/// `leeway` tolerates clock skew on both ends of the window.
pub fn validate_claims(
    claims: &JwtClaims,
    now: DateTime<Utc>,
    leeway: Duration,
) -> Result<(), TokenValidationError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    // A leeway reaching past the representable range never rejects.
    if now.checked_add_signed(leeway).is_some_and(|latest| latest < claims.issued_at) {
        return Err(TokenValidationError::NotYetValid);
    }
    if now.checked_sub_signed(leeway).is_some_and(|earliest| earliest >= claims.expires_at) {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

/// Verifies a bearer token and returns its validated claims.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError>;
}

/// HMAC-SHA256 token validator.
pub struct Hs256JwtValidator {
    key: DecodingKey,
    validation: Validation,
    leeway: Duration,
}

impl Hs256JwtValidator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // The time window lives in our own claim names; see `validate_claims`.
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_aud = false;

        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
            validation,
            leeway: Duration::zero(),
        }
    }

    /// Leeway is clamped to `0..=MAX_LEEWAY_SECS`.
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway.clamp(Duration::zero(), Duration::seconds(MAX_LEEWAY_SECS));
        self
    }

    pub fn with_leeway_secs(self, secs: u64) -> Self {
        let secs = i64::try_from(secs).unwrap_or(MAX_LEEWAY_SECS).min(MAX_LEEWAY_SECS);
        self.with_leeway(Duration::seconds(secs))
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError> {
        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.key, &self.validation)
            .map_err(|e| TokenValidationError::Malformed(e.to_string()))?;
        validate_claims(&data.claims, now, self.leeway)?;
        Ok(data.claims)
    }
}
