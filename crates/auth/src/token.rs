//! HS256 session tokens carried in the `kedai_session` cookie.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;

use kedai_core::{TenantId, UserId};

use crate::{Role, SessionClaims, TokenValidationError, validate_claims};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to sign session token: {0}")]
    Sign(String),

    #[error("invalid session token: {0}")]
    Invalid(String),

    #[error(transparent)]
    Window(#[from] TokenValidationError),
}

/// Issues and verifies session tokens with one shared secret.
#[derive(Clone)]
pub struct SessionTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl core::fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionTokens").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

impl SessionTokens {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
        roles: Vec<Role>,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = SessionClaims {
            sub: user_id,
            tenant_id,
            roles,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Sign(e.to_string()))
    }

    /// Checks the signature, then the time window against `now`.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<SessionClaims>(token, &self.decoding, &validation)
            .map_err(|e| TokenError::Invalid(e.to_string()))?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> SessionTokens {
        SessionTokens::new(b"test-secret-with-enough-bytes!!", Duration::minutes(30))
    }

    #[test]
    fn issued_token_verifies() {
        let now = Utc::now();
        let user = UserId::new();
        let tenant = TenantId::new();
        let token = tokens().issue(user, tenant, vec![Role::Owner], now).unwrap();

        let claims = tokens().verify(&token, now).unwrap();
        assert_eq!(claims.sub, user);
        assert_eq!(claims.tenant_id, tenant);
        assert_eq!(claims.roles, vec![Role::Owner]);
    }

    #[test]
    fn expired_token_is_rejected() {
        let issued = Utc::now() - Duration::hours(2);
        let token = tokens()
            .issue(UserId::new(), TenantId::new(), vec![Role::Cashier], issued)
            .unwrap();

        let err = tokens().verify(&token, Utc::now()).unwrap_err();
        assert!(matches!(err, TokenError::Window(TokenValidationError::Expired)));
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let now = Utc::now();
        let other = SessionTokens::new(b"another-secret-entirely-000000", Duration::minutes(30));
        let token = other
            .issue(UserId::new(), TenantId::new(), vec![Role::Owner], now)
            .unwrap();

        assert!(matches!(tokens().verify(&token, now), Err(TokenError::Invalid(_))));
    }
}
