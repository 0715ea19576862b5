//! Token Issuance
//!
//! Signs and validates access/refresh JWTs and produces the opaque
//! strings used for password reset links.

use crate::config::{AccountsConfig, MAX_LEEWAY_SECS, MAX_LIFETIME_SECS};
use crate::error::AuthError;
use crate::models::{TokenClaims, TokenKind};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A freshly signed token and the claims it carries
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: TokenClaims,
}

impl IssuedToken {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.claims.expires_at()
    }
}

/// JWT signer/validator
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    access_ttl: i64,
    refresh_ttl: i64,
    leeway: u64,
}

impl TokenIssuer {
    pub fn new(config: &AccountsConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            // Bounded so lifetime arithmetic cannot overflow on unvalidated configs
            access_ttl: config.access_token_expiration.min(MAX_LIFETIME_SECS),
            refresh_ttl: config.refresh_token_expiration.min(MAX_LIFETIME_SECS),
            leeway: config.jwt_leeway.min(MAX_LEEWAY_SECS),
        }
    }

    /// Access token lifetime in seconds
    pub fn access_ttl(&self) -> i64 {
        self.access_ttl
    }

    /// Tolerated clock skew; blocklist entries outlive their token by this much
    pub fn leeway(&self) -> Duration {
        Duration::seconds(self.leeway as i64)
    }

    /// Sign a new token of the given kind for a user
    pub fn issue(&self, user_id: Uuid, kind: TokenKind) -> Result<IssuedToken, AuthError> {
        let now = Utc::now();
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };

        let claims = TokenClaims {
            sub: user_id,
            jti: Uuid::new_v4(),
            kind,
            iat: now.timestamp(),
            exp: (now + Duration::seconds(ttl)).timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        Ok(IssuedToken { token, claims })
    }

    /// Verify signature, expiry, issuer, audience and token type.
    /// Blocklist membership is checked by the caller.
    pub fn decode(&self, token: &str, expected: TokenKind) -> Result<TokenClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.leeway = self.leeway;

        let claims = decode::<TokenClaims>(token, &self.decoding_key, &validation)?.claims;

        if claims.kind != expected {
            tracing::debug!(
                expected = %expected,
                actual = %claims.kind,
                "Token type mismatch"
            );
            return Err(AuthError::InvalidToken);
        }

        Ok(claims)
    }
}

/// SHA-256 hex digest used to store token strings at rest
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// 32 random bytes, URL-safe base64 without padding
pub fn generate_opaque_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_config;

    #[test]
    fn test_issue_and_decode_access_token() {
        let issuer = TokenIssuer::new(&test_config());
        let user_id = Uuid::new_v4();

        let issued = issuer.issue(user_id, TokenKind::Access).unwrap();
        let claims = issuer.decode(&issued.token, TokenKind::Access).unwrap();

        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.jti, issued.claims.jti);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_decode_rejects_wrong_kind() {
        let issuer = TokenIssuer::new(&test_config());
        let refresh = issuer.issue(Uuid::new_v4(), TokenKind::Refresh).unwrap();

        assert!(matches!(
            issuer.decode(&refresh.token, TokenKind::Access),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_decode_rejects_foreign_signature() {
        let issuer = TokenIssuer::new(&test_config());
        let mut other_config = test_config();
        other_config.jwt_secret = "b".repeat(32);
        let other = TokenIssuer::new(&other_config);

        let token = other.issue(Uuid::new_v4(), TokenKind::Access).unwrap();
        assert!(issuer.decode(&token.token, TokenKind::Access).is_err());
    }

    #[test]
    fn test_each_token_has_unique_jti() {
        let issuer = TokenIssuer::new(&test_config());
        let user_id = Uuid::new_v4();
        let a = issuer.issue(user_id, TokenKind::Refresh).unwrap();
        let b = issuer.issue(user_id, TokenKind::Refresh).unwrap();

        assert_ne!(a.claims.jti, b.claims.jti);
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn test_opaque_tokens() {
        let token = generate_opaque_token();
        assert_eq!(token.len(), 43);
        assert_ne!(token, generate_opaque_token());
        assert_eq!(hash_token(&token).len(), 64);
        assert_eq!(hash_token(&token), hash_token(&token));
    }

    #[test]
    fn test_issuer_bounds_unvalidated_lifetimes() {
        let mut config = test_config();
        config.jwt_leeway = u64::MAX;
        config.refresh_token_expiration = i64::MAX;
        let issuer = TokenIssuer::new(&config);

        assert_eq!(issuer.leeway(), Duration::seconds(MAX_LEEWAY_SECS as i64));
        let token = issuer.issue(Uuid::new_v4(), TokenKind::Refresh).unwrap();
        assert_eq!(token.claims.exp - token.claims.iat, MAX_LIFETIME_SECS);
    }
}
