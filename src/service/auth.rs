//! Authentication Service
//!
//! Registration, login, token rotation, logout and the password reset flow.
//!
//! A refresh token moves through `issued -> rotated-out | revoked | expired`
//! and never comes back. Rotation, logout-all and reset completion are each
//! a single store call so they commit or fail as a whole.

use crate::error::AuthError;
use crate::models::*;
use crate::notify::Notifier;
use crate::password::PasswordService;
use crate::store::AccountStore;
use crate::tokens::{generate_opaque_token, hash_token, IssuedToken, TokenIssuer};

use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Returned for every reset request, whether or not the address is known
pub const RESET_REQUESTED_MESSAGE: &str = "Password reset email sent if account exists";

/// Authentication service
pub struct AuthService {
    store: Arc<dyn AccountStore>,
    tokens: Arc<TokenIssuer>,
    passwords: Arc<PasswordService>,
    notifier: Arc<dyn Notifier>,
    reset_ttl: Duration,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn AccountStore>,
        tokens: Arc<TokenIssuer>,
        passwords: Arc<PasswordService>,
        notifier: Arc<dyn Notifier>,
        reset_ttl: Duration,
    ) -> Self {
        Self {
            store,
            tokens,
            passwords,
            notifier,
            reset_ttl,
        }
    }

    // ============================================
    // Token Validation
    // ============================================

    /// Decode a bearer token of the expected kind and reject blocklisted ones
    pub async fn authenticate(
        &self,
        token: &str,
        expected: TokenKind,
    ) -> Result<TokenClaims, AuthError> {
        let claims = self.tokens.decode(token, expected)?;

        if self.store.is_revoked(claims.jti, Utc::now()).await? {
            tracing::debug!(jti = %claims.jti, kind = %claims.kind, "Blocklisted token presented");
            return Err(AuthError::TokenRevoked);
        }

        Ok(claims)
    }

    /// Validate an access token for a protected route.
    ///
    /// The token's subject must still exist; tokens of deleted accounts are
    /// rejected even before they expire.
    pub async fn authorize_access(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let claims = self.authenticate(token, TokenKind::Access).await?;

        if self.store.find_user(claims.sub).await?.is_none() {
            tracing::debug!(user_id = %claims.sub, "Access token for a deleted account");
            return Err(AuthError::InvalidToken);
        }

        Ok(claims)
    }

    /// Sign an access/refresh pair and build the session record for the refresh half
    fn issue_pair(&self, user_id: Uuid) -> Result<(IssuedToken, IssuedToken, RefreshToken), AuthError> {
        let access = self.tokens.issue(user_id, TokenKind::Access)?;
        let refresh = self.tokens.issue(user_id, TokenKind::Refresh)?;

        let session = RefreshToken {
            id: Uuid::new_v4(),
            user_id,
            jti: refresh.claims.jti,
            token_hash: hash_token(&refresh.token),
            expires_at: refresh.expires_at(),
            created_at: Utc::now(),
        };

        Ok((access, refresh, session))
    }

    // ============================================
    // Registration
    // ============================================

    /// Register a new user
    pub async fn register(&self, req: RegisterRequest) -> Result<User, AuthError> {
        if self.store.find_user_by_username(&req.username).await?.is_some() {
            return Err(AuthError::UsernameExists);
        }

        if self.store.find_user_by_email(&req.email).await?.is_some() {
            return Err(AuthError::EmailExists);
        }

        let password_hash = self.passwords.hash(&req.password)?;

        // The store re-checks uniqueness, so a concurrent duplicate still fails cleanly
        let user = self
            .store
            .create_user(NewUser {
                username: req.username,
                email: req.email,
                password_hash,
            })
            .await?;

        tracing::info!(user_id = %user.id, username = %user.username, "User registered");

        Ok(user)
    }

    // ============================================
    // Login / Logout
    // ============================================

    /// Verify credentials and open a new session
    pub async fn login(&self, req: LoginRequest) -> Result<AuthResponse, AuthError> {
        let user = self
            .store
            .find_user_by_username(&req.username)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !self.passwords.verify(&req.password, &user.password_hash)? {
            tracing::info!(user_id = %user.id, "Login failed: wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        if !user.is_active {
            tracing::warn!(user_id = %user.id, "Login attempt on deactivated account");
            return Err(AuthError::AccountDeactivated);
        }

        let (access, refresh, session) = self.issue_pair(user.id)?;
        self.store.create_session(&session).await?;

        tracing::info!(user_id = %user.id, session_id = %session.id, "User logged in");

        Ok(AuthResponse {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "Bearer".to_string(),
            expires_in: self.tokens.access_ttl(),
            user: PublicUser::from(&user),
        })
    }

    /// Blocklist the presented access token
    pub async fn logout(&self, claims: &TokenClaims) -> Result<(), AuthError> {
        self.store
            .revoke_token(&claims.revocation(self.tokens.leeway()))
            .await?;

        tracing::info!(user_id = %claims.sub, jti = %claims.jti, "User logged out");
        Ok(())
    }

    /// End every session of the user and blocklist the presented access token.
    ///
    /// Other access tokens already issued to the user stay valid until they
    /// expire; only refresh tokens are cut off everywhere.
    pub async fn logout_all(&self, claims: &TokenClaims) -> Result<u64, AuthError> {
        let removed = self
            .store
            .revoke_all_sessions(claims.sub, &claims.revocation(self.tokens.leeway()))
            .await?;

        tracing::info!(user_id = %claims.sub, sessions = removed, "User logged out everywhere");
        Ok(removed)
    }

    // ============================================
    // Token Refresh
    // ============================================

    /// Exchange a refresh token for a new pair, retiring the presented one
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let claims = self.authenticate(refresh_token, TokenKind::Refresh).await?;
        let now = Utc::now();

        // The JWT leeway does not extend the session itself
        let session = self
            .store
            .find_session_by_jti(claims.jti)
            .await?
            .filter(|s| {
                s.user_id == claims.sub
                    && s.token_hash == hash_token(refresh_token)
                    && !s.is_expired(now)
            })
            .ok_or_else(|| {
                tracing::warn!(
                    user_id = %claims.sub,
                    jti = %claims.jti,
                    "Refresh token has no live session"
                );
                AuthError::TokenRevoked
            })?;

        let user = self
            .store
            .find_user(claims.sub)
            .await?
            .filter(|u| u.is_active)
            .ok_or(AuthError::InvalidToken)?;

        let (access, refresh, replacement) = self.issue_pair(user.id)?;
        let revocation = claims.revocation(self.tokens.leeway());

        if !self
            .store
            .rotate_session(&session, &revocation, &replacement)
            .await?
        {
            tracing::warn!(
                user_id = %user.id,
                session_id = %session.id,
                "Refresh token rotated concurrently"
            );
            return Err(AuthError::TokenRevoked);
        }

        tracing::debug!(
            user_id = %user.id,
            old_session = %session.id,
            new_session = %replacement.id,
            "Refresh token rotated"
        );

        Ok(TokenResponse {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "Bearer".to_string(),
            expires_in: self.tokens.access_ttl(),
        })
    }

    // ============================================
    // Password Reset
    // ============================================

    /// Start a reset. The response never reveals whether the address is registered.
    pub async fn request_password_reset(&self, email: &str) -> Result<MessageResponse, AuthError> {
        if let Some(user) = self.store.find_user_by_email(email).await? {
            let token = generate_opaque_token();
            let now = Utc::now();

            self.store
                .issue_reset_token(&PasswordResetToken {
                    id: Uuid::new_v4(),
                    user_id: user.id,
                    token_hash: hash_token(&token),
                    expires_at: now + self.reset_ttl,
                    is_used: false,
                    created_at: now,
                })
                .await?;

            if let Err(e) = self
                .notifier
                .send_password_reset_email(&user.email, &token)
                .await
            {
                tracing::warn!(user_id = %user.id, "Failed to dispatch reset email: {}", e);
            }

            tracing::info!(user_id = %user.id, "Password reset token issued");
        }

        Ok(MessageResponse::new(RESET_REQUESTED_MESSAGE))
    }

    /// Consume a reset token, set the new password and end every session
    pub async fn complete_password_reset(&self, req: ResetPasswordRequest) -> Result<(), AuthError> {
        let now = Utc::now();

        let record = self
            .store
            .find_reset_token(&hash_token(&req.token))
            .await?
            .filter(|t| t.is_valid(now))
            .ok_or(AuthError::InvalidResetToken)?;

        let password_hash = self.passwords.hash(&req.password)?;

        if !self
            .store
            .redeem_reset_token(&record, &password_hash, now)
            .await?
        {
            tracing::warn!(user_id = %record.user_id, "Reset token redeemed concurrently");
            return Err(AuthError::InvalidResetToken);
        }

        tracing::info!(user_id = %record.user_id, "Password reset completed");
        Ok(())
    }
}
