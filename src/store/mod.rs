//! Account Storage
//!
//! The services talk to storage only through the traits below, so the
//! PostgreSQL backend and the in-memory backend are interchangeable.
//! Methods that touch more than one row either commit completely or
//! leave nothing behind.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::AuthError;
use crate::models::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// User identity and password hash
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert a user. Fails with `UsernameExists`/`EmailExists` on a duplicate.
    async fn create_user(&self, user: NewUser) -> Result<User, AuthError>;

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, AuthError>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, AuthError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;

    /// Apply a partial update. Returns `None` if the user does not exist.
    async fn update_user(
        &self,
        user_id: Uuid,
        changes: UserChanges,
    ) -> Result<Option<User>, AuthError>;

    /// Clear the active flag and delete every session of the user.
    /// Returns `false` if the user does not exist.
    async fn deactivate_user(&self, user_id: Uuid) -> Result<bool, AuthError>;

    /// Delete the user together with every record it owns.
    /// Returns `false` if the user does not exist.
    async fn delete_user(&self, user_id: Uuid) -> Result<bool, AuthError>;
}

/// Refresh token sessions and the revocation blocklist
#[async_trait]
pub trait TokenLedger: Send + Sync {
    async fn create_session(&self, session: &RefreshToken) -> Result<(), AuthError>;

    async fn find_session_by_jti(&self, jti: Uuid) -> Result<Option<RefreshToken>, AuthError>;

    async fn find_session(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<RefreshToken>, AuthError>;

    /// Sessions of a user, oldest first
    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<RefreshToken>, AuthError>;

    /// Delete `retired`, blocklist its jti and insert `replacement`.
    /// Returns `false` (and changes nothing) if `retired` was already gone.
    async fn rotate_session(
        &self,
        retired: &RefreshToken,
        revocation: &RevokedToken,
        replacement: &RefreshToken,
    ) -> Result<bool, AuthError>;

    /// Delete one session and blocklist its jti.
    /// Returns `false` if the session was already gone.
    async fn revoke_session(
        &self,
        session: &RefreshToken,
        revocation: &RevokedToken,
    ) -> Result<bool, AuthError>;

    /// Delete every session of a user and blocklist `current`.
    /// Returns the number of sessions removed.
    async fn revoke_all_sessions(
        &self,
        user_id: Uuid,
        current: &RevokedToken,
    ) -> Result<u64, AuthError>;

    /// Add a blocklist entry. Re-revoking a jti is a no-op.
    async fn revoke_token(&self, revocation: &RevokedToken) -> Result<(), AuthError>;

    /// Whether a live blocklist entry exists for `jti`
    async fn is_revoked(&self, jti: Uuid, now: DateTime<Utc>) -> Result<bool, AuthError>;

    /// Move sessions expired at `now` into the blocklist (kept until
    /// `retain_until`) and delete them. Returns the number of sessions removed.
    async fn sweep_expired_sessions(
        &self,
        now: DateTime<Utc>,
        retain_until: DateTime<Utc>,
    ) -> Result<u64, AuthError>;

    /// Drop blocklist entries whose own expiry has passed
    async fn purge_revocations(&self, now: DateTime<Utc>) -> Result<u64, AuthError>;
}

/// Single-use password reset tokens
#[async_trait]
pub trait ResetLedger: Send + Sync {
    /// Store a reset token, deleting any outstanding unused token of the same user
    async fn issue_reset_token(&self, token: &PasswordResetToken) -> Result<(), AuthError>;

    async fn find_reset_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<PasswordResetToken>, AuthError>;

    /// Mark the token used, set the new password hash and delete all sessions of
    /// its user. Returns `false` (and changes nothing) if the token is no longer
    /// valid at `now`.
    async fn redeem_reset_token(
        &self,
        token: &PasswordResetToken,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AuthError>;

    /// Delete tokens that expired without being used
    async fn purge_expired_reset_tokens(&self, now: DateTime<Utc>) -> Result<u64, AuthError>;
}

/// Everything the services need from storage
pub trait AccountStore: CredentialStore + TokenLedger + ResetLedger {}

impl<T> AccountStore for T where T: CredentialStore + TokenLedger + ResetLedger {}
