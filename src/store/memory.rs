//! In-memory storage backend
//!
//! Used by the test suite and for running the service without a database.
//! Every operation holds a single write lock for its whole duration, which
//! gives compound operations the same all-or-nothing behaviour as a
//! PostgreSQL transaction.

use super::{CredentialStore, ResetLedger, TokenLedger};
use crate::error::AuthError;
use crate::models::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    sessions: HashMap<Uuid, RefreshToken>,
    /// Keyed by jti
    revoked: HashMap<Uuid, RevokedToken>,
    reset_tokens: HashMap<Uuid, PasswordResetToken>,
}

impl Tables {
    fn check_unique(
        &self,
        user_id: Option<Uuid>,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<(), AuthError> {
        for other in self.users.values() {
            if Some(other.id) == user_id {
                continue;
            }
            if username == Some(other.username.as_str()) {
                return Err(AuthError::UsernameExists);
            }
            if email == Some(other.email.as_str()) {
                return Err(AuthError::EmailExists);
            }
        }
        Ok(())
    }

    /// Mirrors the primary key and UNIQUE (jti), UNIQUE (token_hash) constraints
    /// on `refresh_tokens`; `skip` is a row about to be removed.
    fn check_session_unique(
        &self,
        session: &RefreshToken,
        skip: Option<Uuid>,
    ) -> Result<(), AuthError> {
        let clash = self.sessions.values().any(|s| {
            Some(s.id) != skip
                && (s.id == session.id || s.jti == session.jti || s.token_hash == session.token_hash)
        });

        if clash {
            return Err(AuthError::Database(format!(
                "duplicate refresh token for session {}",
                session.id
            )));
        }
        Ok(())
    }

    fn insert_revocation(&mut self, revocation: &RevokedToken) {
        self.revoked
            .entry(revocation.jti)
            .or_insert_with(|| revocation.clone());
    }

    fn delete_sessions_of(&mut self, user_id: Uuid) -> u64 {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.user_id != user_id);
        (before - self.sessions.len()) as u64
    }
}

/// Account storage kept in process memory
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocklist entries currently held, expired or not
    pub async fn revocation_count(&self) -> usize {
        self.tables.read().await.revoked.len()
    }

    /// Number of stored reset tokens, used or not
    pub async fn reset_token_count(&self) -> usize {
        self.tables.read().await.reset_tokens.len()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn create_user(&self, user: NewUser) -> Result<User, AuthError> {
        let mut tables = self.tables.write().await;
        tables.check_unique(None, Some(&user.username), Some(&user.email))?;

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, AuthError> {
        Ok(self.tables.read().await.users.get(&user_id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, AuthError> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn update_user(
        &self,
        user_id: Uuid,
        changes: UserChanges,
    ) -> Result<Option<User>, AuthError> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&user_id) {
            return Ok(None);
        }
        tables.check_unique(
            Some(user_id),
            changes.username.as_deref(),
            changes.email.as_deref(),
        )?;

        let Some(user) = tables.users.get_mut(&user_id) else {
            return Ok(None);
        };
        if let Some(username) = changes.username {
            user.username = username;
        }
        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(password_hash) = changes.password_hash {
            user.password_hash = password_hash;
        }
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }

    async fn deactivate_user(&self, user_id: Uuid) -> Result<bool, AuthError> {
        let mut tables = self.tables.write().await;
        let Some(user) = tables.users.get_mut(&user_id) else {
            return Ok(false);
        };
        user.is_active = false;
        user.updated_at = Utc::now();
        tables.delete_sessions_of(user_id);
        Ok(true)
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<bool, AuthError> {
        let mut tables = self.tables.write().await;
        if tables.users.remove(&user_id).is_none() {
            return Ok(false);
        }
        tables.delete_sessions_of(user_id);
        tables.revoked.retain(|_, r| r.user_id != user_id);
        tables.reset_tokens.retain(|_, t| t.user_id != user_id);
        Ok(true)
    }
}

#[async_trait]
impl TokenLedger for MemoryStore {
    async fn create_session(&self, session: &RefreshToken) -> Result<(), AuthError> {
        let mut tables = self.tables.write().await;
        tables.check_session_unique(session, None)?;
        tables.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn find_session_by_jti(&self, jti: Uuid) -> Result<Option<RefreshToken>, AuthError> {
        let tables = self.tables.read().await;
        Ok(tables.sessions.values().find(|s| s.jti == jti).cloned())
    }

    async fn find_session(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<RefreshToken>, AuthError> {
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .get(&session_id)
            .filter(|s| s.user_id == user_id)
            .cloned())
    }

    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<RefreshToken>, AuthError> {
        let tables = self.tables.read().await;
        let mut sessions: Vec<RefreshToken> = tables
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    async fn rotate_session(
        &self,
        retired: &RefreshToken,
        revocation: &RevokedToken,
        replacement: &RefreshToken,
    ) -> Result<bool, AuthError> {
        let mut tables = self.tables.write().await;
        if !tables.sessions.contains_key(&retired.id) {
            return Ok(false);
        }
        tables.check_session_unique(replacement, Some(retired.id))?;

        tables.sessions.remove(&retired.id);
        tables.insert_revocation(revocation);
        tables.sessions.insert(replacement.id, replacement.clone());
        Ok(true)
    }

    async fn revoke_session(
        &self,
        session: &RefreshToken,
        revocation: &RevokedToken,
    ) -> Result<bool, AuthError> {
        let mut tables = self.tables.write().await;
        let owned = tables
            .sessions
            .get(&session.id)
            .is_some_and(|s| s.user_id == session.user_id);
        if !owned {
            return Ok(false);
        }
        tables.sessions.remove(&session.id);
        tables.insert_revocation(revocation);
        Ok(true)
    }

    async fn revoke_all_sessions(
        &self,
        user_id: Uuid,
        current: &RevokedToken,
    ) -> Result<u64, AuthError> {
        let mut tables = self.tables.write().await;
        let removed = tables.delete_sessions_of(user_id);
        tables.insert_revocation(current);
        Ok(removed)
    }

    async fn revoke_token(&self, revocation: &RevokedToken) -> Result<(), AuthError> {
        self.tables.write().await.insert_revocation(revocation);
        Ok(())
    }

    async fn is_revoked(&self, jti: Uuid, now: DateTime<Utc>) -> Result<bool, AuthError> {
        // Expired entries are ignored here and dropped by purge_revocations
        let tables = self.tables.read().await;
        Ok(tables.revoked.get(&jti).is_some_and(|r| r.is_live(now)))
    }

    async fn sweep_expired_sessions(
        &self,
        now: DateTime<Utc>,
        retain_until: DateTime<Utc>,
    ) -> Result<u64, AuthError> {
        let mut tables = self.tables.write().await;
        let expired: Vec<RefreshToken> = tables
            .sessions
            .values()
            .filter(|s| s.is_expired(now))
            .cloned()
            .collect();

        for session in &expired {
            let entry =
                RevokedToken::new(session.jti, TokenKind::Refresh, session.user_id, retain_until);
            tables.insert_revocation(&entry);
            tables.sessions.remove(&session.id);
        }

        Ok(expired.len() as u64)
    }

    async fn purge_revocations(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let mut tables = self.tables.write().await;
        let before = tables.revoked.len();
        tables.revoked.retain(|_, r| r.is_live(now));
        Ok((before - tables.revoked.len()) as u64)
    }
}

#[async_trait]
impl ResetLedger for MemoryStore {
    async fn issue_reset_token(&self, token: &PasswordResetToken) -> Result<(), AuthError> {
        let mut tables = self.tables.write().await;
        tables
            .reset_tokens
            .retain(|_, t| t.user_id != token.user_id || t.is_used);
        tables.reset_tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn find_reset_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<PasswordResetToken>, AuthError> {
        let tables = self.tables.read().await;
        Ok(tables
            .reset_tokens
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn redeem_reset_token(
        &self,
        token: &PasswordResetToken,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AuthError> {
        let mut tables = self.tables.write().await;

        let claimable = tables
            .reset_tokens
            .get(&token.id)
            .is_some_and(|t| t.is_valid(now));
        if !claimable || !tables.users.contains_key(&token.user_id) {
            return Ok(false);
        }

        if let Some(stored) = tables.reset_tokens.get_mut(&token.id) {
            stored.is_used = true;
        }
        if let Some(user) = tables.users.get_mut(&token.user_id) {
            user.password_hash = password_hash.to_string();
            user.updated_at = now;
        }
        tables.delete_sessions_of(token.user_id);
        Ok(true)
    }

    async fn purge_expired_reset_tokens(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let mut tables = self.tables.write().await;
        let before = tables.reset_tokens.len();
        tables
            .reset_tokens
            .retain(|_, t| t.is_used || t.expires_at > now);
        Ok((before - tables.reset_tokens.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_user(name: &str) -> NewUser {
        NewUser {
            username: name.to_string(),
            email: format!("{}@example.com", name),
            password_hash: "hash".to_string(),
        }
    }

    fn session(user_id: Uuid, expires_at: DateTime<Utc>) -> RefreshToken {
        let jti = Uuid::new_v4();
        RefreshToken {
            id: Uuid::new_v4(),
            user_id,
            jti,
            token_hash: jti.to_string(),
            expires_at,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_unique_username_and_email() {
        let store = MemoryStore::new();
        store.create_user(new_user("alice")).await.unwrap();

        let mut dup_name = new_user("alice");
        dup_name.email = "other@example.com".into();
        assert!(matches!(
            store.create_user(dup_name).await,
            Err(AuthError::UsernameExists)
        ));

        let mut dup_email = new_user("bob");
        dup_email.email = "alice@example.com".into();
        assert!(matches!(
            store.create_user(dup_email).await,
            Err(AuthError::EmailExists)
        ));
    }

    #[tokio::test]
    async fn test_update_user_keeps_own_values() {
        let store = MemoryStore::new();
        let alice = store.create_user(new_user("alice")).await.unwrap();
        store.create_user(new_user("bob")).await.unwrap();

        let same = UserChanges {
            username: Some("alice".into()),
            ..Default::default()
        };
        assert!(store.update_user(alice.id, same).await.unwrap().is_some());

        let taken = UserChanges {
            email: Some("bob@example.com".into()),
            ..Default::default()
        };
        assert!(matches!(
            store.update_user(alice.id, taken).await,
            Err(AuthError::EmailExists)
        ));
    }

    #[tokio::test]
    async fn test_rotate_only_once() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("alice")).await.unwrap();
        let expires = Utc::now() + Duration::days(1);

        let old = session(user.id, expires);
        store.create_session(&old).await.unwrap();

        let revocation = RevokedToken::new(old.jti, TokenKind::Refresh, user.id, expires);
        let first = session(user.id, expires);
        let second = session(user.id, expires);

        assert!(store.rotate_session(&old, &revocation, &first).await.unwrap());
        assert!(!store.rotate_session(&old, &revocation, &second).await.unwrap());

        let sessions = store.list_sessions(user.id).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, first.id);
        assert!(store.is_revoked(old.jti, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_session_jti_and_hash_are_unique() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("alice")).await.unwrap();
        let expires = Utc::now() + Duration::days(1);

        let first = session(user.id, expires);
        store.create_session(&first).await.unwrap();

        let mut same_jti = session(user.id, expires);
        same_jti.jti = first.jti;
        assert!(matches!(
            store.create_session(&same_jti).await,
            Err(AuthError::Database(_))
        ));

        let mut same_hash = session(user.id, expires);
        same_hash.token_hash = first.token_hash.clone();
        assert!(matches!(
            store.create_session(&same_hash).await,
            Err(AuthError::Database(_))
        ));

        // A failed rotation leaves the retired session in place
        let other = session(user.id, expires);
        store.create_session(&other).await.unwrap();
        let revocation = RevokedToken::new(first.jti, TokenKind::Refresh, user.id, expires);
        let mut clashing = session(user.id, expires);
        clashing.jti = other.jti;
        assert!(store.rotate_session(&first, &revocation, &clashing).await.is_err());
        assert!(store.find_session_by_jti(first.jti).await.unwrap().is_some());
        assert!(!store.is_revoked(first.jti, Utc::now()).await.unwrap());

        assert_eq!(store.list_sessions(user.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_revocation_expires_lazily() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let entry = RevokedToken::new(
            Uuid::new_v4(),
            TokenKind::Access,
            Uuid::new_v4(),
            now + Duration::seconds(30),
        );
        store.revoke_token(&entry).await.unwrap();

        assert!(store.is_revoked(entry.jti, now).await.unwrap());
        assert!(!store
            .is_revoked(entry.jti, now + Duration::seconds(31))
            .await
            .unwrap());

        assert_eq!(store.purge_revocations(now).await.unwrap(), 0);
        assert_eq!(
            store
                .purge_revocations(now + Duration::seconds(31))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_revoke_session_requires_owner() {
        let store = MemoryStore::new();
        let alice = store.create_user(new_user("alice")).await.unwrap();
        let bob = store.create_user(new_user("bob")).await.unwrap();
        let expires = Utc::now() + Duration::days(1);

        let owned = session(alice.id, expires);
        store.create_session(&owned).await.unwrap();

        assert!(store.find_session(bob.id, owned.id).await.unwrap().is_none());

        let mut forged = owned.clone();
        forged.user_id = bob.id;
        let entry = RevokedToken::new(owned.jti, TokenKind::Refresh, bob.id, expires);
        assert!(!store.revoke_session(&forged, &entry).await.unwrap());
        assert_eq!(store.list_sessions(alice.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_user_removes_owned_records() {
        let store = MemoryStore::new();
        let alice = store.create_user(new_user("alice")).await.unwrap();
        let bob = store.create_user(new_user("bob")).await.unwrap();
        let now = Utc::now();
        let expires = now + Duration::days(1);

        store.create_session(&session(alice.id, expires)).await.unwrap();
        store.create_session(&session(bob.id, expires)).await.unwrap();
        store
            .revoke_token(&RevokedToken::new(
                Uuid::new_v4(),
                TokenKind::Access,
                alice.id,
                expires,
            ))
            .await
            .unwrap();
        store
            .issue_reset_token(&PasswordResetToken {
                id: Uuid::new_v4(),
                user_id: alice.id,
                token_hash: "h".into(),
                expires_at: expires,
                is_used: false,
                created_at: now,
            })
            .await
            .unwrap();

        assert!(store.delete_user(alice.id).await.unwrap());
        assert!(!store.delete_user(alice.id).await.unwrap());

        assert!(store.find_user(alice.id).await.unwrap().is_none());
        assert!(store.list_sessions(alice.id).await.unwrap().is_empty());
        assert_eq!(store.list_sessions(bob.id).await.unwrap().len(), 1);
        assert_eq!(store.revocation_count().await, 0);
        assert_eq!(store.reset_token_count().await, 0);
    }

    #[tokio::test]
    async fn test_new_reset_token_replaces_outstanding() {
        let store = MemoryStore::new();
        let alice = store.create_user(new_user("alice")).await.unwrap();
        let now = Utc::now();

        let make = |hash: &str| PasswordResetToken {
            id: Uuid::new_v4(),
            user_id: alice.id,
            token_hash: hash.to_string(),
            expires_at: now + Duration::hours(24),
            is_used: false,
            created_at: now,
        };

        store.issue_reset_token(&make("first")).await.unwrap();
        store.issue_reset_token(&make("second")).await.unwrap();

        assert!(store.find_reset_token("first").await.unwrap().is_none());
        assert!(store.find_reset_token("second").await.unwrap().is_some());
    }
}
