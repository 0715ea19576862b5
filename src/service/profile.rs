//! Profile Service
//!
//! Self-service operations for an authenticated user: profile read/update,
//! deactivation, account deletion and session management.

use crate::error::AuthError;
use crate::models::*;
use crate::password::PasswordService;
use crate::store::AccountStore;

use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

pub struct ProfileService {
    store: Arc<dyn AccountStore>,
    passwords: Arc<PasswordService>,
    leeway: Duration,
}

impl ProfileService {
    pub fn new(store: Arc<dyn AccountStore>, passwords: Arc<PasswordService>, leeway: Duration) -> Self {
        Self {
            store,
            passwords,
            leeway,
        }
    }

    async fn load(&self, user_id: Uuid) -> Result<User, AuthError> {
        self.store
            .find_user(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    pub async fn get_profile(&self, user_id: Uuid) -> Result<ProfileResponse, AuthError> {
        Ok(self.load(user_id).await?.into())
    }

    /// Apply a partial update.
    ///
    /// A new password needs the current one. Changing the password here does
    /// not end existing sessions.
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        req: UpdateProfileRequest,
    ) -> Result<ProfileResponse, AuthError> {
        if req.is_empty() {
            return Err(AuthError::Validation("No data provided".to_string()));
        }

        let user = self.load(user_id).await?;
        let mut changes = UserChanges::default();

        if let Some(username) = req.username.filter(|u| *u != user.username) {
            if self.store.find_user_by_username(&username).await?.is_some() {
                return Err(AuthError::UsernameExists);
            }
            changes.username = Some(username);
        }

        if let Some(email) = req.email.filter(|e| *e != user.email) {
            if self.store.find_user_by_email(&email).await?.is_some() {
                return Err(AuthError::EmailExists);
            }
            changes.email = Some(email);
        }

        if let Some(password) = req.password {
            let current = req.current_password.ok_or(AuthError::IncorrectPassword)?;
            if !self.passwords.verify(&current, &user.password_hash)? {
                tracing::info!(user_id = %user.id, "Profile update rejected: wrong current password");
                return Err(AuthError::IncorrectPassword);
            }
            changes.password_hash = Some(self.passwords.hash(&password)?);
        }

        if changes.is_empty() {
            return Ok(user.into());
        }

        let updated = self
            .store
            .update_user(user_id, changes)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        tracing::info!(user_id = %updated.id, "Profile updated");
        Ok(updated.into())
    }

    /// Deactivate the account and end all of its sessions
    pub async fn deactivate(&self, user_id: Uuid) -> Result<(), AuthError> {
        if !self.store.deactivate_user(user_id).await? {
            return Err(AuthError::UserNotFound);
        }

        tracing::info!(user_id = %user_id, "Account deactivated");
        Ok(())
    }

    /// Remove the account and everything it owns
    pub async fn delete_account(&self, user_id: Uuid) -> Result<(), AuthError> {
        if !self.store.delete_user(user_id).await? {
            return Err(AuthError::UserNotFound);
        }

        tracing::info!(user_id = %user_id, "Account deleted");
        Ok(())
    }

    /// Sessions that have not yet expired
    pub async fn list_sessions(&self, user_id: Uuid) -> Result<SessionListResponse, AuthError> {
        let now = Utc::now();
        let active_sessions = self
            .store
            .list_sessions(user_id)
            .await?
            .into_iter()
            .filter(|s| !s.is_expired(now))
            .map(SessionResponse::from)
            .collect();

        Ok(SessionListResponse { active_sessions })
    }

    /// End one session owned by the user and blocklist its refresh token
    pub async fn revoke_session(&self, user_id: Uuid, session_id: &str) -> Result<(), AuthError> {
        let session_id = Uuid::parse_str(session_id).map_err(|_| AuthError::SessionNotFound)?;

        let session = self
            .store
            .find_session(user_id, session_id)
            .await?
            .ok_or(AuthError::SessionNotFound)?;

        let revocation = RevokedToken::new(
            session.jti,
            TokenKind::Refresh,
            user_id,
            session.expires_at + self.leeway,
        );

        if !self.store.revoke_session(&session, &revocation).await? {
            return Err(AuthError::SessionNotFound);
        }

        tracing::info!(user_id = %user_id, session_id = %session_id, "Session revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CredentialStore, TokenLedger};
    use crate::testing::Harness;

    async fn signed_in(h: &Harness, username: &str, email: &str) -> AuthResponse {
        h.auth
            .register(RegisterRequest {
                username: username.into(),
                email: email.into(),
                password: "pw1".into(),
            })
            .await
            .unwrap();
        h.auth
            .login(LoginRequest {
                username: username.into(),
                password: "pw1".into(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_update_requires_data() {
        let h = Harness::new();
        let login = signed_in(&h, "alice", "a@x.com").await;

        let result = h
            .profiles
            .update_profile(login.user.id, UpdateProfileRequest::default())
            .await;
        assert!(matches!(result, Err(AuthError::Validation(m)) if m == "No data provided"));
    }

    #[tokio::test]
    async fn test_update_checks_uniqueness_against_others() {
        let h = Harness::new();
        let alice = signed_in(&h, "alice", "a@x.com").await;
        signed_in(&h, "bob", "b@x.com").await;

        let taken = h
            .profiles
            .update_profile(
                alice.user.id,
                UpdateProfileRequest {
                    email: Some("b@x.com".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(taken, Err(AuthError::EmailExists)));

        // Re-submitting your own username is not a conflict
        let same = h
            .profiles
            .update_profile(
                alice.user.id,
                UpdateProfileRequest {
                    username: Some("alice".into()),
                    email: Some("alice@x.com".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(same.username, "alice");
        assert_eq!(same.email, "alice@x.com");
    }

    #[tokio::test]
    async fn test_password_change_needs_current_password() {
        let h = Harness::new();
        let login = signed_in(&h, "alice", "a@x.com").await;

        let missing = h
            .profiles
            .update_profile(
                login.user.id,
                UpdateProfileRequest {
                    password: Some("pw2".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(missing, Err(AuthError::IncorrectPassword)));

        let wrong = h
            .profiles
            .update_profile(
                login.user.id,
                UpdateProfileRequest {
                    password: Some("pw2".into()),
                    current_password: Some("nope".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(wrong, Err(AuthError::IncorrectPassword)));

        h.profiles
            .update_profile(
                login.user.id,
                UpdateProfileRequest {
                    password: Some("pw2".into()),
                    current_password: Some("pw1".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(h
            .auth
            .login(LoginRequest {
                username: "alice".into(),
                password: "pw2".into(),
            })
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_deactivate_blocks_login_and_refresh() {
        let h = Harness::new();
        let login = signed_in(&h, "alice", "a@x.com").await;

        h.profiles.deactivate(login.user.id).await.unwrap();

        let relogin = h
            .auth
            .login(LoginRequest {
                username: "alice".into(),
                password: "pw1".into(),
            })
            .await;
        assert!(matches!(relogin, Err(AuthError::AccountDeactivated)));
        assert!(h.auth.refresh(&login.refresh_token).await.is_err());
        assert!(h.store.list_sessions(login.user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revoke_session_is_owner_scoped() {
        let h = Harness::new();
        let alice = signed_in(&h, "alice", "a@x.com").await;
        let bob = signed_in(&h, "bob", "b@x.com").await;

        let listed = h.profiles.list_sessions(alice.user.id).await.unwrap();
        assert_eq!(listed.active_sessions.len(), 1);
        let session_id = listed.active_sessions[0].id.to_string();

        assert!(matches!(
            h.profiles.revoke_session(bob.user.id, &session_id).await,
            Err(AuthError::SessionNotFound)
        ));
        assert!(matches!(
            h.profiles.revoke_session(alice.user.id, "not-a-uuid").await,
            Err(AuthError::SessionNotFound)
        ));

        h.profiles
            .revoke_session(alice.user.id, &session_id)
            .await
            .unwrap();
        assert!(matches!(
            h.auth.refresh(&alice.refresh_token).await,
            Err(AuthError::TokenRevoked)
        ));
        assert!(matches!(
            h.profiles.revoke_session(alice.user.id, &session_id).await,
            Err(AuthError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_delete_account_removes_everything() {
        let h = Harness::new();
        let login = signed_in(&h, "alice", "a@x.com").await;

        h.profiles.delete_account(login.user.id).await.unwrap();

        assert!(h.store.find_user(login.user.id).await.unwrap().is_none());
        assert!(h.store.list_sessions(login.user.id).await.unwrap().is_empty());
        assert!(matches!(
            h.profiles.get_profile(login.user.id).await,
            Err(AuthError::UserNotFound)
        ));
        assert!(matches!(
            h.profiles.delete_account(login.user.id).await,
            Err(AuthError::UserNotFound)
        ));
    }
}
