//! PostgreSQL storage backend

use super::{CredentialStore, ResetLedger, TokenLedger};
use crate::error::AuthError;
use crate::models::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Account storage on a PostgreSQL pool
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create the schema if it does not exist yet
    pub async fn migrate(&self) -> Result<(), AuthError> {
        tracing::info!("Running account database migrations");

        sqlx::query(
            r#"
            DO $$ BEGIN
                CREATE TYPE token_kind AS ENUM ('access', 'refresh');
            EXCEPTION
                WHEN duplicate_object THEN null;
            END $$;
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                username VARCHAR(50) NOT NULL,
                email VARCHAR(120) NOT NULL,
                password_hash VARCHAR(255) NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CONSTRAINT users_username_key UNIQUE (username),
                CONSTRAINT users_email_key UNIQUE (email)
            );
            "#,
        )
        .execute(&self.db)
        .await?;

        // Session and reset tables reference users without ON DELETE CASCADE;
        // delete_user removes dependents explicitly.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS refresh_tokens (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL REFERENCES users(id),
                jti UUID NOT NULL UNIQUE,
                token_hash VARCHAR(64) NOT NULL UNIQUE,
                expires_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_refresh_tokens_user ON refresh_tokens(user_id);")
            .execute(&self.db)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_expires ON refresh_tokens(expires_at);",
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS revoked_tokens (
                id UUID PRIMARY KEY,
                jti UUID NOT NULL UNIQUE,
                kind token_kind NOT NULL,
                user_id UUID NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_revoked_tokens_expires ON revoked_tokens(expires_at);",
        )
        .execute(&self.db)
        .await?;

        // A revocation can name an account deleted concurrently; no foreign key
        sqlx::query(
            "ALTER TABLE revoked_tokens DROP CONSTRAINT IF EXISTS revoked_tokens_user_id_fkey;",
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS password_reset_tokens (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL REFERENCES users(id),
                token_hash VARCHAR(64) NOT NULL UNIQUE,
                expires_at TIMESTAMPTZ NOT NULL,
                is_used BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_password_reset_tokens_user ON password_reset_tokens(user_id);",
        )
        .execute(&self.db)
        .await?;

        tracing::info!("Account migrations completed successfully");
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn create_user(&self, user: NewUser) -> Result<User, AuthError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&self.db)
        .await?;

        Ok(user)
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn update_user(
        &self,
        user_id: Uuid,
        changes: UserChanges,
    ) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as(
            r#"
            UPDATE users SET
                username = COALESCE($2, username),
                email = COALESCE($3, email),
                password_hash = COALESCE($4, password_hash),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(changes.username)
        .bind(changes.email)
        .bind(changes.password_hash)
        .fetch_optional(&self.db)
        .await?;

        Ok(user)
    }

    async fn deactivate_user(&self, user_id: Uuid) -> Result<bool, AuthError> {
        let mut tx = self.db.begin().await?;

        let updated =
            sqlx::query("UPDATE users SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;

        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<bool, AuthError> {
        let mut tx = self.db.begin().await?;

        for table in ["refresh_tokens", "revoked_tokens", "password_reset_tokens"] {
            sqlx::query(&format!("DELETE FROM {} WHERE user_id = $1", table))
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }

        let deleted = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl TokenLedger for PgStore {
    async fn create_session(&self, session: &RefreshToken) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, jti, token_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(session.jti)
        .bind(&session.token_hash)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn find_session_by_jti(&self, jti: Uuid) -> Result<Option<RefreshToken>, AuthError> {
        let session = sqlx::query_as("SELECT * FROM refresh_tokens WHERE jti = $1")
            .bind(jti)
            .fetch_optional(&self.db)
            .await?;
        Ok(session)
    }

    async fn find_session(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<RefreshToken>, AuthError> {
        let session = sqlx::query_as("SELECT * FROM refresh_tokens WHERE id = $1 AND user_id = $2")
            .bind(session_id)
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(session)
    }

    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<RefreshToken>, AuthError> {
        let sessions = sqlx::query_as(
            "SELECT * FROM refresh_tokens WHERE user_id = $1 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(sessions)
    }

    async fn rotate_session(
        &self,
        retired: &RefreshToken,
        revocation: &RevokedToken,
        replacement: &RefreshToken,
    ) -> Result<bool, AuthError> {
        let mut tx = self.db.begin().await?;

        let deleted = sqlx::query("DELETE FROM refresh_tokens WHERE id = $1")
            .bind(retired.id)
            .execute(&mut *tx)
            .await?;

        // Someone else rotated or revoked it first
        if deleted.rows_affected() == 0 {
            return Ok(false);
        }

        insert_revocation(&mut tx, revocation).await?;

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, jti, token_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(replacement.id)
        .bind(replacement.user_id)
        .bind(replacement.jti)
        .bind(&replacement.token_hash)
        .bind(replacement.expires_at)
        .bind(replacement.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn revoke_session(
        &self,
        session: &RefreshToken,
        revocation: &RevokedToken,
    ) -> Result<bool, AuthError> {
        let mut tx = self.db.begin().await?;

        let deleted = sqlx::query("DELETE FROM refresh_tokens WHERE id = $1 AND user_id = $2")
            .bind(session.id)
            .bind(session.user_id)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            return Ok(false);
        }

        insert_revocation(&mut tx, revocation).await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn revoke_all_sessions(
        &self,
        user_id: Uuid,
        current: &RevokedToken,
    ) -> Result<u64, AuthError> {
        let mut tx = self.db.begin().await?;

        let deleted = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        insert_revocation(&mut tx, current).await?;

        tx.commit().await?;
        Ok(deleted.rows_affected())
    }

    async fn revoke_token(&self, revocation: &RevokedToken) -> Result<(), AuthError> {
        let mut tx = self.db.begin().await?;
        insert_revocation(&mut tx, revocation).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn is_revoked(&self, jti: Uuid, now: DateTime<Utc>) -> Result<bool, AuthError> {
        let revoked = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM revoked_tokens WHERE jti = $1 AND expires_at > $2)",
        )
        .bind(jti)
        .bind(now)
        .fetch_one(&self.db)
        .await?;

        Ok(revoked)
    }

    async fn sweep_expired_sessions(
        &self,
        now: DateTime<Utc>,
        retain_until: DateTime<Utc>,
    ) -> Result<u64, AuthError> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO revoked_tokens (id, jti, kind, user_id, expires_at, created_at)
            SELECT gen_random_uuid(), jti, 'refresh', user_id, $2, $1
            FROM refresh_tokens
            WHERE expires_at <= $1
            ON CONFLICT (jti) DO NOTHING
            "#,
        )
        .bind(now)
        .bind(retain_until)
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(deleted.rows_affected())
    }

    async fn purge_revocations(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let deleted = sqlx::query("DELETE FROM revoked_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.db)
            .await?;
        Ok(deleted.rows_affected())
    }
}

#[async_trait]
impl ResetLedger for PgStore {
    async fn issue_reset_token(&self, token: &PasswordResetToken) -> Result<(), AuthError> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM password_reset_tokens WHERE user_id = $1 AND is_used = FALSE")
            .bind(token.user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO password_reset_tokens (id, user_id, token_hash, expires_at, is_used, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.expires_at)
        .bind(token.is_used)
        .bind(token.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_reset_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<PasswordResetToken>, AuthError> {
        let token = sqlx::query_as("SELECT * FROM password_reset_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(&self.db)
            .await?;
        Ok(token)
    }

    async fn redeem_reset_token(
        &self,
        token: &PasswordResetToken,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AuthError> {
        let mut tx = self.db.begin().await?;

        let claimed = sqlx::query(
            r#"
            UPDATE password_reset_tokens SET is_used = TRUE
            WHERE id = $1 AND is_used = FALSE AND expires_at > $2
            "#,
        )
        .bind(token.id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            return Ok(false);
        }

        let updated =
            sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
                .bind(token.user_id)
                .bind(password_hash)
                .execute(&mut *tx)
                .await?;

        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(token.user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn purge_expired_reset_tokens(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let deleted = sqlx::query(
            "DELETE FROM password_reset_tokens WHERE expires_at <= $1 AND is_used = FALSE",
        )
        .bind(now)
        .execute(&self.db)
        .await?;
        Ok(deleted.rows_affected())
    }
}

async fn insert_revocation(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    revocation: &RevokedToken,
) -> Result<(), AuthError> {
    sqlx::query(
        r#"
        INSERT INTO revoked_tokens (id, jti, kind, user_id, expires_at, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (jti) DO NOTHING
        "#,
    )
    .bind(revocation.id)
    .bind(revocation.jti)
    .bind(revocation.kind)
    .bind(revocation.user_id)
    .bind(revocation.expires_at)
    .bind(revocation.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
