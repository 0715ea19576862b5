//! RustPress Accounts
//!
//! User account and session service for RustPress providing:
//! - User registration and login
//! - JWT access and refresh tokens with rotation on every refresh
//! - Token revocation through a jti blocklist
//! - Argon2id password hashing
//! - Password reset flow with single-use tokens
//! - Profile management and per-session revocation
//! - An expiry sweep for stale sessions, blocklist entries and reset tokens
//!
//! # Configuration
//!
//! All configuration is loaded from environment variables:
//! - `JWT_SECRET` - Secret key for signing JWTs (required, min 32 chars)
//! - `JWT_ACCESS_EXPIRATION` - Access token expiration in seconds (default: 3600)
//! - `JWT_REFRESH_EXPIRATION` - Refresh token expiration in seconds (default: 2592000)
//! - `JWT_ISSUER` - JWT issuer claim (default: "rustpress")
//! - `JWT_AUDIENCE` - JWT audience claim (default: "rustpress-accounts")
//! - `JWT_LEEWAY` - Tolerated clock skew in seconds (default: 60)
//! - `PASSWORD_RESET_EXPIRATION` - Reset token lifetime in seconds (default: 86400)
//! - `DATABASE_URL` - PostgreSQL connection string (required)
//!
//! # Usage
//!
//! ```rust,ignore
//! use rustpress_accounts::{build_state, create_routes, AccountsConfig, LogNotifier, PgStore};
//!
//! let config = AccountsConfig::from_env()?;
//! let store = PgStore::new(pool);
//! store.migrate().await?;
//!
//! let notifier = LogNotifier::new(config.password_reset_url.clone());
//! let state = build_state(&config, Arc::new(store), Arc::new(notifier))?;
//! let app = create_routes(state);
//! ```

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod notify;
pub mod password;
pub mod service;
pub mod store;
pub mod tokens;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::AccountsConfig;
pub use error::{AuthError, ErrorKind};
pub use extractors::{AuthUser, BearerToken};
pub use handlers::{create_routes, AppState};
pub use notify::{LogNotifier, Notifier};
pub use password::PasswordService;
pub use service::{AuthService, ExpirySweeper, ProfileService, SweepReport};
pub use store::{AccountStore, MemoryStore, PgStore};
pub use tokens::TokenIssuer;

use chrono::Duration;
use std::sync::Arc;

/// Wire the services over a store and notifier
pub fn build_state(
    config: &AccountsConfig,
    store: Arc<dyn AccountStore>,
    notifier: Arc<dyn Notifier>,
) -> Result<AppState, AuthError> {
    config.validate()?;

    let tokens = Arc::new(TokenIssuer::new(config));
    let passwords = Arc::new(PasswordService::new(config)?);
    let leeway = tokens.leeway();

    let auth = AuthService::new(
        store.clone(),
        tokens,
        passwords.clone(),
        notifier,
        Duration::seconds(config.password_reset_expiration),
    );

    Ok(AppState {
        auth: Arc::new(auth),
        profiles: Arc::new(ProfileService::new(store.clone(), passwords, leeway)),
        sweeper: Arc::new(ExpirySweeper::new(store, leeway)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_config, RecordingNotifier};

    #[test]
    fn test_build_state_rejects_invalid_config() {
        let mut config = test_config();
        config.jwt_secret = "short".to_string();

        let result = build_state(
            &config,
            Arc::new(MemoryStore::new()),
            Arc::new(RecordingNotifier::default()),
        );
        assert!(matches!(result, Err(AuthError::Config(_))));
    }

    #[test]
    fn test_build_state_with_valid_config() {
        let state = build_state(
            &test_config(),
            Arc::new(MemoryStore::new()),
            Arc::new(RecordingNotifier::default()),
        );
        assert!(state.is_ok());
    }
}
