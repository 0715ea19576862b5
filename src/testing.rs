//! Shared test fixtures

use crate::config::AccountsConfig;
use crate::error::AuthError;
use crate::handlers::AppState;
use crate::notify::Notifier;
use crate::service::{AuthService, ExpirySweeper, ProfileService};
use crate::store::MemoryStore;
use crate::build_state;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Configuration with cheap Argon2 parameters
pub fn test_config() -> AccountsConfig {
    AccountsConfig {
        jwt_secret: "a".repeat(32),
        access_token_expiration: 3600,
        refresh_token_expiration: 2_592_000,
        jwt_issuer: "rustpress".to_string(),
        jwt_audience: "rustpress-accounts".to_string(),
        jwt_leeway: 60,
        password_reset_expiration: 86_400,
        password_reset_url: "http://localhost:5011/reset-password".to_string(),
        argon2_memory_cost: 1024,
        argon2_time_cost: 1,
        argon2_parallelism: 1,
        database_url: "postgres://localhost/test".to_string(),
        database_max_connections: 5,
        bind_address: "127.0.0.1:0".to_string(),
    }
}

/// Captures reset tokens instead of delivering them
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub async fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }

    pub async fn last(&self) -> Option<(String, String)> {
        self.sent.lock().await.last().cloned()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_password_reset_email(&self, address: &str, token: &str) -> Result<(), AuthError> {
        self.sent
            .lock()
            .await
            .push((address.to_string(), token.to_string()));
        Ok(())
    }
}

/// Services wired over an in-memory store
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub auth: Arc<AuthService>,
    pub profiles: Arc<ProfileService>,
    pub sweeper: Arc<ExpirySweeper>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());

        let state = build_state(&test_config(), store.clone(), notifier.clone())
            .expect("test config is valid");

        Self {
            store,
            notifier,
            auth: state.auth,
            profiles: state.profiles,
            sweeper: state.sweeper,
        }
    }

    pub fn state(&self) -> AppState {
        AppState {
            auth: self.auth.clone(),
            profiles: self.profiles.clone(),
            sweeper: self.sweeper.clone(),
        }
    }
}
