//! Expiry Sweep
//!
//! Periodic cleanup of expired records. Safe to run at any time and any
//! number of times; a second run right after a first one removes nothing.

use crate::error::AuthError;
use crate::store::AccountStore;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Counts of records touched by one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub revocations_purged: u64,
    pub sessions_expired: u64,
    pub reset_tokens_removed: u64,
}

pub struct ExpirySweeper {
    store: Arc<dyn AccountStore>,
    leeway: Duration,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn AccountStore>, leeway: Duration) -> Self {
        Self { store, leeway }
    }

    /// Purge dead blocklist entries, retire expired sessions into the
    /// blocklist, then drop reset tokens that expired unused.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<SweepReport, AuthError> {
        let revocations_purged = self.store.purge_revocations(now).await?;
        let sessions_expired = self
            .store
            .sweep_expired_sessions(now, now + self.leeway)
            .await?;
        let reset_tokens_removed = self.store.purge_expired_reset_tokens(now).await?;

        let report = SweepReport {
            revocations_purged,
            sessions_expired,
            reset_tokens_removed,
        };

        tracing::info!(
            revocations_purged,
            sessions_expired,
            reset_tokens_removed,
            "Expiry sweep finished"
        );

        Ok(report)
    }
}
