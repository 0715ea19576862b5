//! Outgoing Notifications
//!
//! Delivery of password reset tokens. The core only hands the token over;
//! delivery is best-effort and failures never reach the caller.

use crate::error::AuthError;

use async_trait::async_trait;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_password_reset_email(&self, address: &str, token: &str) -> Result<(), AuthError>;
}

/// Development notifier that writes the reset link to the log instead of sending mail
pub struct LogNotifier {
    reset_url: String,
}

impl LogNotifier {
    pub fn new(reset_url: impl Into<String>) -> Self {
        Self {
            reset_url: reset_url.into(),
        }
    }

    pub fn reset_link(&self, token: &str) -> String {
        format!("{}?token={}", self.reset_url, token)
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_password_reset_email(&self, address: &str, token: &str) -> Result<(), AuthError> {
        tracing::info!(
            email = %address,
            reset_link = %self.reset_link(token),
            "Password reset link generated"
        );
        Ok(())
    }
}
