//! Account Service Configuration
//!
//! All configuration values are loaded from environment variables.
//! No hardcoded secrets or sensitive data.

use crate::error::AuthError;
use std::env;
use std::str::FromStr;

/// Account service configuration loaded from environment
#[derive(Debug, Clone)]
pub struct AccountsConfig {
    /// JWT secret key for signing tokens (from JWT_SECRET env var)
    pub jwt_secret: String,

    /// Access token lifetime in seconds (from JWT_ACCESS_EXPIRATION env var)
    pub access_token_expiration: i64,

    /// Refresh token lifetime in seconds (from JWT_REFRESH_EXPIRATION env var)
    pub refresh_token_expiration: i64,

    /// JWT issuer (from JWT_ISSUER env var)
    pub jwt_issuer: String,

    /// JWT audience (from JWT_AUDIENCE env var)
    pub jwt_audience: String,

    /// Clock skew tolerated when validating `exp`, in seconds (from JWT_LEEWAY env var).
    /// Blocklist entries outlive their token by the same amount.
    pub jwt_leeway: u64,

    /// Password reset token lifetime in seconds (from PASSWORD_RESET_EXPIRATION env var)
    pub password_reset_expiration: i64,

    /// Link the reset token is appended to (from PASSWORD_RESET_URL env var)
    pub password_reset_url: String,

    /// Argon2 memory cost in KiB (from ARGON2_MEMORY_COST env var)
    pub argon2_memory_cost: u32,

    /// Argon2 time cost (iterations) (from ARGON2_TIME_COST env var)
    pub argon2_time_cost: u32,

    /// Argon2 parallelism (from ARGON2_PARALLELISM env var)
    pub argon2_parallelism: u32,

    /// PostgreSQL connection string (from DATABASE_URL env var)
    pub database_url: String,

    /// Pool size (from DATABASE_MAX_CONNECTIONS env var)
    pub database_max_connections: u32,

    /// Listen address for the HTTP server (from BIND_ADDRESS env var)
    pub bind_address: String,
}

/// Longest token or reset-link lifetime accepted, in seconds (10 years)
pub const MAX_LIFETIME_SECS: i64 = 315_360_000;

/// Largest clock skew tolerance accepted, in seconds
pub const MAX_LEEWAY_SECS: u64 = 3600;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn required(key: &str) -> Result<String, AuthError> {
    env::var(key).map_err(|_| AuthError::Config(format!("{} environment variable must be set", key)))
}

impl AccountsConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AuthError> {
        Ok(Self {
            jwt_secret: required("JWT_SECRET")?,
            access_token_expiration: env_or("JWT_ACCESS_EXPIRATION", 3600), // 1 hour
            refresh_token_expiration: env_or("JWT_REFRESH_EXPIRATION", 2_592_000), // 30 days
            jwt_issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "rustpress".to_string()),
            jwt_audience: env::var("JWT_AUDIENCE")
                .unwrap_or_else(|_| "rustpress-accounts".to_string()),
            jwt_leeway: env_or("JWT_LEEWAY", 60),
            password_reset_expiration: env_or("PASSWORD_RESET_EXPIRATION", 86_400), // 24 hours
            password_reset_url: env::var("PASSWORD_RESET_URL")
                .unwrap_or_else(|_| "http://localhost:5011/reset-password".to_string()),
            argon2_memory_cost: env_or("ARGON2_MEMORY_COST", 65536), // 64 MiB
            argon2_time_cost: env_or("ARGON2_TIME_COST", 3),
            argon2_parallelism: env_or("ARGON2_PARALLELISM", 4),
            database_url: required("DATABASE_URL")?,
            database_max_connections: env_or("DATABASE_MAX_CONNECTIONS", 5),
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:5000".to_string()),
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.jwt_secret.len() < 32 {
            return Err(AuthError::Config(
                "JWT_SECRET must be at least 32 characters".to_string(),
            ));
        }

        if self.access_token_expiration <= 0 {
            return Err(AuthError::Config(
                "JWT_ACCESS_EXPIRATION must be positive".to_string(),
            ));
        }

        if self.refresh_token_expiration <= self.access_token_expiration {
            return Err(AuthError::Config(
                "JWT_REFRESH_EXPIRATION must be greater than JWT_ACCESS_EXPIRATION".to_string(),
            ));
        }

        if self.password_reset_expiration <= 0 {
            return Err(AuthError::Config(
                "PASSWORD_RESET_EXPIRATION must be positive".to_string(),
            ));
        }

        for (name, value) in [
            ("JWT_ACCESS_EXPIRATION", self.access_token_expiration),
            ("JWT_REFRESH_EXPIRATION", self.refresh_token_expiration),
            ("PASSWORD_RESET_EXPIRATION", self.password_reset_expiration),
        ] {
            if value > MAX_LIFETIME_SECS {
                return Err(AuthError::Config(format!(
                    "{} must not exceed {} seconds",
                    name, MAX_LIFETIME_SECS
                )));
            }
        }

        if self.jwt_leeway > MAX_LEEWAY_SECS {
            return Err(AuthError::Config(format!(
                "JWT_LEEWAY must not exceed {} seconds",
                MAX_LEEWAY_SECS
            )));
        }

        if self.database_max_connections == 0 {
            return Err(AuthError::Config(
                "DATABASE_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
