//! Account Error Types
//!
//! Centralized error handling for all account and session operations.
//! Every failure is reported as `{"error": <code>, "message": <text>}`.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// Coarse failure category, one per HTTP status the API can return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    Unauthorized,
    Forbidden,
    NotFound,
    Internal,
}

impl ErrorKind {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Account service errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Account is deactivated")]
    AccountDeactivated,

    #[error("Authentication required")]
    MissingToken,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Token has been revoked")]
    TokenRevoked,

    #[error("Current password is incorrect")]
    IncorrectPassword,

    #[error("Invalid or expired reset token")]
    InvalidResetToken,

    #[error("User not found")]
    UserNotFound,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Username already exists")]
    UsernameExists,

    #[error("Email already exists")]
    EmailExists,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error")]
    Internal,
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Validation(_) | AuthError::InvalidResetToken => ErrorKind::Validation,
            AuthError::UsernameExists | AuthError::EmailExists => ErrorKind::Conflict,
            AuthError::InvalidCredentials
            | AuthError::MissingToken
            | AuthError::InvalidToken
            | AuthError::TokenRevoked
            | AuthError::IncorrectPassword => ErrorKind::Unauthorized,
            AuthError::AccountDeactivated => ErrorKind::Forbidden,
            AuthError::UserNotFound | AuthError::SessionNotFound => ErrorKind::NotFound,
            AuthError::Database(_) | AuthError::Config(_) | AuthError::Internal => {
                ErrorKind::Internal
            }
        }
    }

    /// Machine-stable error code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::AccountDeactivated => "account_deactivated",
            AuthError::MissingToken => "unauthorized",
            AuthError::InvalidToken | AuthError::TokenRevoked => "invalid_token",
            AuthError::IncorrectPassword => "incorrect_password",
            AuthError::InvalidResetToken => "invalid_reset_token",
            AuthError::UserNotFound => "user_not_found",
            AuthError::SessionNotFound => "session_not_found",
            AuthError::UsernameExists => "username_exists",
            AuthError::EmailExists => "email_exists",
            AuthError::Validation(_) => "validation_error",
            AuthError::Config(_) => "configuration_error",
            AuthError::Database(_) | AuthError::Internal => "internal_error",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match &self {
            AuthError::Validation(msg) => msg.clone(),
            AuthError::Database(_) | AuthError::Config(_) | AuthError::Internal => {
                "An internal error occurred".to_string()
            }
            _ => self.to_string(),
        };

        (
            self.kind().status(),
            Json(serde_json::json!({
                "error": self.code(),
                "message": message
            })),
        )
            .into_response()
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                match db_err.constraint() {
                    Some(name) if name.contains("username") => return AuthError::UsernameExists,
                    Some(name) if name.contains("email") => return AuthError::EmailExists,
                    _ => {}
                }
            }
        }

        tracing::error!("Database error: {:?}", err);
        AuthError::Database(err.to_string())
    }
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(err: argon2::password_hash::Error) -> Self {
        tracing::error!("Password hashing error: {:?}", err);
        AuthError::Internal
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        tracing::debug!("JWT error: {:?}", err);
        AuthError::InvalidToken
    }
}

impl From<JsonRejection> for AuthError {
    fn from(rejection: JsonRejection) -> Self {
        AuthError::Validation(rejection.body_text())
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AuthError::Validation(errors.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AuthError::Validation("x".into()).kind().status(), StatusCode::BAD_REQUEST);
        assert_eq!(AuthError::InvalidResetToken.kind().status(), StatusCode::BAD_REQUEST);
        assert_eq!(AuthError::EmailExists.kind().status(), StatusCode::CONFLICT);
        assert_eq!(AuthError::TokenRevoked.kind().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::IncorrectPassword.kind().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::AccountDeactivated.kind().status(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::SessionNotFound.kind().status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AuthError::Database("boom".into()).kind().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_internal_errors_hide_details() {
        let response = AuthError::Database("relation users does not exist".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "internal_error");
        assert_eq!(json["message"], "An internal error occurred");
    }
}
