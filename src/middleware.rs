//! Authentication Middleware
//!
//! Validates the access token on protected routes and stores its claims
//! in request extensions for the `AuthUser` extractor.

use crate::error::AuthError;
use crate::extractors::bearer_token;
use crate::handlers::AppState;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

/// Require a valid, non-revoked access token of an existing account
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = bearer_token(req.headers())?.to_string();

    let claims = state
        .auth
        .authorize_access(&token)
        .await
        .map_err(|e| {
            tracing::debug!("Access token rejected: {}", e);
            e
        })?;

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}
