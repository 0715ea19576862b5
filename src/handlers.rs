//! Account HTTP Handlers
//!
//! REST API endpoints for registration, sessions, password reset and
//! profile management.

use crate::error::AuthError;
use crate::extractors::{AuthUser, BearerToken};
use crate::middleware;
use crate::models::*;
use crate::service::{AuthService, ExpirySweeper, ProfileService};

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    middleware as axum_middleware,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use std::sync::Arc;
use validator::Validate;

/// Services shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub profiles: Arc<ProfileService>,
    pub sweeper: Arc<ExpirySweeper>,
}

// ============================================
// Route Builder
// ============================================

/// Create account routes
pub fn create_routes(state: AppState) -> Router {
    // Public routes (no access token required)
    let public = Router::new()
        .route("/", get(health))
        .route("/api/register", post(register))
        .route("/api/login", post(login))
        .route("/api/refresh", post(refresh))
        .route("/api/password-reset-request", post(request_password_reset))
        .route("/password-reset", post(reset_password));

    // Protected routes (require a valid access token)
    let protected = Router::new()
        .route("/api/logout", post(logout))
        .route("/api/logout-all", post(logout_all))
        .route(
            "/api/me",
            get(get_profile).put(update_profile).delete(deactivate),
        )
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/:session_id", delete(revoke_session))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    Router::new().merge(public).merge(protected).with_state(state)
}

/// GET /
pub async fn health() -> impl IntoResponse {
    Json(MessageResponse::new("API is running"))
}

// ============================================
// Registration
// ============================================

/// POST /api/register
pub async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AuthError> {
    let Json(req) = body?;
    req.validate()?;

    let user = state.auth.register(req).await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "User registered successfully",
            "user": PublicUser::from(&user),
        })),
    ))
}

// ============================================
// Login / Logout
// ============================================

/// POST /api/login
pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AuthError> {
    let Json(req) = body?;
    req.validate()?;

    let response = state.auth.login(req).await?;

    Ok(Json(response))
}

/// POST /api/refresh
///
/// Exchange the refresh token in the Authorization header for a new pair
pub async fn refresh(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
) -> Result<impl IntoResponse, AuthError> {
    let response = state.auth.refresh(&token).await?;

    Ok(Json(response))
}

/// POST /api/logout
pub async fn logout(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AuthError> {
    state.auth.logout(&user.claims).await?;

    Ok(Json(MessageResponse::new("Successfully logged out")))
}

/// POST /api/logout-all
pub async fn logout_all(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AuthError> {
    state.auth.logout_all(&user.claims).await?;

    Ok(Json(MessageResponse::new(
        "Successfully logged out from all devices",
    )))
}

// ============================================
// Password Reset
// ============================================

/// POST /api/password-reset-request
pub async fn request_password_reset(
    State(state): State<AppState>,
    body: Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AuthError> {
    let Json(req) = body?;
    req.validate()?;

    let response = state.auth.request_password_reset(&req.email).await?;

    Ok(Json(response))
}

/// POST /password-reset
pub async fn reset_password(
    State(state): State<AppState>,
    body: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AuthError> {
    let Json(req) = body?;
    req.validate()?;

    state.auth.complete_password_reset(req).await?;

    Ok(Json(MessageResponse::new(
        "Password has been reset successfully",
    )))
}

// ============================================
// Profile
// ============================================

/// GET /api/me
pub async fn get_profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AuthError> {
    let profile = state.profiles.get_profile(user.id).await?;

    Ok(Json(profile))
}

/// PUT /api/me
pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    body: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AuthError> {
    let Json(req) = body?;
    req.validate()?;

    let profile = state.profiles.update_profile(user.id, req).await?;

    Ok(Json(serde_json::json!({
        "message": "Profile updated successfully",
        "user": profile,
    })))
}

/// DELETE /api/me
///
/// Deactivates the account; the record is kept
pub async fn deactivate(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AuthError> {
    state.profiles.deactivate(user.id).await?;

    Ok(Json(MessageResponse::new("Account deactivated successfully")))
}

// ============================================
// Sessions
// ============================================

/// GET /api/sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AuthError> {
    let sessions = state.profiles.list_sessions(user.id).await?;

    Ok(Json(sessions))
}

/// DELETE /api/sessions/:session_id
pub async fn revoke_session(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AuthError> {
    state.profiles.revoke_session(user.id, &session_id).await?;

    Ok(Json(MessageResponse::new("Session revoked successfully")))
}
