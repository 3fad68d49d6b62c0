use axum::{extract::State, response::IntoResponse};
use service_core::{error::AppError, response::ApiResponse};

use super::{LOGIN_SUCCESS, LOGOUT_ALL_SUCCESS, LOGOUT_SUCCESS, REFRESH_SUCCESS};
use crate::{
    dtos::auth::{LoginRequest, LogoutAllResponse, RefreshTokenRequest},
    middleware::AuthUser,
    utils::ValidatedJson,
    AppState,
};

/// Login with email and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = crate::dtos::EnvelopeSchema),
        (status = 400, description = "Validation error", body = crate::dtos::EnvelopeSchema),
        (status = 401, description = "Invalid email or password", body = crate::dtos::EnvelopeSchema),
        (status = 429, description = "Too many requests", body = crate::dtos::EnvelopeSchema),
        (status = 500, description = "Internal server error", body = crate::dtos::EnvelopeSchema)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tokens = state
        .auth
        .login(&req.email, &req.password, req.remember_me)
        .await?;
    Ok(ApiResponse::ok(tokens, LOGIN_SUCCESS))
}

/// Rotate a refresh token into a new token pair
#[utoipa::path(
    post,
    path = "/auth/refresh-token",
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, description = "Token refresh successful", body = crate::dtos::EnvelopeSchema),
        (status = 401, description = "Invalid or expired refresh token", body = crate::dtos::EnvelopeSchema),
        (status = 500, description = "Internal server error", body = crate::dtos::EnvelopeSchema)
    ),
    tag = "Authentication"
)]
pub async fn refresh(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tokens = state.auth.refresh(&req.refresh_token).await?;
    Ok(ApiResponse::ok(tokens, REFRESH_SUCCESS))
}

/// Revoke one refresh token
#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, description = "Logout successful", body = crate::dtos::EnvelopeSchema),
        (status = 401, description = "Invalid or expired refresh token", body = crate::dtos::EnvelopeSchema),
        (status = 500, description = "Internal server error", body = crate::dtos::EnvelopeSchema)
    ),
    tag = "Authentication"
)]
pub async fn logout(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.auth.logout(&req.refresh_token).await?;
    Ok(ApiResponse::message(LOGOUT_SUCCESS))
}

/// Revoke every session of the authenticated user
#[utoipa::path(
    post,
    path = "/auth/logout-all",
    responses(
        (status = 200, description = "All sessions revoked", body = crate::dtos::EnvelopeSchema),
        (status = 401, description = "Missing or invalid access token", body = crate::dtos::EnvelopeSchema),
        (status = 500, description = "Internal server error", body = crate::dtos::EnvelopeSchema)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn logout_all(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let revoked = state.auth.logout_all(user.user_id()?).await?;
    Ok(ApiResponse::ok(
        LogoutAllResponse { revoked },
        LOGOUT_ALL_SUCCESS,
    ))
}
