use axum::{extract::State, response::IntoResponse};
use service_core::{error::AppError, response::ApiResponse};

use crate::{middleware::AuthUser, AppState};

/// Profile of the authenticated user
#[utoipa::path(
    get,
    path = "/users/me",
    responses(
        (status = 200, description = "Current user profile", body = crate::dtos::EnvelopeSchema),
        (status = 401, description = "Missing or invalid access token", body = crate::dtos::EnvelopeSchema),
        (status = 404, description = "User not found", body = crate::dtos::EnvelopeSchema)
    ),
    tag = "User",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let profile = state.auth.current_user(user.user_id()?).await?;
    Ok(ApiResponse::ok(profile, "User profile retrieved"))
}
