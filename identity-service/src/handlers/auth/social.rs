use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect},
};
use service_core::error::AppError;

use crate::{
    dtos::auth::GoogleCallbackQuery,
    services::GoogleLoginOutcome,
    AppState,
};

/// Start Google sign-in
#[utoipa::path(
    get,
    path = "/auth/google",
    responses(
        (status = 303, description = "Redirect to the Google consent page"),
        (status = 500, description = "Internal server error", body = crate::dtos::EnvelopeSchema)
    ),
    tag = "Authentication"
)]
pub async fn google_login(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let url = state.auth.google_login().await?;
    Ok(Redirect::to(&url))
}

/// Google redirect target; forwards the issued tokens to the frontend
#[utoipa::path(
    get,
    path = "/auth/google/callback",
    params(GoogleCallbackQuery),
    responses(
        (status = 303, description = "Redirect to the frontend with tokens"),
        (status = 400, description = "Missing authorization code", body = crate::dtos::EnvelopeSchema),
        (status = 401, description = "OAuth state invalid", body = crate::dtos::EnvelopeSchema),
        (status = 500, description = "Google login failed", body = crate::dtos::EnvelopeSchema)
    ),
    tag = "Authentication"
)]
pub async fn google_callback(
    State(state): State<AppState>,
    Query(query): Query<GoogleCallbackQuery>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.auth.google_callback(query).await?;
    Ok(Redirect::to(&frontend_redirect(
        &state.frontend_redirect_url,
        &outcome,
    )))
}

fn frontend_redirect(base: &str, outcome: &GoogleLoginOutcome) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!(
        "{}{}access_token={}&refresh_token={}&is_new_user={}",
        base,
        separator,
        urlencoding::encode(&outcome.tokens.access_token),
        urlencoding::encode(&outcome.tokens.refresh_token),
        outcome.is_new_user
    )
}
