use axum::{extract::State, response::IntoResponse};
use service_core::{error::AppError, response::ApiResponse};

use super::{REGISTER_SUCCESS, RESEND_OTP_SUCCESS, VERIFY_OTP_SUCCESS};
use crate::{
    dtos::auth::{RegisterRequest, ResendOtpRequest, VerifyOtpRequest},
    utils::ValidatedJson,
    AppState,
};

/// Register with email and password; an OTP is emailed for verification
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered, OTP sent", body = crate::dtos::EnvelopeSchema),
        (status = 400, description = "Validation error", body = crate::dtos::EnvelopeSchema),
        (status = 409, description = "Email already exists", body = crate::dtos::EnvelopeSchema),
        (status = 429, description = "Too many requests", body = crate::dtos::EnvelopeSchema),
        (status = 500, description = "Internal server error", body = crate::dtos::EnvelopeSchema)
    ),
    tag = "Authentication"
)]
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth
        .register(&req.name, &req.email, &req.password)
        .await?;
    Ok(ApiResponse::created(REGISTER_SUCCESS))
}

/// Verify the emailed OTP and receive a token pair
#[utoipa::path(
    post,
    path = "/auth/verify-otp",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Verification successful", body = crate::dtos::EnvelopeSchema),
        (status = 400, description = "Validation error", body = crate::dtos::EnvelopeSchema),
        (status = 401, description = "Invalid or expired OTP", body = crate::dtos::EnvelopeSchema),
        (status = 500, description = "Internal server error", body = crate::dtos::EnvelopeSchema)
    ),
    tag = "Authentication"
)]
pub async fn verify_otp(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<VerifyOtpRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tokens = state.auth.verify_otp(&req.email, &req.otp).await?;
    Ok(ApiResponse::ok(tokens, VERIFY_OTP_SUCCESS))
}

/// Send a fresh OTP to an account awaiting verification
#[utoipa::path(
    post,
    path = "/auth/resend-otp",
    request_body = ResendOtpRequest,
    responses(
        (status = 200, description = "Request accepted", body = crate::dtos::EnvelopeSchema),
        (status = 400, description = "Validation error", body = crate::dtos::EnvelopeSchema),
        (status = 429, description = "Too many requests", body = crate::dtos::EnvelopeSchema),
        (status = 500, description = "Internal server error", body = crate::dtos::EnvelopeSchema)
    ),
    tag = "Authentication"
)]
pub async fn resend_otp(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ResendOtpRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.auth.resend_otp(&req.email).await?;
    Ok(ApiResponse::message(RESEND_OTP_SUCCESS))
}
