use service_core::error::AppError;
use thiserror::Error;

use super::database::StoreError;
use super::jwt::TokenError;

/// Failures surfaced by the auth orchestrator. Display strings for the
/// client-facing variants are the exact messages returned over HTTP.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("Email already exists")]
    EmailAlreadyRegistered,

    #[error("User not found")]
    UserNotFound,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Invalid or expired OTP")]
    InvalidOrExpiredOtp,

    #[error("OAuth state invalid")]
    OAuthStateInvalid,

    #[error("OAuth login failed: {0}")]
    OAuthFailure(anyhow::Error),

    #[error("Invalid or expired refresh token")]
    InvalidRefreshToken,

    #[error("Failed to deliver email: {0}")]
    EmailDelivery(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

// Conflicts the orchestrator expects are matched before `?` reaches these.
impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(constraint) => {
                ServiceError::Internal(anyhow::anyhow!("unexpected conflict on {}", constraint))
            }
            StoreError::Backend(e) => ServiceError::Internal(e),
        }
    }
}

impl From<TokenError> for ServiceError {
    fn from(err: TokenError) -> Self {
        ServiceError::Internal(anyhow::anyhow!(err))
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            e @ ServiceError::EmailAlreadyRegistered => {
                AppError::Conflict(anyhow::anyhow!(e.to_string()))
            }
            e @ ServiceError::UserNotFound => AppError::NotFound(anyhow::anyhow!(e.to_string())),
            e @ (ServiceError::InvalidCredentials
            | ServiceError::InvalidOrExpiredOtp
            | ServiceError::OAuthStateInvalid
            | ServiceError::InvalidRefreshToken) => {
                AppError::Unauthorized(anyhow::anyhow!(e.to_string()))
            }
            ServiceError::OAuthFailure(e) => {
                AppError::InternalError(e.context("Google OAuth exchange failed"))
            }
            ServiceError::EmailDelivery(msg) => {
                AppError::InternalError(anyhow::anyhow!("Email delivery failed: {}", msg))
            }
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}
