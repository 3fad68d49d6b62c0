//! Uniform `{status_code, message, payload}` response envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Envelope wrapped around every JSON body the services return.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub status_code: u16,
    pub message: String,
    pub payload: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(status: StatusCode, message: impl Into<String>, payload: Option<T>) -> Self {
        Self {
            status_code: status.as_u16(),
            message: message.into(),
            payload,
        }
    }

    /// 200 with a payload.
    pub fn ok(payload: T, message: impl Into<String>) -> Self {
        Self::new(StatusCode::OK, message, Some(payload))
    }
}

impl ApiResponse<()> {
    /// 200 without a payload.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(StatusCode::OK, message, None)
    }

    /// 201 without a payload.
    pub fn created(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CREATED, message, None)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}
