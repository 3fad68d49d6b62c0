pub mod auth;

use serde::Serialize;
use utoipa::ToSchema;

/// Shape of every JSON response body, for the OpenAPI document.
#[derive(Debug, Serialize, ToSchema)]
pub struct EnvelopeSchema {
    #[schema(example = 200)]
    pub status_code: u16,
    #[schema(example = "Login successful")]
    pub message: String,
    #[schema(value_type = Object, nullable = true)]
    pub payload: Option<serde_json::Value>,
}
