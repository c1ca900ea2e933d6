//! The `{success, message}` envelope every non-receive response is wrapped in.
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct Envelope {
    /// True for 2xx and 3xx responses.
    pub success: bool,
    /// Send outcomes on success, a description of the failure otherwise.
    #[schema(value_type = Object)]
    pub message: Value,
}

impl Envelope {
    pub fn new(status: StatusCode, message: impl Into<Value>) -> Self {
        Self {
            success: status.is_success() || status.is_redirection(),
            message: message.into(),
        }
    }
}

pub fn respond(status: StatusCode, message: impl Into<Value>) -> Response {
    (status, Json(Envelope::new(status, message))).into_response()
}
