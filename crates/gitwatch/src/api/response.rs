use axum::http::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;

pub mod messages {
    pub const NOT_FOUND: &str = "Resource not found.";
    pub const SOMETHING_WENT_WRONG: &str = "Something went wrong, please try again.";
    pub const INVALID_REQUEST: &str = "Invalid request.";
    pub const REQUEST_CANCELLED: &str = "Request cancelled.";
}

/// JSON envelope shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub status: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Vec<String>>,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            status: true,
            message: message.into(),
            data,
            error: None,
        }
    }

    pub fn fail(message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            status: false,
            message: message.into(),
            data,
            error: None,
        }
    }
}

/// Map a service failure onto a status code and a user-safe envelope.
/// Internal detail goes to the log, never to the client.
pub fn error_response(err: &Error) -> (StatusCode, ApiResponse) {
    match err {
        Error::Validation(fields) => (
            StatusCode::BAD_REQUEST,
            ApiResponse::fail(
                messages::INVALID_REQUEST,
                serde_json::to_value(fields).ok(),
            ),
        ),
        Error::NotFound(_) => (
            StatusCode::NOT_FOUND,
            ApiResponse::fail(messages::NOT_FOUND, None),
        ),
        Error::AlreadyMonitored { owner, name } => (
            StatusCode::CONFLICT,
            ApiResponse::fail(
                format!("Repository named {owner}/{name} is been monitored already."),
                None,
            ),
        ),
        Error::Cancelled => (
            StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            ApiResponse::fail(messages::REQUEST_CANCELLED, None),
        ),
        other => {
            log::error!("request failed: {other}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiResponse::fail(messages::SOMETHING_WENT_WRONG, None),
            )
        }
    }
}
