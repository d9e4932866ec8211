use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use switchyard_core::SwitchyardError;
use tracing::error;

/// A [`SwitchyardError`] rendered as an HTTP response:
/// `{"error": <kind>, "message": <text>}`.
#[derive(Debug)]
pub struct ApiError(pub SwitchyardError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            SwitchyardError::NotFound(_) => StatusCode::NOT_FOUND,
            SwitchyardError::QueueFull(_) => StatusCode::TOO_MANY_REQUESTS,
            SwitchyardError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            SwitchyardError::ExecutionFailure(_) => StatusCode::BAD_GATEWAY,
            SwitchyardError::ValidationFailure(_) | SwitchyardError::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            SwitchyardError::Config(_) | SwitchyardError::Gateway(_) | SwitchyardError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<SwitchyardError> for ApiError {
    fn from(err: SwitchyardError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        let body = json!({ "error": self.0.kind(), "message": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
