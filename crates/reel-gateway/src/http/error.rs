use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use reel_jobs::JobError;
use serde_json::json;
use tracing::error;

/// Error response body: `{"error": "...", "code": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "INVALID_REQUEST",
            message: message.into(),
        }
    }

    /// The run endpoint reports conflicts as 400, like a disabled job.
    pub fn for_run(err: JobError) -> Self {
        match err {
            JobError::Conflict(_) => Self {
                status: StatusCode::BAD_REQUEST,
                code: err.code(),
                message: err.to_string(),
            },
            other => other.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        let status = match &err {
            JobError::NotFound { .. } => StatusCode::NOT_FOUND,
            JobError::Conflict(_) => StatusCode::CONFLICT,
            JobError::InvalidConfig(_) | JobError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            JobError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
            JobError::Database(_) | JobError::Serialization(_) => {
                error!(error = %err, "internal error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({"error": self.message, "code": self.code})),
        )
            .into_response()
    }
}
