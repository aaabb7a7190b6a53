use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Error taxonomy shared by the storage layer, the upstream clients and the
/// HTTP handlers. The `IntoResponse` impl is the catch-all: anything that
/// bubbles out of a handler becomes a JSON envelope, with full detail kept
/// server-side for the 500-class variants.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    NotFound(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("upstream request failed: {0}")]
    Upstream(String),
    #[error("image backend reported a failure: {0}")]
    UpstreamModel(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Storage(_) | ApiError::Upstream(_) | ApiError::UpstreamModel(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to hand to the client. Upstream and storage detail stays
    /// in the log.
    fn client_message(&self) -> String {
        match self {
            ApiError::InvalidArgument(message) | ApiError::NotFound(message) => message.clone(),
            ApiError::Storage(_) | ApiError::Upstream(_) | ApiError::UpstreamModel(_) => {
                "An unexpected error occurred".to_string()
            }
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Upstream(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }
        let body = Json(ErrorResponse {
            error: self.client_message(),
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_taxonomy() {
        assert_eq!(
            ApiError::InvalidArgument("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::NotFound("gone".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Storage("disk".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::Upstream("llm".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::UpstreamModel("model".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn server_errors_are_sanitized() {
        let err = ApiError::Upstream("token leaked-secret rejected".into());
        assert_eq!(err.client_message(), "An unexpected error occurred");

        let err = ApiError::InvalidArgument("Prompt is required".into());
        assert_eq!(err.client_message(), "Prompt is required");
    }
}
