//! JSON error responses

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use phoenix_crew::{Error, ErrorKind, Stage};
use serde::Serialize;

/// An [`Error`] on its way to the client
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: Error,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<Stage>,
}

impl ApiError {
    pub fn new(status: StatusCode, error: Error) -> Self {
        Self { status, error }
    }

    /// The session already has a run in flight
    pub fn conflict(session_id: &str) -> Self {
        Self::new(
            StatusCode::CONFLICT,
            Error::conflict(format!(
                "session '{}' already has a run in flight",
                session_id
            ))
            .with_operation("web::fix")
            .with_context("session", session_id),
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn error(&self) -> &Error {
        &self.error
    }
}

/// HTTP status for an error kind
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidArgument | ErrorKind::SerializationFailed => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict | ErrorKind::Cancelled => StatusCode::CONFLICT,
        ErrorKind::ConfigInvalid => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::StageTimeout | ErrorKind::ToolTimeout => StatusCode::GATEWAY_TIMEOUT,
        k if k.is_stage_error() => StatusCode::BAD_GATEWAY,
        ErrorKind::InferenceFailed
        | ErrorKind::AuthenticationFailed
        | ErrorKind::ProviderUnavailable
        | ErrorKind::RateLimited
        | ErrorKind::NetworkFailed
        | ErrorKind::ToolFailed => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self::new(status_for(error.kind()), error)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            Error::invalid_argument(rejection.body_text()).with_operation("web::fix"),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("{}", self.error);
        } else {
            tracing::debug!("{}", self.error);
        }
        let body = ErrorBody {
            error: self.error.message().to_string(),
            kind: self.error.kind().to_string(),
            stage: Stage::of(&self.error),
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::InvalidArgument), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::ConfigInvalid), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(ErrorKind::StageTimeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(ErrorKind::Conflict), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::Cancelled), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::StageFailed), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorKind::MalformedOutput), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorKind::RateLimited), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorKind::Unexpected), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_conflict_names_session() {
        let err = ApiError::conflict("abc");
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.error().kind(), ErrorKind::Conflict);
        assert_eq!(err.error().context_value("session"), Some("abc"));
    }
}
