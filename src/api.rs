use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::{generation::ProviderError, tasks::TaskError, workspace::WorkspaceError};

/// Error returned by every JSON endpoint, rendered as
/// `{"ok": false, "message": ...}` with a matching status code.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadGateway(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected ({}): {}", status.as_u16(), self);
        }

        (
            status,
            Json(json!({ "ok": false, "message": self.to_string() })),
        )
            .into_response()
    }
}

impl From<WorkspaceError> for ApiError {
    fn from(err: WorkspaceError) -> Self {
        match err {
            WorkspaceError::InvalidBucket(_)
            | WorkspaceError::PathEscape(_)
            | WorkspaceError::UnsupportedFile(_)
            | WorkspaceError::InvalidRequest(_)
            | WorkspaceError::ZipError(_) => ApiError::BadRequest(err.to_string()),
            WorkspaceError::NotFound(_) => ApiError::NotFound(err.to_string()),
            WorkspaceError::IoError(_)
            | WorkspaceError::ImageError(_)
            | WorkspaceError::JoinError(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::AlreadyRunning(_) => ApiError::Conflict(err.to_string()),
            TaskError::InvalidRequest(_) => ApiError::BadRequest(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Configuration(_) => ApiError::BadRequest(err.to_string()),
            _ => ApiError::BadGateway(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskSection;

    #[test]
    fn test_status_mapping() {
        let cases: Vec<(ApiError, StatusCode)> = vec![
            (
                WorkspaceError::PathEscape("../x".into()).into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                WorkspaceError::InvalidBucket("thumbs".into()).into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                WorkspaceError::NotFound("x.png".into()).into(),
                StatusCode::NOT_FOUND,
            ),
            (
                TaskError::AlreadyRunning(TaskSection::Download).into(),
                StatusCode::CONFLICT,
            ),
            (
                ProviderError::Service("quota".into()).into(),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ProviderError::Configuration("no key".into()).into(),
                StatusCode::BAD_REQUEST,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(err.status(), status, "{}", err);
        }
    }
}
