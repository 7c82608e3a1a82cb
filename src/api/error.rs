//! HTTP error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::{StoreError, TaskError};

pub type ApiResult<T> = Result<T, ApiError>;

/// Error rendered as `{"error": message}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        if e.is_not_found() {
            Self::not_found(e.to_string())
        } else {
            tracing::error!(error = %e, "Store failure");
            Self::internal(e.to_string())
        }
    }
}

impl From<TaskError> for ApiError {
    fn from(e: TaskError) -> Self {
        match e {
            TaskError::NotFound { .. } => Self::not_found(e.to_string()),
            TaskError::Conflict { .. }
            | TaskError::InvalidFlow { .. }
            | TaskError::InvalidTransition { .. } => Self::conflict(e.to_string()),
            _ => Self::internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn store_not_found_is_404() {
        let e: ApiError = StoreError::NotFound {
            entity: "task".to_string(),
            id: "x".to_string(),
        }
        .into();
        assert_eq!(e.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn backend_failure_is_500() {
        let e: ApiError = StoreError::Backend("down".to_string()).into();
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn invalid_flow_is_409() {
        let e: ApiError = TaskError::InvalidFlow {
            id: Uuid::new_v4(),
            reason: "no asset".to_string(),
        }
        .into();
        assert_eq!(e.status, StatusCode::CONFLICT);
    }
}
