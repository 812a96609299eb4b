use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fieldsync_core::sync::ErrorBody;
use fieldsync_core::{RemoteError, StoredRecord};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// Base version is behind the stored version
    #[error("Version conflict on {}", .0.key())]
    Conflict(Box<StoredRecord>),
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Rejected { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::UNPROCESSABLE_ENTITY)
            }
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<RemoteError> for AppError {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Conflict(current) => Self::Conflict(current),
            RemoteError::Rejected { status, message } => Self::Rejected { status, message },
            RemoteError::Unauthorized { message, .. } => Self::Unauthorized(message),
            RemoteError::Transient(message) => Self::Unavailable(message),
            RemoteError::Timeout => Self::Unavailable("store timed out".to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = self.to_string();
        let current = match self {
            Self::Conflict(current) => Some(*current),
            _ => None,
        };
        (status, Json(ErrorBody { error, current })).into_response()
    }
}
