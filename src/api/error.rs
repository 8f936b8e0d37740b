use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::db::DbError;
use crate::services::auth::AuthError;
use crate::services::imageresize::ResizeError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: u16,
    message: String,
}

impl ApiError {
    pub fn not_found(what: &str) -> Self {
        ApiError::NotFound(format!("{what} not found"))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        let body = ErrorBody {
            status: status.as_u16(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound => ApiError::NotFound("not found".to_string()),
            DbError::AlreadyExists => ApiError::Conflict("already exists".to_string()),
            DbError::Sqlx(e) => ApiError::Internal(format!("database error: {e}")),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials | AuthError::Disabled => {
                ApiError::Unauthorized(e.to_string())
            }
            AuthError::Db(e) => e.into(),
            e => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<ResizeError> for ApiError {
    fn from(e: ResizeError) -> Self {
        match e {
            ResizeError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ApiError::not_found("image")
            }
            e => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            ApiError::not_found("file")
        } else {
            ApiError::Internal(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::from(DbError::NotFound).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::from(DbError::AlreadyExists).status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::from(AuthError::InvalidCredentials).status(),
            StatusCode::UNAUTHORIZED
        );
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(ApiError::from(ResizeError::Io(io)).status(), StatusCode::NOT_FOUND);
    }
}
