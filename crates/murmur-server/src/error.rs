use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use murmur_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("You are not part of this conversation")]
    NotAMember,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unauthorized => ServerError::Unauthorized,
            StoreError::NotFound => ServerError::NotFound("record not found".into()),
            StoreError::Forbidden(msg) => ServerError::Forbidden(msg),
            StoreError::NotAMember => ServerError::NotAMember,
            StoreError::NotAGroup => {
                ServerError::BadRequest("not a group conversation".into())
            }
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Forbidden(_) | ServerError::NotAMember => {
                (StatusCode::FORBIDDEN, self.to_string())
            }
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
