use axum::{
    Json,
    extract::multipart::{MultipartError, MultipartRejection},
    extract::rejection::{BytesRejection, JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{debug, error};

/// Failure kinds surfaced by every component. Converted to a fixed status and a
/// generic message at the response boundary; nothing internal reaches the client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("refresh token is no longer valid")]
    StaleRefreshToken,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream failure: {0:#}")]
    Upstream(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status_code: u16,
    pub error: &'static str,
    pub message: String,
    pub success: bool,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::InvalidCredentials
            | ApiError::Unauthenticated
            | ApiError::StaleRefreshToken => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::InvalidCredentials => "INVALID_CREDENTIALS",
            ApiError::Unauthenticated => "UNAUTHENTICATED",
            ApiError::StaleRefreshToken => "STALE_REFRESH_TOKEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Upstream(_) => "UPSTREAM_FAILURE",
        }
    }

    fn client_message(&self) -> String {
        match self {
            ApiError::Validation(message) | ApiError::Conflict(message) => message.clone(),
            ApiError::InvalidCredentials => "Invalid credentials".to_string(),
            ApiError::Unauthenticated => "Unauthorized".to_string(),
            ApiError::StaleRefreshToken => "Refresh token is expired or used".to_string(),
            ApiError::NotFound(what) => format!("{what} not found"),
            ApiError::Upstream(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Upstream(e) = &self {
            error!("Upstream failure: {:?}", e);
        }

        let status = self.status();
        let body = ErrorBody {
            status_code: status.as_u16(),
            error: self.code(),
            message: self.client_message(),
            success: false,
        };
        (status, Json(body)).into_response()
    }
}

// Extractor rejections carry serde and parser details; those are logged, and
// the client gets a fixed message in the usual envelope.

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        debug!("Rejected JSON body: {}", rejection.body_text());
        ApiError::Validation("Request body must be valid JSON with the expected fields".into())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        debug!("Rejected path parameter: {}", rejection.body_text());
        ApiError::Validation("Invalid path parameter".into())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        debug!("Rejected multipart request: {}", rejection.body_text());
        ApiError::Validation("Request must be a multipart form".into())
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        debug!("Malformed multipart form: {}", e.body_text());
        ApiError::Validation("Malformed multipart form".into())
    }
}

impl From<BytesRejection> for ApiError {
    fn from(rejection: BytesRejection) -> Self {
        debug!("Rejected request body: {}", rejection.body_text());
        ApiError::Validation("Request body could not be read".into())
    }
}

/// Run blocking work (SQLite, Argon2) off the async runtime.
pub async fn run_blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Upstream(anyhow::anyhow!("spawn_blocking join error: {}", e)))?
}
