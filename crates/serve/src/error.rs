use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::time::Duration;

/// Application errors mapped onto HTTP responses. Expected failures
/// of mutating RPCs travel in the `{success, message}` envelope
/// instead; transport-level errors are reserved for the kinds below.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("operation partially applied: {0}")]
    Partial(String),
    #[error("storage unavailable")]
    Unavailable(#[source] anyhow::Error),
    #[error("deadline exceeded")]
    Cancelled,
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Database failures during read-through are fatal to the request
    /// and surfaced, unlike cache failures which degrade to misses.
    pub fn db(err: anyhow::Error) -> Self {
        ApiError::Unavailable(err)
    }
}

#[derive(Debug, serde::Serialize)]
struct ErrorBody {
    error: ProblemDetails,
}

#[derive(Debug, serde::Serialize)]
struct ProblemDetails {
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, detail) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, Some(self.to_string())),
            ApiError::Unauthorized(_) => (StatusCode::FORBIDDEN, Some(self.to_string())),
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, Some(self.to_string())),
            ApiError::Partial(_) => (StatusCode::CONFLICT, Some(self.to_string())),
            ApiError::Unavailable(err) => {
                tracing::error!(%err, "request failed against the database");
                (StatusCode::SERVICE_UNAVAILABLE, None)
            }
            ApiError::Cancelled => (StatusCode::REQUEST_TIMEOUT, Some(self.to_string())),
            ApiError::Internal(err) => {
                // Details go to the log, never to the caller.
                tracing::error!(%err, "request failed with internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };
        let body = ErrorBody {
            error: ProblemDetails {
                title: match &self {
                    ApiError::NotFound(_) => "not found",
                    ApiError::Unauthorized(_) => "unauthorized",
                    ApiError::Validation(_) => "validation failed",
                    ApiError::Partial(_) => "partial failure",
                    ApiError::Unavailable(_) => "storage unavailable",
                    ApiError::Cancelled => "cancelled",
                    ApiError::Internal(_) => "internal error",
                }
                .to_string(),
                detail,
            },
        };
        (status, Json(body)).into_response()
    }
}

/// Runs a handler body under the request deadline. No cache write
/// or database call survives past the deadline: the future is dropped
/// at its next suspension point.
pub async fn with_deadline<T>(
    deadline: Duration,
    work: impl std::future::Future<Output = Result<T, ApiError>>,
) -> Result<T, ApiError> {
    match tokio::time::timeout(deadline, work).await {
        Ok(result) => result,
        Err(_) => Err(ApiError::Cancelled),
    }
}
