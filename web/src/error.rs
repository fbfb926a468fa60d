//! Error types for web handlers.
//!
//! [`AppError`] bridges push-adapter failures and HTTP responses by
//! implementing Axum's `IntoResponse` trait.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
///
/// Renders as a JSON `{code, message}` body with the carried status. The
/// source error is logged for server errors and never sent to the client.
///
/// # Examples
///
/// ```ignore
/// async fn handler(Path(name): Path<String>) -> Result<StatusCode, AppError> {
///     let binding = registry.get(&name)
///         .ok_or_else(|| AppError::not_found("Subscription", &name))?;
///     Ok(StatusCode::OK)
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: String,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: String) -> Self {
        Self {
            status,
            message,
            code,
            source: None,
        }
    }

    /// Create a new error with a source error.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// The status this error renders with.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// The machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            message.into(),
            "BAD_REQUEST".to_string(),
        )
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} {id} not found"),
            "NOT_FOUND".to_string(),
        )
    }

    /// Create a retryable processing failure carrying the processor's status.
    ///
    /// Status codes that HTTP cannot represent fall back to 500.
    #[must_use]
    pub fn retry(status: u16) -> Self {
        Self::new(
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            "Processing failed, delivery should be retried".to_string(),
            "RETRY".to_string(),
        )
    }

    /// Create a 503 Service Unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            message.into(),
            "SERVICE_UNAVAILABLE".to_string(),
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: String,
    /// Human-readable error message.
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                );
            } else {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    "Request failed"
                );
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::bad_request("Invalid push body");
        assert_eq!(err.to_string(), "[BAD_REQUEST] Invalid push body");
    }

    #[test]
    fn test_not_found() {
        let err = AppError::not_found("Subscription", "orders");
        assert_eq!(err.to_string(), "[NOT_FOUND] Subscription orders not found");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_retry_keeps_status() {
        assert_eq!(AppError::retry(503).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(AppError::retry(599).status().as_u16(), 599);
        assert_eq!(AppError::retry(1200).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(AppError::retry(503).code(), "RETRY");
    }

    #[test]
    fn test_retry_carries_its_source() {
        let err = AppError::retry(503).with_source(anyhow::anyhow!("consumer unreachable"));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            std::error::Error::source(&err).map(ToString::to_string),
            Some("consumer unreachable".to_string())
        );
    }
}
