//! Health check endpoint.
//!
//! Used by load balancers and the push broker to verify the process is up.

use axum::http::StatusCode;

/// Liveness check.
///
/// Returns 200 OK to indicate the service is running. Does not check the
/// broker connection.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}
