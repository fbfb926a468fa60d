//! Prometheus exposition endpoint.

use crate::error::AppError;
use crate::state::PushState;
use axum::extract::State;

/// Render the installed recorder in Prometheus text format.
///
/// # Endpoint
///
/// ```text
/// GET /metrics
/// ```
///
/// # Errors
///
/// Returns 503 if no recorder handle was attached to the state.
#[allow(clippy::unused_async)]
pub async fn render_metrics(State(state): State<PushState>) -> Result<String, AppError> {
    state
        .metrics()
        .map(metrics_exporter_prometheus::PrometheusHandle::render)
        .ok_or_else(|| AppError::unavailable("Metrics recorder not installed"))
}
