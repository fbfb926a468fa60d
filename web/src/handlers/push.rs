//! The push route, `POST /subscription/{name}`.
//!
//! The processor's outcome maps onto the response the pushing broker sees:
//!
//! | Outcome | Response |
//! |---|---|
//! | status >= 500 | that status, verbatim (the broker redelivers) |
//! | handled, with error | 204 No Content (the broker drops it) |
//! | handled, no error | 200 OK |

use crate::WebResult;
use crate::error::AppError;
use crate::extractors::PushDelivery;
use crate::state::PushState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use courier_core::processor::{Disposition, ProcessContext, Transport};
use courier_runtime::process_envelope;

/// Handle one push delivery.
///
/// # Errors
///
/// - 404 if no subscription named `name` is bound
/// - 400 if a native push body is malformed (the processor is not called)
/// - the processor's own status when it asks for redelivery
pub async fn handle_push(
    State(state): State<PushState>,
    Path(name): Path<String>,
    delivery: Result<PushDelivery, AppError>,
) -> WebResult<StatusCode> {
    let binding = state
        .registry()
        .get(&name)
        .ok_or_else(|| AppError::not_found("Subscription", &name))?;

    let delivery = delivery.inspect_err(|e| {
        tracing::warn!(subscription = %name, error = %e, "Rejected push delivery");
    })?;

    let ctx = ProcessContext::new(binding.name(), Transport::Push)
        .with_delivery_attempt(delivery.delivery_attempt());
    let envelope = delivery.into_envelope(state.source(binding.name()));

    let outcome = process_envelope(binding.processor().as_ref(), &ctx, envelope).await;

    match (outcome.disposition(), outcome.error) {
        (Disposition::Retry, Some(err)) => Err(AppError::retry(outcome.status).with_source(err)),
        (Disposition::Retry, None) => Err(AppError::retry(outcome.status)),
        (Disposition::Handled, Some(_)) => Ok(StatusCode::NO_CONTENT),
        (Disposition::Handled, None) => Ok(StatusCode::OK),
    }
}
