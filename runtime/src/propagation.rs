//! W3C trace context propagation across the broker.
//!
//! The outbox publisher injects `traceparent` / `tracestate` into the message
//! attributes; both dispatch paths extract them again so the processing span
//! continues the producer's trace. Attribute keys are matched
//! case-insensitively because manual pushes lowercase every header.
//!
//! ```ignore
//! // Producer side
//! let mut attributes = record.attributes.to_attributes();
//! inject_context(&Span::current(), &mut attributes);
//!
//! // Consumer side
//! let span = consumer_span("orders", &envelope);
//! processor.process(&ctx, envelope).instrument(span).await;
//! ```

use courier_core::envelope::Envelope;
use opentelemetry::{Context as OtelContext, propagation::TextMapPropagator, trace::TraceContextExt};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use std::collections::HashMap;
use std::hash::BuildHasher;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Inject the trace context of `span` into `attributes`.
///
/// Leaves `attributes` untouched when the span carries no valid context
/// (for example when no OpenTelemetry layer is installed).
pub fn inject_context<S: BuildHasher>(span: &Span, attributes: &mut HashMap<String, String, S>) {
    inject_otel_context(&span.context(), attributes);
}

/// Inject an OpenTelemetry context into `attributes`.
pub fn inject_otel_context<S: BuildHasher>(
    context: &OtelContext,
    attributes: &mut HashMap<String, String, S>,
) {
    if !context.span().span_context().is_valid() {
        return;
    }
    TraceContextPropagator::new().inject_context(context, attributes);
}

/// Extract a remote trace context from message attributes.
///
/// Returns `None` when no valid `traceparent` is present.
#[must_use]
pub fn extract_context<S: BuildHasher>(
    attributes: &HashMap<String, String, S>,
) -> Option<OtelContext> {
    let lowered: HashMap<String, String> = attributes
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.clone()))
        .collect();

    let context = TraceContextPropagator::new().extract(&lowered);

    if context.span().span_context().is_valid() {
        Some(context)
    } else {
        None
    }
}

/// Open the span one delivery is processed in.
///
/// The span is parented on the trace context carried by the envelope, when
/// there is one.
#[must_use]
pub fn consumer_span(subscription: &str, envelope: &Envelope) -> Span {
    let span = tracing::info_span!(
        "courier.process",
        otel.kind = "consumer",
        subscription = %subscription,
        message_id = %envelope.id,
        event_type = %envelope.event_type,
    );
    if let Some(context) = extract_context(&envelope.extensions) {
        span.set_parent(context);
    }
    span
}
