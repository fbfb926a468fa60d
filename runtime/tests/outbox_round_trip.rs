//! Outbox publisher to pull dispatcher, through the in-memory broker.
//!
//! A record published by [`OutboxPublisher`] must reach the processor with
//! every outbox attribute, its JSON payload, and the producer's trace.

#![allow(clippy::unwrap_used)]

use courier_core::envelope::Envelope;
use courier_core::outbox::{OutboxAttributes, OutboxRecord};
use courier_core::processor::{ProcessorOutcome, processor_fn};
use courier_runtime::propagation::extract_context;
use courier_runtime::{OutboxPublisher, PullDispatcher, SubscriptionRegistry};
use courier_testing::InMemoryBroker;
use opentelemetry::trace::{
    SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
    TracerProvider as _,
};
use opentelemetry::Context as OtelContext;
use opentelemetry_sdk::trace::TracerProvider;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{Instrument, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;
use tracing_subscriber::layer::SubscriberExt;

const WAIT: Duration = Duration::from_secs(5);
const TOPIC: &str = "logistics-events";
const SUBSCRIPTION: &str = "orders-submitted";
const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";

type Seen = Arc<Mutex<Vec<(Envelope, TraceId)>>>;

fn upstream_context() -> OtelContext {
    let span_context = SpanContext::new(
        TraceId::from_hex(TRACE_ID).unwrap(),
        SpanId::from_hex("00f067aa0ba902b7").unwrap(),
        TraceFlags::SAMPLED,
        true,
        TraceState::default(),
    );
    OtelContext::new().with_remote_span_context(span_context)
}

fn attributes() -> OutboxAttributes {
    OutboxAttributes::new("order", "orderSubmitted")
        .country("CL")
        .organization("acme")
        .organization_country_id("acme-cl")
        .commerce("store-12")
        .consumer("planner")
        .reference_id("A1")
}

/// Bind a processor that records each envelope with the trace id it ran under.
fn bound_broker(seen: &Seen) -> (InMemoryBroker, PullDispatcher) {
    let broker = InMemoryBroker::new();
    broker.create_subscription(SUBSCRIPTION, TOPIC);

    let recorded = Arc::clone(seen);
    let processor = processor_fn("record", move |_ctx, envelope| {
        let recorded = Arc::clone(&recorded);
        async move {
            let trace_id = Span::current().context().span().span_context().trace_id();
            recorded.lock().unwrap().push((envelope, trace_id));
            ProcessorOutcome::ok()
        }
    });

    let mut registry = SubscriptionRegistry::new();
    registry.bind(SUBSCRIPTION, 1, Arc::new(processor)).unwrap();
    let binding = registry.get(SUBSCRIPTION).unwrap().clone();

    let dispatcher = PullDispatcher::new(Arc::new(broker.clone()), binding);
    (broker, dispatcher)
}

#[tokio::test]
async fn published_record_reaches_the_processor_intact() {
    // Keep the provider alive: its tracers stop recording once it is dropped.
    let provider = TracerProvider::builder().build();
    let subscriber = tracing_subscriber::registry()
        .with(tracing_opentelemetry::layer().with_tracer(provider.tracer("courier-test")));
    let _guard = tracing::subscriber::set_default(subscriber);

    let seen: Seen = Arc::default();
    let (broker, dispatcher) = bound_broker(&seen);
    let (stop, shutdown) = watch::channel(false);
    let task = tokio::spawn(dispatcher.run(shutdown));

    let record =
        OutboxRecord::json(&serde_json::json!({"referenceID": "A1"}), attributes()).unwrap();
    let publisher = OutboxPublisher::new(Arc::new(broker.clone()), TOPIC);
    let request = tracing::info_span!("submit_order");
    request.set_parent(upstream_context());
    publisher.publish(&record).instrument(request).await.unwrap();

    assert!(broker.wait_until(WAIT, |b| b.acked(SUBSCRIPTION).len() == 1).await);
    stop.send(true).unwrap();
    task.await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let (envelope, processed_under) = &seen[0];

    assert_eq!(envelope.source, "memory/orders-submitted");
    assert_eq!(envelope.event_type, "orderSubmitted");
    assert_eq!(envelope.extension("referenceID"), Some("A1"));
    assert_eq!(
        envelope.json::<serde_json::Value>().unwrap(),
        serde_json::json!({"referenceID": "A1"})
    );
    for (key, value) in record.attributes.to_attributes() {
        assert_eq!(envelope.extension(&key), Some(value.as_str()), "attribute {key}");
    }

    let traceparent = envelope.extension("traceparent").unwrap();
    assert!(traceparent.starts_with(&format!("00-{TRACE_ID}-")));
    let carried = extract_context(&envelope.extensions).unwrap();
    assert_eq!(carried.span().span_context().trace_id().to_string(), TRACE_ID);
    assert_eq!(processed_under.to_string(), TRACE_ID);
}

#[tokio::test]
async fn record_without_an_active_trace_carries_no_traceparent() {
    let seen: Seen = Arc::default();
    let (broker, dispatcher) = bound_broker(&seen);
    let (stop, shutdown) = watch::channel(false);
    let task = tokio::spawn(dispatcher.run(shutdown));

    let publisher = OutboxPublisher::new(Arc::new(broker.clone()), TOPIC);
    publisher
        .publish_json(&serde_json::json!({"referenceID": "B7"}), attributes().reference_id("B7"))
        .await
        .unwrap();

    assert!(broker.wait_until(WAIT, |b| b.acked(SUBSCRIPTION).len() == 1).await);
    stop.send(true).unwrap();
    task.await.unwrap();

    let seen = seen.lock().unwrap();
    let (envelope, _) = &seen[0];
    assert_eq!(envelope.extension("referenceID"), Some("B7"));
    assert!(envelope.extension("createdAt").is_some());
    assert_eq!(envelope.extension("traceparent"), None);
}
