//! Logistics processors, bound to subscriptions by name in configuration.
//!
//! - [`OrderSubmittedHandler`] (`orderSubmitted`): validates the order and
//!   requests a route optimization through the outbox.
//! - [`OptimizationForwarder`] (`optimizationRequested`): hands the request to
//!   the external optimization consumer over HTTP.
//!
//! Both are [`EventHandler`]s; wrap them in [`JsonProcessor`](courier_core::JsonProcessor)
//! to filter by event type and decode the payload.

use courier_core::envelope::Envelope;
use courier_core::outbox::{OutboxAttributes, keys};
use courier_core::processor::{EventHandler, ProcessContext, ProcessorOutcome};
use courier_runtime::OutboxPublisher;
use courier_runtime::propagation::inject_context;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{Span, info, warn};

/// Processor name for submitted orders.
pub const ORDER_SUBMITTED: &str = "orderSubmitted";
/// Processor name for optimization requests.
pub const OPTIMIZATION_REQUESTED: &str = "optimizationRequested";

/// Header carrying the business reference on forwarded requests.
pub const REFERENCE_HEADER: &str = "x-reference-id";

/// An order handed over for delivery planning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSubmitted {
    /// Business reference of the order.
    #[serde(rename = "referenceID", default)]
    pub reference_id: String,
    /// Everything else the order carries, passed through untouched.
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// Handles `orderSubmitted`: logs the order and publishes an
/// `optimizationRequested` event carrying it.
pub struct OrderSubmittedHandler {
    publisher: OutboxPublisher,
}

impl OrderSubmittedHandler {
    /// Create a handler publishing through `publisher`.
    #[must_use]
    pub const fn new(publisher: OutboxPublisher) -> Self {
        Self { publisher }
    }
}

/// Tenant attributes of the inbound event, carried onto the follow-up event.
fn follow_up_attributes(envelope: &Envelope, reference_id: &str) -> OutboxAttributes {
    let mut attributes =
        OutboxAttributes::new("order", OPTIMIZATION_REQUESTED).reference_id(reference_id);
    let copy = |key: &str| envelope.extension(key).map(str::to_string);
    attributes.country = copy(keys::COUNTRY);
    attributes.organization = copy(keys::ORGANIZATION);
    attributes.organization_country_id = copy(keys::ORGANIZATION_COUNTRY_ID);
    attributes.commerce = copy(keys::COMMERCE);
    attributes.consumer = copy(keys::CONSUMER);
    attributes
}

impl EventHandler for OrderSubmittedHandler {
    type Payload = OrderSubmitted;

    fn event_type(&self) -> &str {
        ORDER_SUBMITTED
    }

    async fn handle(
        &self,
        ctx: &ProcessContext,
        order: OrderSubmitted,
        envelope: &Envelope,
    ) -> ProcessorOutcome {
        if order.reference_id.trim().is_empty() {
            return ProcessorOutcome::handled(
                422,
                anyhow::anyhow!("orderSubmitted {} has no referenceID", envelope.id),
            );
        }

        info!(
            subscription = %ctx.subscription,
            transport = %ctx.transport,
            message_id = %envelope.id,
            reference_id = %order.reference_id,
            "Order submitted"
        );

        let attributes = follow_up_attributes(envelope, &order.reference_id);
        match self.publisher.publish_json(&order, attributes).await {
            Ok(id) => {
                info!(
                    reference_id = %order.reference_id,
                    topic = self.publisher.topic(),
                    published_id = %id,
                    "Optimization requested"
                );
                ProcessorOutcome::ok()
            }
            Err(e) => ProcessorOutcome::retry(e),
        }
    }
}

/// Handles `optimizationRequested` by POSTing the payload to the optimization
/// consumer.
///
/// | Upstream | Outcome |
/// |---|---|
/// | 2xx / 3xx | handled |
/// | 4xx | handled with error, same status (not retried) |
/// | 5xx or transport failure | retry, 503 |
pub struct OptimizationForwarder {
    client: reqwest::Client,
    endpoint: String,
}

impl OptimizationForwarder {
    /// Create a forwarder posting to `endpoint`.
    ///
    /// A zero `timeout` keeps the client default.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if !timeout.is_zero() {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            endpoint: endpoint.into(),
        })
    }

    /// Where requests are forwarded.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl EventHandler for OptimizationForwarder {
    type Payload = serde_json::Value;

    fn event_type(&self) -> &str {
        OPTIMIZATION_REQUESTED
    }

    async fn handle(
        &self,
        ctx: &ProcessContext,
        _payload: serde_json::Value,
        envelope: &Envelope,
    ) -> ProcessorOutcome {
        let mut trace_headers = HashMap::new();
        inject_context(&Span::current(), &mut trace_headers);

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(envelope.data.clone());
        for (name, value) in trace_headers {
            request = request.header(name, value);
        }
        if let Some(reference_id) = envelope.extension(keys::REFERENCE_ID) {
            request = request.header(REFERENCE_HEADER, reference_id);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return ProcessorOutcome::retry(
                    anyhow::Error::new(e).context("optimization consumer unreachable"),
                );
            }
        };

        let status = response.status();
        if status.is_server_error() {
            ProcessorOutcome::retry(anyhow::anyhow!("optimization consumer returned {status}"))
        } else if status.is_client_error() {
            warn!(
                subscription = %ctx.subscription,
                message_id = %envelope.id,
                %status,
                "Optimization consumer rejected request"
            );
            ProcessorOutcome::handled(
                status.as_u16(),
                anyhow::anyhow!("optimization consumer rejected request with {status}"),
            )
        } else {
            ProcessorOutcome::ok()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use courier_core::broker::Broker;
    use courier_core::processor::{Disposition, JsonProcessor, Processor, Transport};
    use courier_testing::InMemoryBroker;
    use std::sync::{Arc, Mutex};

    fn pull_ctx() -> ProcessContext {
        ProcessContext::new("orders", Transport::Pull)
    }

    fn envelope(event_type: &str, data: &str, extensions: &[(&str, &str)]) -> Envelope {
        let mut extensions: HashMap<String, String> = extensions
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), (*v).to_string()))
            .collect();
        extensions.insert("eventtype".to_string(), event_type.to_string());
        Envelope {
            id: "0-7".to_string(),
            event_type: event_type.to_string(),
            source: "memory/orders".to_string(),
            data: data.as_bytes().to_vec(),
            extensions,
        }
    }

    fn order_processor(broker: &InMemoryBroker) -> JsonProcessor<OrderSubmittedHandler> {
        let broker: Arc<dyn Broker> = Arc::new(broker.clone());
        JsonProcessor::new(OrderSubmittedHandler::new(OutboxPublisher::new(
            broker,
            "logistics-events",
        )))
    }

    #[tokio::test]
    async fn order_publishes_optimization_request() {
        let broker = InMemoryBroker::new();
        let processor = order_processor(&broker);

        let outcome = processor
            .process(
                &pull_ctx(),
                envelope(
                    ORDER_SUBMITTED,
                    r#"{"referenceID":"A1","items":3}"#,
                    &[("country", "CL"), ("organization", "acme")],
                ),
            )
            .await;

        assert_eq!(outcome.status, 200);
        let published = broker.published();
        assert_eq!(published.len(), 1);
        let attributes = &published[0].message.attributes;
        assert_eq!(attributes["eventType"], OPTIMIZATION_REQUESTED);
        assert_eq!(attributes["referenceID"], "A1");
        assert_eq!(attributes["country"], "CL");
        assert_eq!(attributes["organization"], "acme");
        assert!(!attributes.contains_key("commerce"));

        let body: serde_json::Value = serde_json::from_slice(&published[0].message.data).unwrap();
        assert_eq!(body["items"], 3);
    }

    #[tokio::test]
    async fn order_without_reference_is_drained() {
        let broker = InMemoryBroker::new();
        let outcome = order_processor(&broker)
            .process(&pull_ctx(), envelope(ORDER_SUBMITTED, r#"{"items":3}"#, &[]))
            .await;

        assert_eq!(outcome.status, 422);
        assert_eq!(outcome.disposition(), Disposition::Handled);
        assert!(outcome.error.is_some());
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn order_publish_failure_is_retried() {
        let broker = InMemoryBroker::new();
        broker.set_publish_failure(Some("broker down"));

        let outcome = order_processor(&broker)
            .process(&pull_ctx(), envelope(ORDER_SUBMITTED, r#"{"referenceID":"A1"}"#, &[]))
            .await;

        assert_eq!(outcome.disposition(), Disposition::Retry);
    }

    #[derive(Clone, Default)]
    struct Upstream {
        status: u16,
        seen: Arc<Mutex<Vec<(Option<String>, Vec<u8>)>>>,
    }

    async fn serve(upstream: Upstream) -> String {
        let app = Router::new().route(
            "/optimize",
            post(move |headers: HeaderMap, body: axum::body::Bytes| {
                let upstream = upstream.clone();
                async move {
                    let reference = headers
                        .get(REFERENCE_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    upstream.seen.lock().unwrap().push((reference, body.to_vec()));
                    StatusCode::from_u16(upstream.status).unwrap()
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/optimize")
    }

    async fn forward_to(status: u16) -> (ProcessorOutcome, Upstream) {
        let upstream = Upstream {
            status,
            ..Upstream::default()
        };
        let endpoint = serve(upstream.clone()).await;
        let processor = JsonProcessor::new(
            OptimizationForwarder::new(endpoint, Duration::from_secs(5)).unwrap(),
        );
        let outcome = processor
            .process(
                &pull_ctx(),
                envelope(
                    OPTIMIZATION_REQUESTED,
                    r#"{"referenceID":"A1"}"#,
                    &[("referenceID", "A1")],
                ),
            )
            .await;
        (outcome, upstream)
    }

    #[tokio::test]
    async fn accepted_request_is_handled() {
        let (outcome, upstream) = forward_to(202).await;

        assert_eq!(outcome.status, 200);
        let seen = upstream.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![(Some("A1".to_string()), br#"{"referenceID":"A1"}"#.to_vec())]);
    }

    #[tokio::test]
    async fn upstream_server_error_is_retried() {
        let (outcome, _) = forward_to(502).await;
        assert_eq!(outcome.status, 503);
        assert_eq!(outcome.disposition(), Disposition::Retry);
    }

    #[tokio::test]
    async fn upstream_client_error_is_drained() {
        let (outcome, _) = forward_to(400).await;
        assert_eq!(outcome.status, 400);
        assert_eq!(outcome.disposition(), Disposition::Handled);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn unreachable_upstream_is_retried() {
        // Bind and drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let processor = JsonProcessor::new(
            OptimizationForwarder::new(format!("http://{addr}/optimize"), Duration::from_secs(2))
                .unwrap(),
        );
        let outcome = processor
            .process(&pull_ctx(), envelope(OPTIMIZATION_REQUESTED, "{}", &[]))
            .await;

        assert_eq!(outcome.status, 503);
        assert_eq!(outcome.disposition(), Disposition::Retry);
    }
}
