//! Shared state for the push adapter's handlers.

use axum::http::HeaderName;
use axum::http::header::InvalidHeaderName;
use courier_runtime::SubscriptionRegistry;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// State shared across all HTTP handlers.
///
/// Cloned per request; everything inside is read-only after startup.
#[derive(Clone)]
pub struct PushState {
    registry: Arc<SubscriptionRegistry>,
    marker_header: HeaderName,
    broker: Arc<str>,
    metrics: Option<PrometheusHandle>,
}

impl PushState {
    /// Create state over a frozen registry.
    ///
    /// `broker` names the broker delivering pushes and prefixes every
    /// envelope source as `"<broker>/<subscription>"`.
    ///
    /// # Errors
    ///
    /// Returns error if `marker_header` is not a valid header name.
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        marker_header: &str,
        broker: &str,
    ) -> Result<Self, InvalidHeaderName> {
        Ok(Self {
            registry,
            marker_header: HeaderName::try_from(marker_header)?,
            broker: Arc::from(broker),
            metrics: None,
        })
    }

    /// Serve the given Prometheus handle on `GET /metrics`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Subscription bindings.
    #[must_use]
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Header whose presence marks a native broker push.
    #[must_use]
    pub const fn marker_header(&self) -> &HeaderName {
        &self.marker_header
    }

    /// Envelope source for a subscription.
    #[must_use]
    pub fn source(&self, subscription: &str) -> String {
        format!("{}/{subscription}", self.broker)
    }

    /// Prometheus handle, if metrics are served.
    #[must_use]
    pub const fn metrics(&self) -> Option<&PrometheusHandle> {
        self.metrics.as_ref()
    }
}
