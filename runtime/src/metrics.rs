//! Prometheus metrics for the delivery path.
//!
//! This module records:
//! - Deliveries per subscription, transport and disposition
//! - Processing latency
//! - Outbox publishes and publish errors
//! - Dispatcher restarts after stream failures
//!
//! # Example
//!
//! ```rust,no_run
//! use courier_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = MetricsRecorder::new();
//! recorder.install()?;
//!
//! // Serve `recorder.render()` on GET /metrics
//! # Ok(())
//! # }
//! ```

use courier_core::processor::{Disposition, Transport};
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder handle.
///
/// Installs the global recorder once and renders the text exposition format.
#[derive(Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Create a recorder that has not been installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe every metric and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests), this logs a warning
    /// and leaves [`render`](Self::render) returning `None`.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the Prometheus handle, if this instance installed the recorder.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder hasn't been installed by this instance.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!(
        "courier_deliveries_total",
        "Total number of envelopes handed to processors"
    );
    describe_histogram!(
        "courier_processing_duration_seconds",
        "Time spent inside processors"
    );
    describe_counter!(
        "courier_publishes_total",
        "Total number of confirmed outbox publishes"
    );
    describe_counter!(
        "courier_publish_errors_total",
        "Total number of outbox publishes the broker did not confirm"
    );
    describe_histogram!(
        "courier_publish_duration_seconds",
        "Time taken for a confirmed publish"
    );
    describe_counter!(
        "courier_dispatcher_restarts_total",
        "Total number of pull dispatcher restarts after a stream failure"
    );
}

const fn disposition_label(disposition: Disposition) -> &'static str {
    match disposition {
        Disposition::Handled => "handled",
        Disposition::Retry => "retry",
    }
}

/// Delivery metrics recorder.
pub struct DeliveryMetrics;

impl DeliveryMetrics {
    /// Record one processed delivery.
    pub fn record(
        subscription: &str,
        transport: Transport,
        disposition: Disposition,
        duration: Duration,
    ) {
        counter!(
            "courier_deliveries_total",
            "subscription" => subscription.to_string(),
            "transport" => transport.to_string(),
            "disposition" => disposition_label(disposition)
        )
        .increment(1);
        histogram!(
            "courier_processing_duration_seconds",
            "subscription" => subscription.to_string()
        )
        .record(duration.as_secs_f64());
    }
}

/// Outbox publish metrics recorder.
pub struct PublishMetrics;

impl PublishMetrics {
    /// Record a confirmed publish.
    pub fn record_publish(topic: &str, duration: Duration) {
        counter!("courier_publishes_total", "topic" => topic.to_string()).increment(1);
        histogram!("courier_publish_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a publish the broker did not confirm.
    pub fn record_error(topic: &str) {
        counter!("courier_publish_errors_total", "topic" => topic.to_string()).increment(1);
    }
}

/// Pull dispatcher metrics recorder.
pub struct DispatcherMetrics;

impl DispatcherMetrics {
    /// Record a restart after a stream failure.
    pub fn record_restart(subscription: &str) {
        counter!(
            "courier_dispatcher_restarts_total",
            "subscription" => subscription.to_string()
        )
        .increment(1);
    }
}
