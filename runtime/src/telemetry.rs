//! Logging and distributed tracing setup.
//!
//! - `tracing` macros for all instrumentation
//! - `tracing-subscriber` fmt output filtered by the configured level
//!   (`RUST_LOG` wins when set)
//! - W3C trace context registered as the global propagator
//! - A `tracing-opentelemetry` layer exporting to Jaeger when an endpoint is
//!   configured
//!
//! ```ignore
//! telemetry::init_tracing(&config.observability)?;
//! // ... run
//! telemetry::shutdown_tracing();
//! ```

use crate::config::ObservabilityConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Errors raised while installing the tracing stack.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The log level is not a valid filter directive
    #[error("Invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    /// The Jaeger pipeline could not be installed
    #[error("Failed to install Jaeger exporter: {0}")]
    Exporter(#[from] opentelemetry::trace::TraceError),

    /// A global subscriber is already installed
    #[error("Failed to install tracing subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Install the global subscriber and propagator.
///
/// Call this once at startup, before any dispatcher or server starts.
///
/// # Errors
///
/// Returns error if the log level does not parse, the Jaeger exporter fails to
/// start, or a subscriber is already installed.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<(), TelemetryError> {
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)?,
    };

    let opentelemetry = match &config.jaeger_endpoint {
        Some(endpoint) => {
            let tracer = opentelemetry_jaeger::new_agent_pipeline()
                .with_service_name(config.service_name.clone())
                .with_endpoint(endpoint.as_str())
                .install_simple()?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(opentelemetry)
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()?;

    tracing::info!(
        service = %config.service_name,
        level = %config.log_level,
        jaeger = config.jaeger_endpoint.as_deref().unwrap_or("disabled"),
        "Tracing initialized"
    );

    Ok(())
}

/// Flush pending spans and shut the exporter down.
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}
