//! Courier server.
//!
//! Consumes logistics events by pull and by push, and forwards optimization
//! requests to the optimization consumer.

use courier_core::broker::Broker;
use courier_runtime::metrics::MetricsRecorder;
use courier_runtime::telemetry::{init_tracing, shutdown_tracing};
use courier_runtime::{CourierConfig, OutboxPublisher, Supervisor, wait_for_signal};
use courier_server::bootstrap::{build_broker, build_registry, spawn_dispatchers};
use courier_web::{PushState, router};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = CourierConfig::from_env()?;

    // Initialize tracing and metrics
    init_tracing(&config.observability)?;
    let mut recorder = MetricsRecorder::new();
    recorder.install()?;

    info!(
        brokers = %config.broker.brokers,
        topic = %config.broker.topic,
        subscriptions = config.subscriptions.len(),
        "Starting Courier server"
    );

    // Broker and outbox publisher
    let broker: Arc<dyn Broker> = Arc::new(build_broker(&config)?);
    let publisher = OutboxPublisher::new(Arc::clone(&broker), &config.broker.topic);

    // Bind subscriptions, then freeze for sharing with the HTTP route
    let registry = build_registry(&config, &publisher)?.freeze();

    let mut supervisor = Supervisor::new(config.dispatcher.shutdown_timeout());
    let dispatchers = spawn_dispatchers(&config, &registry, &broker, &mut supervisor);
    info!(dispatchers, "Pull dispatchers started");

    // Push endpoint
    let mut state = PushState::new(
        Arc::clone(&registry),
        &config.http.push_marker_header,
        broker.name(),
    )?;
    if let Some(handle) = recorder.handle() {
        state = state.with_metrics(handle.clone());
    }

    let addr = config.http.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "Server listening");

    // Run server with graceful shutdown
    axum::serve(listener, router(state))
        .with_graceful_shutdown(wait_for_signal())
        .await?;

    info!("HTTP server stopped, stopping dispatchers");
    let stopped = supervisor.shutdown().await;

    shutdown_tracing();
    stopped?;

    info!("Server stopped");
    Ok(())
}
