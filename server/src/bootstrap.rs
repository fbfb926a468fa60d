//! Wiring from [`CourierConfig`] to running components.

use crate::processors::{
    OPTIMIZATION_REQUESTED, ORDER_SUBMITTED, OptimizationForwarder, OrderSubmittedHandler,
};
use courier_core::broker::{Broker, BrokerError};
use courier_core::processor::{JsonProcessor, Processor};
use courier_redpanda::RedpandaBroker;
use courier_runtime::{
    CourierConfig, DeliveryMode, OutboxPublisher, PullDispatcher, RegistryError,
    SubscriptionRegistry, Supervisor,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Errors raised while assembling the process.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// A subscription names a processor this binary does not provide
    #[error("Unknown processor '{processor}' for subscription '{subscription}'")]
    UnknownProcessor {
        /// The subscription
        subscription: String,
        /// The processor name it asked for
        processor: String,
    },

    /// Optimization forwarding is bound but has nowhere to forward to
    #[error("Subscription '{0}' forwards optimization requests but optimization.endpoint is not set")]
    MissingOptimizationEndpoint(String),

    /// The registry rejected a binding
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Build the Redpanda broker with one consumer group per subscription.
///
/// # Errors
///
/// Returns [`BrokerError::ConnectionFailed`] if the producer cannot be created.
pub fn build_broker(config: &CourierConfig) -> Result<RedpandaBroker, BrokerError> {
    let mut builder = RedpandaBroker::builder()
        .brokers(&config.broker.brokers)
        .producer_acks(&config.broker.producer_acks)
        .compression(&config.broker.compression)
        .timeout(config.broker.timeout())
        .auto_offset_reset(&config.broker.auto_offset_reset);
    for subscription in &config.subscriptions {
        builder = builder.subscription(&subscription.name, config.topic_for(subscription));
    }
    builder.build()
}

/// Resolve a processor by name.
fn processor_for(
    config: &CourierConfig,
    subscription: &str,
    name: &str,
    publisher: &OutboxPublisher,
) -> Result<Arc<dyn Processor>, BootstrapError> {
    match name {
        ORDER_SUBMITTED => Ok(Arc::new(JsonProcessor::new(OrderSubmittedHandler::new(
            publisher.clone(),
        )))),
        OPTIMIZATION_REQUESTED => {
            let endpoint = config.optimization.endpoint.as_deref().ok_or_else(|| {
                BootstrapError::MissingOptimizationEndpoint(subscription.to_string())
            })?;
            let timeout = Duration::from_secs(config.optimization.timeout_secs);
            Ok(Arc::new(JsonProcessor::new(OptimizationForwarder::new(
                endpoint, timeout,
            )?)))
        }
        other => Err(BootstrapError::UnknownProcessor {
            subscription: subscription.to_string(),
            processor: other.to_string(),
        }),
    }
}

/// Bind every configured subscription to its processor.
///
/// # Errors
///
/// Returns error if a processor name is unknown, the optimization endpoint is
/// missing, or the registry rejects a binding.
pub fn build_registry(
    config: &CourierConfig,
    publisher: &OutboxPublisher,
) -> Result<SubscriptionRegistry, BootstrapError> {
    let mut registry = SubscriptionRegistry::new();
    for subscription in &config.subscriptions {
        let processor =
            processor_for(config, &subscription.name, &subscription.processor, publisher)?;
        registry.bind(&subscription.name, subscription.max_outstanding, processor)?;
        info!(
            subscription = %subscription.name,
            processor = %subscription.processor,
            mode = %subscription.mode,
            max_outstanding = subscription.max_outstanding,
            "Subscription bound"
        );
    }
    Ok(registry)
}

/// Spawn a pull dispatcher for every pull-mode subscription.
///
/// Push-mode subscriptions are served by the HTTP route only. Returns the
/// number of dispatchers spawned.
pub fn spawn_dispatchers(
    config: &CourierConfig,
    registry: &SubscriptionRegistry,
    broker: &Arc<dyn Broker>,
    supervisor: &mut Supervisor,
) -> usize {
    let mut spawned = 0;
    for subscription in &config.subscriptions {
        if subscription.mode != DeliveryMode::Pull {
            continue;
        }
        if let Some(binding) = registry.get(&subscription.name) {
            supervisor.spawn(
                PullDispatcher::new(Arc::clone(broker), binding.clone())
                    .with_restart_delay(config.dispatcher.restart_delay()),
            );
            spawned += 1;
        }
    }
    spawned
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use courier_runtime::config::SubscriptionConfig;
    use courier_testing::InMemoryBroker;

    fn subscription(name: &str, processor: &str, mode: DeliveryMode) -> SubscriptionConfig {
        SubscriptionConfig {
            name: name.to_string(),
            processor: processor.to_string(),
            topic: None,
            max_outstanding: 4,
            mode,
        }
    }

    fn publisher(broker: &Arc<dyn Broker>) -> OutboxPublisher {
        OutboxPublisher::new(Arc::clone(broker), "logistics-events")
    }

    #[test]
    fn registry_binds_known_processors() {
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
        let mut config = CourierConfig::default();
        config.optimization.endpoint = Some("http://optimizer:8000/plans".to_string());
        config.subscriptions = vec![
            subscription("orders", ORDER_SUBMITTED, DeliveryMode::Pull),
            subscription("optimization", OPTIMIZATION_REQUESTED, DeliveryMode::Push),
        ];

        let registry = build_registry(&config, &publisher(&broker)).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("orders").unwrap().processor().name(), ORDER_SUBMITTED);
        assert_eq!(
            registry.get("optimization").unwrap().processor().name(),
            OPTIMIZATION_REQUESTED
        );
    }

    #[test]
    fn unknown_processor_is_rejected() {
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
        let mut config = CourierConfig::default();
        config.subscriptions = vec![subscription("orders", "vehicleMoved", DeliveryMode::Pull)];

        let err = build_registry(&config, &publisher(&broker)).unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::UnknownProcessor { ref processor, .. } if processor == "vehicleMoved"
        ));
    }

    #[test]
    fn optimization_requires_endpoint() {
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
        let mut config = CourierConfig::default();
        config.subscriptions = vec![subscription(
            "optimization",
            OPTIMIZATION_REQUESTED,
            DeliveryMode::Pull,
        )];

        let err = build_registry(&config, &publisher(&broker)).unwrap_err();
        assert!(matches!(err, BootstrapError::MissingOptimizationEndpoint(ref s) if s == "optimization"));
    }

    #[tokio::test]
    async fn only_pull_subscriptions_get_dispatchers() {
        let memory = InMemoryBroker::new();
        memory.create_subscription("orders", "logistics-events");
        memory.create_subscription("orders-push", "logistics-events");
        let broker: Arc<dyn Broker> = Arc::new(memory);

        let mut config = CourierConfig::default();
        config.subscriptions = vec![
            subscription("orders", ORDER_SUBMITTED, DeliveryMode::Pull),
            subscription("orders-push", ORDER_SUBMITTED, DeliveryMode::Push),
        ];
        let registry = build_registry(&config, &publisher(&broker)).unwrap();

        let mut supervisor = Supervisor::new(Duration::from_secs(5));
        let spawned = spawn_dispatchers(&config, &registry, &broker, &mut supervisor);

        assert_eq!(spawned, 1);
        assert_eq!(supervisor.len(), 1);
        tokio_test::assert_ok!(supervisor.shutdown().await);
    }
}
