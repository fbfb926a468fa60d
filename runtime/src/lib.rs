//! # Courier Runtime
//!
//! Runtime for the Courier event delivery core.
//!
//! This crate wires processors to broker subscriptions and publishes outbox
//! records.
//!
//! ## Core Components
//!
//! - **Registry**: binds each subscription name to one processor and a ceiling
//! - **Pull dispatcher**: a supervised streaming receive per subscription,
//!   restarted after a fixed delay when the stream fails
//! - **Supervisor**: owns the stop signal and the dispatcher tasks
//! - **Outbox publisher**: one confirmed publish per record, with trace context
//! - **Telemetry**: tracing subscriber, W3C propagator, Jaeger export, metrics
//!
//! ## Example
//!
//! ```ignore
//! use courier_runtime::{OutboxPublisher, SubscriptionRegistry, Supervisor};
//!
//! let mut registry = SubscriptionRegistry::new();
//! registry.bind("orders-submitted", 10, Arc::new(JsonProcessor::new(OrderSubmitted)))?;
//! let registry = registry.freeze();
//!
//! let mut supervisor = Supervisor::new(Duration::from_secs(30));
//! supervisor.spawn_all(&registry, &broker, Duration::from_secs(10));
//!
//! let publisher = OutboxPublisher::new(broker, "logistics-events");
//! publisher.publish(&record).await?;
//!
//! supervisor.shutdown().await?;
//! ```

pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod metrics;
pub mod propagation;
pub mod publisher;
pub mod registry;
pub mod supervisor;
pub mod telemetry;

pub use config::{ConfigError, CourierConfig, DeliveryMode};
pub use delivery::{EnvelopeHandler, process_envelope};
pub use dispatcher::{DEFAULT_RESTART_DELAY, PullDispatcher};
pub use publisher::{OutboxPublisher, PublishError};
pub use registry::{Binding, RegistryError, SubscriptionRegistry};
pub use supervisor::{Supervisor, SupervisorError, wait_for_signal};
