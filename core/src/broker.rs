//! Broker abstraction shared by the outbox publisher and the pull dispatcher.
//!
//! This module provides the [`Broker`] trait: a confirmed publish to a topic and
//! a blocking streaming receive on a named subscription. Business code never
//! talks to a broker directly; the runtime wires processors to subscriptions.
//!
//! # Delivery Semantics
//!
//! - **At-least-once**: a message may be delivered more than once
//! - **Ack/nack by value**: the [`DeliveryHandler`] returns a [`Disposition`]
//!   and the broker applies exactly one ack (`Handled`) or nack (`Retry`)
//! - **Flow control**: at most `max_outstanding` handler calls run at once
//! - **No ordering promise** beyond what the underlying broker provides
//!
//! # Implementations
//!
//! - `RedpandaBroker` (crate `courier-redpanda`) - Kafka-compatible, for production
//! - `InMemoryBroker` (crate `courier-testing`) - For tests, with fault injection
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_core::broker::{Broker, ReceiveSettings};
//!
//! async fn example(broker: Arc<dyn Broker>, handler: Arc<dyn DeliveryHandler>) {
//!     let (_stop, shutdown) = tokio::sync::watch::channel(false);
//!
//!     // Blocks until shutdown is signalled or the stream fails
//!     if let Err(e) = broker
//!         .receive("orders", ReceiveSettings::new(10), handler, shutdown)
//!         .await
//!     {
//!         tracing::error!(error = %e, "Subscription stream failed");
//!     }
//! }
//! ```

use crate::message::{BrokerMessage, OutboundMessage};
use crate::processor::Disposition;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// Errors that can occur during broker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The broker did not confirm a publish
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// The subscription is not known to this broker
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(String),

    /// Failed to open the subscription stream
    #[error("Subscription '{subscription}' failed: {reason}")]
    SubscriptionFailed {
        /// The subscription that failed
        subscription: String,
        /// The reason for failure
        reason: String,
    },

    /// The streaming receive terminated with a transport error
    #[error("Stream for subscription '{subscription}' failed: {reason}")]
    StreamFailed {
        /// The subscription whose stream failed
        subscription: String,
        /// The reason for failure
        reason: String,
    },

    /// Generic error for other failures
    #[error("Broker error: {0}")]
    Other(String),
}

/// Flow-control settings for one streaming receive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReceiveSettings {
    /// Maximum number of delivered-but-not-yet-acknowledged messages.
    pub max_outstanding: usize,
}

impl ReceiveSettings {
    /// Create settings with the given outstanding-message ceiling.
    ///
    /// A ceiling of zero is raised to one; a subscription always makes progress.
    #[must_use]
    pub const fn new(max_outstanding: usize) -> Self {
        Self {
            max_outstanding: if max_outstanding == 0 { 1 } else { max_outstanding },
        }
    }
}

impl Default for ReceiveSettings {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Callback the broker invokes for every delivered message.
///
/// The returned [`Disposition`] is the one and only ack/nack decision for that
/// delivery. Implementations must not panic; failures are expressed as
/// [`Disposition::Retry`].
pub trait DeliveryHandler: Send + Sync {
    /// Handle one delivered message.
    fn deliver(&self, message: BrokerMessage) -> Pin<Box<dyn Future<Output = Disposition> + Send + '_>>;
}

/// Trait for message broker implementations.
///
/// # Thread Safety
///
/// A broker handle is constructed once per process and shared read-only across
/// all subscription bindings, so implementations must be `Send + Sync`.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be used as `Arc<dyn Broker>`.
pub trait Broker: Send + Sync {
    /// Short broker name, used to build envelope sources (`"<broker>/<subscription>"`).
    fn name(&self) -> &str;

    /// Publish a message to a topic and wait for the broker to confirm it.
    ///
    /// Returns the broker-assigned message id.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::PublishFailed`] if the broker does not confirm
    /// durable receipt. No retry is attempted.
    fn publish(
        &self,
        topic: &str,
        message: OutboundMessage,
    ) -> Pin<Box<dyn Future<Output = Result<String, BrokerError>> + Send + '_>>;

    /// Run a streaming receive on a subscription.
    ///
    /// Every message is handed to `handler`; at most
    /// `settings.max_outstanding` handler calls are in flight at once. The
    /// broker acknowledges messages whose disposition is `Handled` and
    /// negatively acknowledges (redelivers) those whose disposition is `Retry`.
    ///
    /// Returns `Ok(())` once `shutdown` flips to `true`.
    ///
    /// # Errors
    ///
    /// Returns an error when the stream itself fails (connection loss,
    /// unknown subscription). Per-message processing failures never end the
    /// stream.
    fn receive(
        &self,
        subscription: &str,
        settings: ReceiveSettings,
        handler: Arc<dyn DeliveryHandler>,
        shutdown: watch::Receiver<bool>,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;
}
