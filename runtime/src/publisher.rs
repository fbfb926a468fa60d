//! Outbox publisher: one synchronous, confirmed publish per record.
//!
//! The publisher copies the record's attributes verbatim, adds the W3C trace
//! context of the current span and waits for the broker to confirm. Broker
//! errors reach the caller unchanged and are never retried here.
//!
//! Records are not staged in durable storage before publishing, so a failed
//! confirm loses the event unless the caller retries.

use crate::metrics::PublishMetrics;
use crate::propagation::inject_context;
use courier_core::broker::{Broker, BrokerError};
use courier_core::message::OutboundMessage;
use courier_core::outbox::{OutboxAttributes, OutboxRecord};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::Span;

/// Errors returned by [`OutboxPublisher`].
#[derive(Error, Debug)]
pub enum PublishError {
    /// The broker did not confirm the publish
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// The payload could not be serialized
    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Publishes outbox records to one topic.
#[derive(Clone)]
pub struct OutboxPublisher {
    broker: Arc<dyn Broker>,
    topic: String,
}

impl OutboxPublisher {
    /// Create a publisher for `topic`.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, topic: impl Into<String>) -> Self {
        Self {
            broker,
            topic: topic.into(),
        }
    }

    /// Topic records are published to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish a record and wait for the broker's confirmation.
    ///
    /// Returns the broker-assigned message id.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Broker`] with the broker's error if the publish
    /// is not confirmed.
    #[tracing::instrument(
        name = "courier.publish",
        skip(self, record),
        fields(
            otel.kind = "producer",
            topic = %self.topic,
            entity_type = %record.attributes.entity_type,
            event_type = %record.attributes.event_type,
        )
    )]
    pub async fn publish(&self, record: &OutboxRecord) -> Result<String, PublishError> {
        let mut attributes = record.attributes.to_attributes();
        inject_context(&Span::current(), &mut attributes);

        let started = Instant::now();
        let message = OutboundMessage::new(attributes, record.payload.clone());

        match self.broker.publish(&self.topic, message).await {
            Ok(id) => {
                PublishMetrics::record_publish(&self.topic, started.elapsed());
                tracing::debug!(message_id = %id, "Published outbox record");
                Ok(id)
            }
            Err(e) => {
                PublishMetrics::record_error(&self.topic);
                tracing::error!(error = %e, "Outbox publish was not confirmed");
                Err(PublishError::Broker(e))
            }
        }
    }

    /// Serialize `payload` as JSON into a new record and publish it.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Encode`] if the payload does not serialize, or
    /// [`PublishError::Broker`] if the publish is not confirmed.
    pub async fn publish_json<T: Serialize + Sync>(
        &self,
        payload: &T,
        attributes: OutboxAttributes,
    ) -> Result<String, PublishError> {
        let record = OutboxRecord::json(payload, attributes)?;
        self.publish(&record).await
    }
}
