//! Redpanda broker implementation for Courier.
//!
//! This crate provides a Kafka-compatible [`Broker`] built on rdkafka. It works
//! with Redpanda, Apache Kafka, MSK and any other broker that speaks the Kafka
//! protocol.
//!
//! # Mapping
//!
//! | Courier | Kafka |
//! |---|---|
//! | topic | topic |
//! | subscription | consumer group (one per subscription name), bound to a topic |
//! | attributes | record headers |
//! | message id | `"<partition>-<offset>"` |
//! | ack (`Handled`) | offset commit, once every lower in-flight offset is settled |
//! | nack (`Retry`) | seek back to the message offset, so it is fetched again |
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - Offsets are committed only after the handler settled them as `Handled`
//! - A nack rewinds the partition; messages after it may be delivered again
//! - If the process crashes before commit, messages will be redelivered
//! - Ordering is per partition, and only while `max_outstanding` is 1
//!
//! Any error from the consumer stream, or a failed seek after a nack, ends
//! `receive` with [`BrokerError::StreamFailed`]; the pull dispatcher restarts
//! it. In-flight handlers are settled before `receive` returns either way.
//!
//! # Flow Control and Poll Interval
//!
//! The consumer stream is only polled while fewer than `max_outstanding`
//! handlers are running. If every slot stays busy for longer than
//! `max.poll.interval.ms`, the group coordinator considers the consumer dead
//! and rebalances its partitions; in-flight messages are then redelivered to
//! whichever member takes the partition over. Keep
//! [`RedpandaBrokerBuilder::max_poll_interval`] above the slowest expected
//! handler (default: 5 minutes).
//!
//! # Example
//!
//! ```no_run
//! use courier_redpanda::RedpandaBroker;
//! use courier_core::broker::Broker;
//! use courier_core::message::OutboundMessage;
//! use std::collections::HashMap;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = RedpandaBroker::builder()
//!     .brokers("localhost:9092")
//!     .subscription("orders-submitted", "logistics-events")
//!     .build()?;
//!
//! let id = broker
//!     .publish(
//!         "logistics-events",
//!         OutboundMessage::new(
//!             HashMap::from([("eventType".to_string(), "orderSubmitted".to_string())]),
//!             br#"{"referenceID":"A1"}"#.to_vec(),
//!         ),
//!     )
//!     .await?;
//! println!("published {id}");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod offsets;

use courier_core::broker::{Broker, BrokerError, DeliveryHandler, ReceiveSettings};
use courier_core::message::{BrokerMessage, OutboundMessage};
use courier_core::outbox::keys;
use courier_core::processor::Disposition;
use futures::StreamExt;
use offsets::OffsetTracker;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, watch};

/// Timeout for seeking a partition back after a nack.
const SEEK_TIMEOUT: Duration = Duration::from_secs(1);

/// Default `max.poll.interval.ms`.
const DEFAULT_MAX_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Redpanda (Kafka protocol) broker.
///
/// # Configuration
///
/// - **Broker addresses**: Bootstrap servers (required)
/// - **Producer settings**: Acks, compression, confirm timeout
/// - **Subscriptions**: name → topic; the name is the consumer group id
/// - **Offset reset**: Where new consumer groups start reading (default: "earliest")
/// - **Max poll interval**: Longest gap between stream polls before a rebalance
///
/// # Example
///
/// ```no_run
/// use courier_redpanda::RedpandaBroker;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = RedpandaBroker::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .compression("lz4")
///     .timeout(Duration::from_secs(10))
///     .subscription("orders-submitted", "logistics-events")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaBroker {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    auto_offset_reset: String,
    max_poll_interval: Duration,
    subscriptions: HashMap<String, String>,
}

impl RedpandaBroker {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RedpandaBrokerBuilder {
        RedpandaBrokerBuilder::default()
    }

    /// Bootstrap servers.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Topic a subscription is bound to.
    #[must_use]
    pub fn topic_of(&self, subscription: &str) -> Option<&str> {
        self.subscriptions.get(subscription).map(String::as_str)
    }

    fn consumer_config(&self, subscription: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", subscription)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set(
                "max.poll.interval.ms",
                self.max_poll_interval.as_millis().to_string(),
            )
            .set("enable.partition.eof", "false");
        config
    }

    fn consumer(&self, subscription: &str, topic: &str) -> Result<StreamConsumer, BrokerError> {
        let consumer: StreamConsumer = self
            .consumer_config(subscription)
            .create()
            .map_err(|e| BrokerError::SubscriptionFailed {
                subscription: subscription.to_string(),
                reason: format!("Failed to create consumer: {e}"),
            })?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| BrokerError::SubscriptionFailed {
                subscription: subscription.to_string(),
                reason: format!("Failed to subscribe to topic '{topic}': {e}"),
            })?;

        Ok(consumer)
    }
}

/// Builder for a [`RedpandaBroker`].
#[derive(Default)]
pub struct RedpandaBrokerBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    auto_offset_reset: Option<String>,
    max_poll_interval: Option<Duration>,
    subscriptions: HashMap<String, String>,
}

impl RedpandaBrokerBuilder {
    /// Set the broker addresses (comma-separated, e.g. "localhost:9092").
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1" or "all".
    ///
    /// Default: "all", so a confirmed publish is durable on every replica.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the publish confirmation timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set where new consumer groups start reading: "earliest" or "latest".
    ///
    /// Default: "earliest"
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set the longest time the consumer may go without polling its stream.
    ///
    /// The stream is not polled while every `max_outstanding` slot is busy,
    /// so this must exceed the slowest handler. Default: 5 minutes
    #[must_use]
    pub const fn max_poll_interval(mut self, interval: Duration) -> Self {
        self.max_poll_interval = Some(interval);
        self
    }

    /// Declare a subscription reading `topic`.
    #[must_use]
    pub fn subscription(mut self, name: impl Into<String>, topic: impl Into<String>) -> Self {
        self.subscriptions.insert(name.into(), topic.into());
        self
    }

    /// Build the [`RedpandaBroker`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaBroker, BrokerError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BrokerError::ConnectionFailed("Brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| BrokerError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            subscriptions = self.subscriptions.len(),
            "RedpandaBroker created"
        );

        Ok(RedpandaBroker {
            producer,
            brokers,
            timeout,
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
            max_poll_interval: self.max_poll_interval.unwrap_or(DEFAULT_MAX_POLL_INTERVAL),
            subscriptions: self.subscriptions,
        })
    }
}

/// Message id for a partition/offset pair.
#[must_use]
pub fn message_id(partition: i32, offset: i64) -> String {
    format!("{partition}-{offset}")
}

fn to_headers(attributes: &HashMap<String, String>) -> OwnedHeaders {
    attributes
        .iter()
        .fold(OwnedHeaders::new_with_capacity(attributes.len()), |headers, (key, value)| {
            headers.insert(Header {
                key: key.as_str(),
                value: Some(value.as_str()),
            })
        })
}

fn to_broker_message(message: &BorrowedMessage<'_>) -> BrokerMessage {
    let attributes = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .filter_map(|header| {
                    let value = header.value?;
                    Some((
                        header.key.to_string(),
                        String::from_utf8_lossy(value).into_owned(),
                    ))
                })
                .collect()
        })
        .unwrap_or_default();

    BrokerMessage::new(
        message_id(message.partition(), message.offset()),
        attributes,
        message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    )
}

/// Outcome of one handler call, sent back to the receive loop.
struct Settled {
    topic: String,
    partition: i32,
    offset: i64,
    disposition: Disposition,
}

/// Partition operations a settlement needs from the consumer.
trait PartitionControl {
    fn commit_position(&self, topic: &str, partition: i32, position: i64) -> KafkaResult<()>;
    fn seek_to(&self, topic: &str, partition: i32, offset: i64) -> KafkaResult<()>;
}

impl PartitionControl for StreamConsumer {
    fn commit_position(&self, topic: &str, partition: i32, position: i64) -> KafkaResult<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, Offset::Offset(position))?;
        self.commit(&tpl, CommitMode::Async)
    }

    fn seek_to(&self, topic: &str, partition: i32, offset: i64) -> KafkaResult<()> {
        self.seek(topic, partition, Offset::Offset(offset), SEEK_TIMEOUT)
    }
}

/// Apply one handler outcome to the partition.
///
/// A failed commit is only logged: the offset is committed again by a later
/// settlement, or redelivered. A failed seek is an error, because the
/// consumer would otherwise move past a nacked message until the next restart.
fn settle(
    consumer: &impl PartitionControl,
    tracker: &mut OffsetTracker,
    subscription: &str,
    settled: &Settled,
) -> Result<(), BrokerError> {
    match settled.disposition {
        Disposition::Handled => {
            let Some(position) = tracker.handled(&settled.topic, settled.partition, settled.offset)
            else {
                return Ok(());
            };
            if let Err(e) = consumer.commit_position(&settled.topic, settled.partition, position) {
                tracing::warn!(
                    subscription,
                    partition = settled.partition,
                    offset = settled.offset,
                    error = %e,
                    "Failed to commit offset (message may be redelivered)"
                );
            }
            Ok(())
        }
        Disposition::Retry => consumer
            .seek_to(&settled.topic, settled.partition, settled.offset)
            .map_err(|e| BrokerError::StreamFailed {
                subscription: subscription.to_string(),
                reason: format!(
                    "Failed to seek partition {} back to offset {}: {e}",
                    settled.partition, settled.offset
                ),
            }),
    }
}

impl Broker for RedpandaBroker {
    fn name(&self) -> &str {
        "redpanda"
    }

    fn publish(
        &self,
        topic: &str,
        message: OutboundMessage,
    ) -> Pin<Box<dyn Future<Output = Result<String, BrokerError>> + Send + '_>> {
        let topic = topic.to_string();
        let timeout = self.timeout;

        Box::pin(async move {
            let headers = to_headers(&message.attributes);
            let mut record = FutureRecord::<str, [u8]>::to(&topic)
                .payload(&message.data)
                .headers(headers);
            // Same reference id, same partition: keeps one entity's events in order.
            if let Some(key) = message.attributes.get(keys::REFERENCE_ID) {
                record = record.key(key.as_str());
            }

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition,
                        offset,
                        "Message published"
                    );
                    Ok(message_id(partition, offset))
                }
                Err((kafka_error, _)) => {
                    tracing::error!(topic = %topic, error = %kafka_error, "Failed to publish message");
                    Err(BrokerError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    #[allow(clippy::too_many_lines)] // Receive loop, settlement and drain belong together
    fn receive(
        &self,
        subscription: &str,
        settings: ReceiveSettings,
        handler: Arc<dyn DeliveryHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let subscription = subscription.to_string();

        Box::pin(async move {
            let topic = self
                .topic_of(&subscription)
                .ok_or_else(|| BrokerError::UnknownSubscription(subscription.clone()))?
                .to_string();
            let consumer = self.consumer(&subscription, &topic)?;

            tracing::info!(
                subscription = %subscription,
                topic = %topic,
                max_outstanding = settings.max_outstanding,
                "Streaming receive started"
            );

            let permits = Arc::new(Semaphore::new(settings.max_outstanding));
            let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Settled>();
            let mut tracker = OffsetTracker::default();
            let mut ready: Option<OwnedSemaphorePermit> = None;
            let mut stream = consumer.stream();

            let outcome = loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break Ok(());
                        }
                    }
                    Some(settled) = done_rx.recv() => {
                        if let Err(e) = settle(&consumer, &mut tracker, &subscription, &settled) {
                            break Err(e);
                        }
                    }
                    acquired = Arc::clone(&permits).acquire_owned(), if ready.is_none() => {
                        match acquired {
                            Ok(permit) => ready = Some(permit),
                            Err(e) => break Err(BrokerError::Other(e.to_string())),
                        }
                    }
                    next = stream.next(), if ready.is_some() => {
                        let message = match next {
                            Some(Ok(message)) => message,
                            Some(Err(e)) => break Err(BrokerError::StreamFailed {
                                subscription: subscription.clone(),
                                reason: e.to_string(),
                            }),
                            None => break Err(BrokerError::StreamFailed {
                                subscription: subscription.clone(),
                                reason: "consumer stream ended".to_string(),
                            }),
                        };

                        let attempt = tracker.start(message.topic(), message.partition(), message.offset());
                        let delivery = to_broker_message(&message).with_delivery_attempt(attempt);
                        let settled_topic = message.topic().to_string();
                        let (partition, offset) = (message.partition(), message.offset());

                        let permit = ready.take();
                        let handler = Arc::clone(&handler);
                        let done_tx = done_tx.clone();
                        tokio::spawn(async move {
                            let disposition = handler.deliver(delivery).await;
                            let _ = done_tx.send(Settled {
                                topic: settled_topic,
                                partition,
                                offset,
                                disposition,
                            });
                            drop(permit);
                        });
                    }
                }
            };

            // In-flight handlers settle before leaving the group, stopped or failed.
            drop(ready);
            drop(done_tx);
            while let Some(settled) = done_rx.recv().await {
                if let Err(e) = settle(&consumer, &mut tracker, &subscription, &settled) {
                    tracing::warn!(
                        subscription = %subscription,
                        error = %e,
                        "Nacked message redelivered after restart"
                    );
                }
            }

            match &outcome {
                Ok(()) => tracing::info!(subscription = %subscription, "Streaming receive stopped"),
                Err(e) => tracing::warn!(
                    subscription = %subscription,
                    unsettled = tracker.pending(),
                    error = %e,
                    "Streaming receive failed"
                ),
            }

            outcome
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use rdkafka::error::KafkaError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakePartitions {
        fail_seek: bool,
        commits: Mutex<Vec<(String, i32, i64)>>,
        seeks: Mutex<Vec<(String, i32, i64)>>,
    }

    impl PartitionControl for FakePartitions {
        fn commit_position(&self, topic: &str, partition: i32, position: i64) -> KafkaResult<()> {
            self.commits
                .lock()
                .unwrap()
                .push((topic.to_string(), partition, position));
            Ok(())
        }

        fn seek_to(&self, topic: &str, partition: i32, offset: i64) -> KafkaResult<()> {
            if self.fail_seek {
                return Err(KafkaError::Seek("Local: Erroneous state".to_string()));
            }
            self.seeks
                .lock()
                .unwrap()
                .push((topic.to_string(), partition, offset));
            Ok(())
        }
    }

    fn outcome(offset: i64, disposition: Disposition) -> Settled {
        Settled {
            topic: "logistics-events".to_string(),
            partition: 0,
            offset,
            disposition,
        }
    }

    #[test]
    fn redpanda_broker_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaBroker>();
        assert_sync::<RedpandaBroker>();
    }

    #[test]
    fn builder_requires_brokers() {
        let result = RedpandaBroker::builder().build();
        assert!(matches!(result, Err(BrokerError::ConnectionFailed(_))));
    }

    #[test]
    fn message_id_joins_partition_and_offset() {
        assert_eq!(message_id(3, 1042), "3-1042");
    }

    #[test]
    fn headers_carry_every_attribute() {
        let attributes = HashMap::from([
            ("eventType".to_string(), "orderSubmitted".to_string()),
            ("referenceID".to_string(), "A1".to_string()),
        ]);
        let headers = to_headers(&attributes);

        let mut seen: Vec<(String, String)> = headers
            .iter()
            .map(|h| {
                (
                    h.key.to_string(),
                    String::from_utf8_lossy(h.value.unwrap_or_default()).into_owned(),
                )
            })
            .collect();
        seen.sort();
        assert_eq!(
            seen,
            vec![
                ("eventType".to_string(), "orderSubmitted".to_string()),
                ("referenceID".to_string(), "A1".to_string()),
            ]
        );
    }

    #[test]
    fn handled_commits_the_next_position() {
        let partitions = FakePartitions::default();
        let mut tracker = OffsetTracker::default();
        tracker.start("logistics-events", 0, 41);

        settle(&partitions, &mut tracker, "orders", &outcome(41, Disposition::Handled)).unwrap();

        assert_eq!(
            *partitions.commits.lock().unwrap(),
            vec![("logistics-events".to_string(), 0, 42)]
        );
    }

    #[test]
    fn retry_seeks_back_to_the_message() {
        let partitions = FakePartitions::default();
        let mut tracker = OffsetTracker::default();
        tracker.start("logistics-events", 0, 7);

        settle(&partitions, &mut tracker, "orders", &outcome(7, Disposition::Retry)).unwrap();

        assert_eq!(
            *partitions.seeks.lock().unwrap(),
            vec![("logistics-events".to_string(), 0, 7)]
        );
        assert_eq!(tracker.pending(), 1);
    }

    #[test]
    fn failed_seek_ends_the_stream() {
        let partitions = FakePartitions {
            fail_seek: true,
            ..FakePartitions::default()
        };
        let mut tracker = OffsetTracker::default();
        tracker.start("logistics-events", 0, 7);

        let result = settle(&partitions, &mut tracker, "orders", &outcome(7, Disposition::Retry));

        assert!(matches!(
            &result,
            Err(BrokerError::StreamFailed { subscription, reason })
                if subscription == "orders" && reason.contains("offset 7")
        ));
        // The nacked offset still blocks the commit position.
        assert_eq!(tracker.pending(), 1);
        assert!(partitions.commits.lock().unwrap().is_empty());
    }

    #[test]
    fn consumer_config_sets_poll_interval() {
        let broker = RedpandaBroker::builder()
            .brokers("localhost:9092")
            .max_poll_interval(Duration::from_secs(900))
            .subscription("orders-submitted", "logistics-events")
            .build()
            .unwrap();

        let config = broker.consumer_config("orders-submitted");

        assert_eq!(config.get("max.poll.interval.ms"), Some("900000"));
        assert_eq!(config.get("group.id"), Some("orders-submitted"));
        assert_eq!(config.get("enable.auto.commit"), Some("false"));
    }

    #[test]
    fn poll_interval_defaults_to_five_minutes() {
        let broker = RedpandaBroker::builder()
            .brokers("localhost:9092")
            .build()
            .unwrap();

        assert_eq!(
            broker.consumer_config("orders").get("max.poll.interval.ms"),
            Some("300000")
        );
    }
}
