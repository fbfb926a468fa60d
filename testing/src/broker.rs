//! In-memory broker for fast, deterministic delivery tests.
//!
//! [`InMemoryBroker`] implements the [`Broker`] trait with topics, named
//! subscriptions and per-subscription queues:
//! - Publishing fans a message out to every subscription of the topic
//! - `Handled` deliveries are acknowledged and recorded
//! - `Retry` deliveries are recorded and requeued with an incremented attempt
//! - At most `max_outstanding` deliveries are in flight per receive
//! - Stream and publish failures can be injected
//!
//! # Example
//!
//! ```
//! use courier_testing::InMemoryBroker;
//! use courier_core::broker::Broker;
//! use courier_core::message::OutboundMessage;
//! use std::collections::HashMap;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = InMemoryBroker::new();
//! broker.create_subscription("orders", "logistics-events");
//!
//! let id = broker
//!     .publish("logistics-events", OutboundMessage::new(HashMap::new(), b"{}".to_vec()))
//!     .await?;
//! assert_eq!(broker.pending("orders"), 1);
//! # let _ = id;
//! # Ok(())
//! # }
//! ```

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Locks are never poisoned in practice

use courier_core::broker::{Broker, BrokerError, DeliveryHandler, ReceiveSettings};
use courier_core::message::{BrokerMessage, OutboundMessage};
use courier_core::processor::Disposition;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore, watch};

/// A message accepted by [`InMemoryBroker::publish`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Topic the message was published to.
    pub topic: String,
    /// Broker-assigned id.
    pub id: String,
    /// The published message.
    pub message: OutboundMessage,
}

#[derive(Default)]
struct SubscriptionState {
    topic: String,
    queue: VecDeque<BrokerMessage>,
    notify: Arc<Notify>,
    acked: Vec<String>,
    nacked: Vec<String>,
    attempts: HashMap<String, u32>,
    injected_failures: VecDeque<String>,
    receive_calls: usize,
}

#[derive(Default)]
struct State {
    subscriptions: HashMap<String, SubscriptionState>,
    published: Vec<PublishedMessage>,
    publish_failure: Option<String>,
}

struct Inner {
    name: String,
    state: Mutex<State>,
    next_id: AtomicU64,
    redelivery_delay: Duration,
}

/// In-memory [`Broker`] with fault injection.
///
/// Cloning is cheap; clones share the same topics and subscriptions.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    /// Create an empty broker named `"memory"`.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start configuring a broker.
    #[must_use]
    pub fn builder() -> InMemoryBrokerBuilder {
        InMemoryBrokerBuilder::default()
    }

    /// Create (or re-point) a subscription on a topic.
    pub fn create_subscription(&self, subscription: impl Into<String>, topic: impl Into<String>) {
        let mut state = self.inner.state.lock().unwrap();
        let entry = state.subscriptions.entry(subscription.into()).or_default();
        entry.topic = topic.into();
    }

    /// Make every following publish fail with `reason`, or succeed again with `None`.
    pub fn set_publish_failure(&self, reason: Option<&str>) {
        self.inner.state.lock().unwrap().publish_failure = reason.map(str::to_string);
    }

    /// Make the current (or next) streaming receive on `subscription` fail.
    pub fn fail_stream(&self, subscription: &str, reason: impl Into<String>) {
        let mut state = self.inner.state.lock().unwrap();
        if let Some(sub) = state.subscriptions.get_mut(subscription) {
            sub.injected_failures.push_back(reason.into());
            sub.notify.notify_one();
        }
    }

    /// Deliver a message straight into a subscription's queue.
    pub fn enqueue(&self, subscription: &str, message: BrokerMessage) {
        let mut state = self.inner.state.lock().unwrap();
        if let Some(sub) = state.subscriptions.get_mut(subscription) {
            sub.queue.push_back(message);
            sub.notify.notify_one();
        }
    }

    /// Every message accepted by `publish`, in order.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.inner.state.lock().unwrap().published.clone()
    }

    /// Ids acknowledged on `subscription`, in acknowledgement order.
    #[must_use]
    pub fn acked(&self, subscription: &str) -> Vec<String> {
        self.read(subscription, |sub| sub.acked.clone())
    }

    /// Ids negatively acknowledged on `subscription`, in order.
    #[must_use]
    pub fn nacked(&self, subscription: &str) -> Vec<String> {
        self.read(subscription, |sub| sub.nacked.clone())
    }

    /// Messages waiting in `subscription`'s queue.
    #[must_use]
    pub fn pending(&self, subscription: &str) -> usize {
        self.read(subscription, |sub| sub.queue.len())
    }

    /// How many times a streaming receive was opened on `subscription`.
    #[must_use]
    pub fn receive_calls(&self, subscription: &str) -> usize {
        self.read(subscription, |sub| sub.receive_calls)
    }

    /// Poll until `condition` holds or `timeout` elapses.
    ///
    /// Returns whether the condition was met.
    pub async fn wait_until<F>(&self, timeout: Duration, condition: F) -> bool
    where
        F: Fn(&Self) -> bool,
    {
        let poll = async {
            while !condition(self) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }

    fn read<T: Default>(&self, subscription: &str, f: impl FnOnce(&SubscriptionState) -> T) -> T {
        self.inner
            .state
            .lock()
            .unwrap()
            .subscriptions
            .get(subscription)
            .map(f)
            .unwrap_or_default()
    }

    fn settle(&self, subscription: &str, message: BrokerMessage, disposition: Disposition) {
        let mut state = self.inner.state.lock().unwrap();
        let Some(sub) = state.subscriptions.get_mut(subscription) else {
            return;
        };
        match disposition {
            Disposition::Handled => sub.acked.push(message.id),
            Disposition::Retry => {
                sub.nacked.push(message.id.clone());
                sub.queue.push_back(message);
                sub.notify.notify_one();
            }
        }
    }

    /// Next event for a receive loop: a message, an injected failure, or nothing yet.
    fn poll_next(&self, subscription: &str) -> Result<Next, BrokerError> {
        let mut state = self.inner.state.lock().unwrap();
        let Some(sub) = state.subscriptions.get_mut(subscription) else {
            return Err(BrokerError::UnknownSubscription(subscription.to_string()));
        };
        if let Some(reason) = sub.injected_failures.pop_front() {
            return Ok(Next::Failed(reason));
        }
        match sub.queue.pop_front() {
            Some(mut message) => {
                let attempt = sub.attempts.entry(message.id.clone()).or_insert(0);
                *attempt += 1;
                message.delivery_attempt = Some(*attempt);
                Ok(Next::Message(message))
            }
            None => Ok(Next::Empty(Arc::clone(&sub.notify))),
        }
    }
}

enum Next {
    Message(BrokerMessage),
    Failed(String),
    Empty(Arc<Notify>),
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for an [`InMemoryBroker`].
#[derive(Default)]
pub struct InMemoryBrokerBuilder {
    name: Option<String>,
    redelivery_delay: Option<Duration>,
}

impl InMemoryBrokerBuilder {
    /// Broker name used in envelope sources (default `"memory"`).
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Delay before a nacked message becomes deliverable again (default: none).
    #[must_use]
    pub const fn redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = Some(delay);
        self
    }

    /// Build the broker.
    #[must_use]
    pub fn build(self) -> InMemoryBroker {
        InMemoryBroker {
            inner: Arc::new(Inner {
                name: self.name.unwrap_or_else(|| "memory".to_string()),
                state: Mutex::new(State::default()),
                next_id: AtomicU64::new(1),
                redelivery_delay: self.redelivery_delay.unwrap_or(Duration::ZERO),
            }),
        }
    }
}

impl Broker for InMemoryBroker {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn publish(
        &self,
        topic: &str,
        message: OutboundMessage,
    ) -> Pin<Box<dyn Future<Output = Result<String, BrokerError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let mut state = self.inner.state.lock().unwrap();
            if let Some(reason) = &state.publish_failure {
                return Err(BrokerError::PublishFailed {
                    topic,
                    reason: reason.clone(),
                });
            }

            let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst).to_string();
            for sub in state.subscriptions.values_mut().filter(|s| s.topic == topic) {
                sub.queue.push_back(BrokerMessage::new(
                    id.clone(),
                    message.attributes.clone(),
                    message.data.clone(),
                ));
                sub.notify.notify_one();
            }
            state.published.push(PublishedMessage {
                topic,
                id: id.clone(),
                message,
            });
            drop(state);

            Ok(id)
        })
    }

    fn receive(
        &self,
        subscription: &str,
        settings: ReceiveSettings,
        handler: Arc<dyn DeliveryHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let subscription = subscription.to_string();
        Box::pin(async move {
            {
                let mut state = self.inner.state.lock().unwrap();
                let sub = state
                    .subscriptions
                    .get_mut(&subscription)
                    .ok_or_else(|| BrokerError::UnknownSubscription(subscription.clone()))?;
                sub.receive_calls += 1;
            }

            let ceiling = settings.max_outstanding;
            let permits = Arc::new(Semaphore::new(ceiling));

            let outcome = loop {
                if *shutdown.borrow() {
                    break Ok(());
                }

                // Flow control: wait for a free slot before taking a message.
                let permit = tokio::select! {
                    permit = Arc::clone(&permits).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(e) => break Err(BrokerError::Other(e.to_string())),
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break Ok(());
                        }
                        continue;
                    }
                };

                let message = match self.poll_next(&subscription) {
                    Ok(Next::Message(message)) => message,
                    Ok(Next::Failed(reason)) => {
                        break Err(BrokerError::StreamFailed {
                            subscription: subscription.clone(),
                            reason,
                        });
                    }
                    Ok(Next::Empty(notify)) => {
                        drop(permit);
                        tokio::select! {
                            () = notify.notified() => {}
                            changed = shutdown.changed() => {
                                if changed.is_err() {
                                    break Ok(());
                                }
                            }
                        }
                        continue;
                    }
                    Err(e) => break Err(e),
                };

                let broker = self.clone();
                let handler = Arc::clone(&handler);
                let subscription = subscription.clone();
                tokio::spawn(async move {
                    let disposition = handler.deliver(message.clone()).await;
                    if disposition == Disposition::Retry && !broker.inner.redelivery_delay.is_zero() {
                        tokio::time::sleep(broker.inner.redelivery_delay).await;
                    }
                    broker.settle(&subscription, message, disposition);
                    drop(permit);
                });
            };

            // In-flight deliveries settle before the receive returns, clean stop or not.
            let all = u32::try_from(ceiling).unwrap_or(u32::MAX);
            let _drained = permits.acquire_many(all).await;
            outcome
        })
    }
}
