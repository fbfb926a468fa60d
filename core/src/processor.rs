//! The processor contract.
//!
//! Every piece of business logic that reacts to an event implements
//! [`Processor`]: `process(context, envelope) -> (status, error)`. The status
//! code is the only thing the transports look at:
//!
//! | Status | [`Disposition`] | Pull | Push |
//! |---|---|---|---|
//! | `< 500` | `Handled` | ack | `200`, or `204` when an error is attached |
//! | `>= 500` | `Retry` | nack (redeliver) | the status itself |
//!
//! Permanent failures (malformed payload, validation) should be reported with
//! a 4xx status: redelivery cannot repair them, so they are drained. Transient
//! failures (downstream unavailable, timeouts) use 5xx.
//!
//! Delivery is at-least-once, so processors must tolerate seeing the same
//! envelope more than once.
//!
//! # Sharing one subscription across event types
//!
//! [`EventTypeFilter`] and [`JsonProcessor`] acknowledge and discard envelopes
//! whose `eventType` extension does not match, without running business logic.

use crate::envelope::Envelope;
use serde::de::DeserializeOwned;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// First status code treated as a transient failure.
pub const RETRY_THRESHOLD: u16 = 500;

/// Which transport delivered an envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transport {
    /// Streaming pull subscription.
    Pull,
    /// HTTP push endpoint.
    Push,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pull => write!(f, "pull"),
            Self::Push => write!(f, "push"),
        }
    }
}

/// Per-delivery context handed to a processor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessContext {
    /// Subscription the envelope was delivered on.
    pub subscription: String,
    /// Transport that delivered it.
    pub transport: Transport,
    /// Delivery attempt, when the transport reports one.
    pub delivery_attempt: Option<u32>,
}

impl ProcessContext {
    /// Create a context for a delivery.
    #[must_use]
    pub fn new(subscription: impl Into<String>, transport: Transport) -> Self {
        Self {
            subscription: subscription.into(),
            transport,
            delivery_attempt: None,
        }
    }

    /// Attach a delivery attempt.
    #[must_use]
    pub const fn with_delivery_attempt(mut self, attempt: Option<u32>) -> Self {
        self.delivery_attempt = attempt;
        self
    }
}

/// The ack/nack decision derived from a status code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Acknowledge; the broker will not redeliver.
    Handled,
    /// Negative-acknowledge; the broker redelivers.
    Retry,
}

impl Disposition {
    /// Classify a status code: below 500 is `Handled`, 500 and above is `Retry`.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        if status < RETRY_THRESHOLD {
            Self::Handled
        } else {
            Self::Retry
        }
    }
}

/// What a processor returns: a status code plus an optional error.
#[derive(Debug)]
pub struct ProcessorOutcome {
    /// HTTP-flavoured status code.
    pub status: u16,
    /// Error attached to the outcome, if any.
    pub error: Option<anyhow::Error>,
}

impl ProcessorOutcome {
    /// Success (`200`, no error).
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            status: 200,
            error: None,
        }
    }

    /// A bare status code with no error.
    #[must_use]
    pub const fn status(status: u16) -> Self {
        Self {
            status,
            error: None,
        }
    }

    /// A permanent failure: drained, never redelivered.
    ///
    /// Codes of 500 and above are clamped to `400`.
    #[must_use]
    pub fn handled(status: u16, error: impl Into<anyhow::Error>) -> Self {
        Self {
            status: if status < RETRY_THRESHOLD { status } else { 400 },
            error: Some(error.into()),
        }
    }

    /// A transient failure reported as `503 Service Unavailable`.
    #[must_use]
    pub fn retry(error: impl Into<anyhow::Error>) -> Self {
        Self::retry_with(503, error)
    }

    /// A transient failure with an explicit 5xx status.
    ///
    /// Codes below 500 are clamped to `500`.
    #[must_use]
    pub fn retry_with(status: u16, error: impl Into<anyhow::Error>) -> Self {
        Self {
            status: if status < RETRY_THRESHOLD { 500 } else { status },
            error: Some(error.into()),
        }
    }

    /// The ack/nack decision for this outcome.
    #[must_use]
    pub const fn disposition(&self) -> Disposition {
        Disposition::from_status(self.status)
    }
}

/// The single callback signature all business logic implements.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so processors can be shared as
/// `Arc<dyn Processor>` between the pull dispatcher and the push adapter.
pub trait Processor: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Process one envelope.
    fn process<'a>(
        &'a self,
        ctx: &'a ProcessContext,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = ProcessorOutcome> + Send + 'a>>;
}

/// Acks and discards envelopes whose `eventType` does not match, otherwise
/// delegates to the inner processor.
pub struct EventTypeFilter<P> {
    event_type: String,
    inner: P,
}

impl<P: Processor> EventTypeFilter<P> {
    /// Wrap `inner` so it only sees envelopes of `event_type`.
    #[must_use]
    pub fn new(event_type: impl Into<String>, inner: P) -> Self {
        Self {
            event_type: event_type.into(),
            inner,
        }
    }

    /// The event type this filter lets through.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }
}

impl<P: Processor> Processor for EventTypeFilter<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn process<'a>(
        &'a self,
        ctx: &'a ProcessContext,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = ProcessorOutcome> + Send + 'a>> {
        if envelope.extension("eventType") != Some(self.event_type.as_str()) {
            return Box::pin(async { ProcessorOutcome::ok() });
        }
        self.inner.process(ctx, envelope)
    }
}

/// Typed business logic for one logical event.
///
/// Wrap it in a [`JsonProcessor`] to get a [`Processor`] that filters by event
/// type and decodes the JSON payload first.
pub trait EventHandler: Send + Sync {
    /// Payload type the envelope data decodes into.
    type Payload: DeserializeOwned + Send;

    /// The `eventType` this handler accepts.
    fn event_type(&self) -> &str;

    /// Handle a decoded payload.
    fn handle(
        &self,
        ctx: &ProcessContext,
        payload: Self::Payload,
        envelope: &Envelope,
    ) -> impl Future<Output = ProcessorOutcome> + Send;
}

/// Generic binder from an [`EventHandler`] to a [`Processor`].
///
/// - Envelopes of another event type are acked and discarded (`200`).
/// - Payloads that do not decode are drained with `400`; redelivery cannot fix them.
pub struct JsonProcessor<H> {
    name: String,
    handler: H,
}

impl<H: EventHandler> JsonProcessor<H> {
    /// Create a processor named after the handler's event type.
    #[must_use]
    pub fn new(handler: H) -> Self {
        Self {
            name: handler.event_type().to_string(),
            handler,
        }
    }

    /// The wrapped handler.
    #[must_use]
    pub const fn handler(&self) -> &H {
        &self.handler
    }
}

impl<H: EventHandler> Processor for JsonProcessor<H> {
    fn name(&self) -> &str {
        &self.name
    }

    fn process<'a>(
        &'a self,
        ctx: &'a ProcessContext,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = ProcessorOutcome> + Send + 'a>> {
        Box::pin(async move {
            if envelope.extension("eventType") != Some(self.handler.event_type()) {
                return ProcessorOutcome::ok();
            }

            let payload: H::Payload = match envelope.json() {
                Ok(payload) => payload,
                Err(e) => return ProcessorOutcome::handled(400, e),
            };

            self.handler.handle(ctx, payload, &envelope).await
        })
    }
}

/// A [`Processor`] backed by an async closure.
pub struct FnProcessor<F> {
    name: String,
    f: F,
}

/// Build a [`Processor`] from an async closure.
///
/// # Example
///
/// ```
/// use courier_core::processor::{processor_fn, ProcessorOutcome};
///
/// let processor = processor_fn("noop", |_ctx, _envelope| async { ProcessorOutcome::ok() });
/// ```
pub fn processor_fn<F, Fut>(name: impl Into<String>, f: F) -> FnProcessor<F>
where
    F: Fn(ProcessContext, Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = ProcessorOutcome> + Send + 'static,
{
    FnProcessor {
        name: name.into(),
        f,
    }
}

impl<F, Fut> Processor for FnProcessor<F>
where
    F: Fn(ProcessContext, Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = ProcessorOutcome> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process<'a>(
        &'a self,
        ctx: &'a ProcessContext,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = ProcessorOutcome> + Send + 'a>> {
        Box::pin((self.f)(ctx.clone(), envelope))
    }
}
