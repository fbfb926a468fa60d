//! The per-message path shared by both transports.
//!
//! [`process_envelope`] wraps one processor call in a consumer span parented
//! on the producer's trace, logs the outcome and records delivery metrics.
//! [`EnvelopeHandler`] adapts it to the broker's [`DeliveryHandler`] callback
//! for the pull path; the push adapter calls [`process_envelope`] directly.

use crate::metrics::DeliveryMetrics;
use crate::propagation::consumer_span;
use crate::registry::Binding;
use courier_core::broker::DeliveryHandler;
use courier_core::envelope::Envelope;
use courier_core::message::BrokerMessage;
use courier_core::processor::{Disposition, ProcessContext, Processor, ProcessorOutcome, Transport};
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;
use tracing::Instrument;

/// Run one envelope through a processor.
///
/// Logging by outcome:
/// - `Retry`: error level; the message will be redelivered
/// - `Handled` with an error: warn level; the message is dropped
/// - `Handled` without an error: debug level
pub async fn process_envelope(
    processor: &dyn Processor,
    ctx: &ProcessContext,
    envelope: Envelope,
) -> ProcessorOutcome {
    let span = consumer_span(&ctx.subscription, &envelope);
    let started = Instant::now();

    let outcome = processor.process(ctx, envelope).instrument(span.clone()).await;
    let disposition = outcome.disposition();

    DeliveryMetrics::record(&ctx.subscription, ctx.transport, disposition, started.elapsed());

    match (disposition, &outcome.error) {
        (Disposition::Retry, Some(err)) => tracing::error!(
            parent: &span,
            processor = processor.name(),
            status = outcome.status,
            error = %err,
            "Processing failed, message will be redelivered"
        ),
        (Disposition::Retry, None) => tracing::error!(
            parent: &span,
            processor = processor.name(),
            status = outcome.status,
            "Processor requested redelivery"
        ),
        (Disposition::Handled, Some(err)) => tracing::warn!(
            parent: &span,
            processor = processor.name(),
            status = outcome.status,
            error = %err,
            "Processing failed permanently, message dropped"
        ),
        (Disposition::Handled, None) => tracing::debug!(
            parent: &span,
            processor = processor.name(),
            status = outcome.status,
            "Message handled"
        ),
    }

    outcome
}

/// Pull-path [`DeliveryHandler`] for one binding.
pub struct EnvelopeHandler {
    binding: Binding,
    source: String,
}

impl EnvelopeHandler {
    /// Create a handler; envelopes get the source `"<broker>/<subscription>"`.
    #[must_use]
    pub fn new(broker_name: &str, binding: Binding) -> Self {
        let source = format!("{broker_name}/{}", binding.name());
        Self { binding, source }
    }

    /// Envelope source used for every delivery.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl DeliveryHandler for EnvelopeHandler {
    fn deliver(
        &self,
        message: BrokerMessage,
    ) -> Pin<Box<dyn Future<Output = Disposition> + Send + '_>> {
        Box::pin(async move {
            let envelope = Envelope::from_message(&message, self.source.clone());
            let ctx = ProcessContext::new(self.binding.name(), Transport::Pull)
                .with_delivery_attempt(message.delivery_attempt);

            process_envelope(self.binding.processor().as_ref(), &ctx, envelope)
                .await
                .disposition()
        })
    }
}
