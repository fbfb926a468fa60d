//! A recording processor with scripted outcomes.
//!
//! [`ScriptedProcessor`] records every envelope it sees, replies with the next
//! scripted status (falling back to a default once the script runs out) and
//! tracks how many calls overlapped, so flow-control ceilings can be asserted.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Locks are never poisoned in practice

use courier_core::envelope::Envelope;
use courier_core::processor::{ProcessContext, Processor, ProcessorOutcome};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted reply: a status and an optional error message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptedReply {
    /// Status code to return.
    pub status: u16,
    /// Error message to attach, if any.
    pub error: Option<String>,
}

impl ScriptedReply {
    fn outcome(&self) -> ProcessorOutcome {
        ProcessorOutcome {
            status: self.status,
            error: self.error.as_ref().map(|e| anyhow::anyhow!(e.clone())),
        }
    }
}

#[derive(Default)]
struct Recorded {
    envelopes: Vec<Envelope>,
    contexts: Vec<ProcessContext>,
    script: VecDeque<ScriptedReply>,
}

/// Processor double for dispatcher and push adapter tests.
///
/// Clones share the same recording.
#[derive(Clone)]
pub struct ScriptedProcessor {
    name: String,
    default: ScriptedReply,
    delay: Duration,
    recorded: Arc<Mutex<Recorded>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedProcessor {
    /// A processor that always returns `200`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: ScriptedReply {
                status: 200,
                error: None,
            },
            delay: Duration::ZERO,
            recorded: Arc::new(Mutex::new(Recorded::default())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Reply with `status` once the script is exhausted.
    #[must_use]
    pub fn with_default(mut self, status: u16, error: Option<&str>) -> Self {
        self.default = ScriptedReply {
            status,
            error: error.map(str::to_string),
        };
        self
    }

    /// Sleep this long inside every call.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue one reply; replies are consumed in order.
    #[must_use]
    pub fn then_reply(self, status: u16, error: Option<&str>) -> Self {
        self.recorded.lock().unwrap().script.push_back(ScriptedReply {
            status,
            error: error.map(str::to_string),
        });
        self
    }

    /// Envelopes seen so far, in call order.
    #[must_use]
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.recorded.lock().unwrap().envelopes.clone()
    }

    /// Contexts seen so far, in call order.
    #[must_use]
    pub fn contexts(&self) -> Vec<ProcessContext> {
        self.recorded.lock().unwrap().contexts.clone()
    }

    /// Number of calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.recorded.lock().unwrap().envelopes.len()
    }

    /// Highest number of calls observed running at the same time.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Processor for ScriptedProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn process<'a>(
        &'a self,
        ctx: &'a ProcessContext,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = ProcessorOutcome> + Send + 'a>> {
        Box::pin(async move {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);

            let reply = {
                let mut recorded = self.recorded.lock().unwrap();
                recorded.envelopes.push(envelope);
                recorded.contexts.push(ctx.clone());
                recorded.script.pop_front()
            };

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            reply.unwrap_or_else(|| self.default.clone()).outcome()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::processor::Transport;

    #[tokio::test]
    async fn replies_follow_the_script_then_the_default() {
        let processor = ScriptedProcessor::new("orders")
            .with_default(204, None)
            .then_reply(503, Some("downstream unavailable"));
        let ctx = ProcessContext::new("orders", Transport::Pull);

        let first = processor.process(&ctx, Envelope::default()).await;
        let second = processor.process(&ctx, Envelope::default()).await;

        assert_eq!(first.status, 503);
        assert_eq!(
            first.error.map(|e| e.to_string()),
            Some("downstream unavailable".to_string())
        );
        assert_eq!(second.status, 204);
        assert_eq!(processor.calls(), 2);
        assert_eq!(processor.contexts()[0].subscription, "orders");
    }
}
