//! Pull dispatcher: one supervised streaming receive per subscription.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  receive()   ┌────────┐  deliver()  ┌─────────────────┐
//! │ Dispatcher │ ───────────► │ Broker │ ──────────► │ EnvelopeHandler │ → Processor
//! └─────┬──────┘              └───┬────┘             └─────────────────┘
//!       │   Err(stream failed)    │
//!       │ ◄───────────────────────┘
//!       │ wait restart_delay, then receive() again
//! ```
//!
//! Restarts are unbounded and use a fixed delay with no backoff. The delay is
//! cut short by the stop signal, so shutdown never waits for it.

use crate::delivery::EnvelopeHandler;
use crate::metrics::DispatcherMetrics;
use crate::registry::Binding;
use courier_core::broker::{Broker, DeliveryHandler};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Delay between a stream failure and the next receive.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(10);

/// Supervised streaming receive for one subscription binding.
pub struct PullDispatcher {
    broker: Arc<dyn Broker>,
    binding: Binding,
    restart_delay: Duration,
}

impl PullDispatcher {
    /// Create a dispatcher with the default 10 second restart delay.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, binding: Binding) -> Self {
        Self {
            broker,
            binding,
            restart_delay: DEFAULT_RESTART_DELAY,
        }
    }

    /// Override the restart delay.
    #[must_use]
    pub const fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Subscription this dispatcher receives from.
    #[must_use]
    pub fn subscription(&self) -> &str {
        self.binding.name()
    }

    /// Delay applied after a stream failure.
    #[must_use]
    pub const fn restart_delay(&self) -> Duration {
        self.restart_delay
    }

    /// Run until the stop signal flips to `true` (or its sender is dropped).
    ///
    /// A failed stream is logged at error level and restarted on the
    /// identical subscription after the restart delay.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let subscription = self.binding.name().to_string();
        let settings = self.binding.settings();
        let handler: Arc<dyn DeliveryHandler> =
            Arc::new(EnvelopeHandler::new(self.broker.name(), self.binding.clone()));

        tracing::info!(
            subscription = %subscription,
            broker = self.broker.name(),
            max_outstanding = settings.max_outstanding,
            "Starting pull dispatcher"
        );

        while !*shutdown.borrow() {
            let result = self
                .broker
                .receive(&subscription, settings, Arc::clone(&handler), shutdown.clone())
                .await;

            match result {
                Ok(()) => break,
                Err(e) => {
                    tracing::error!(
                        subscription = %subscription,
                        error = %e,
                        restart_in_secs = self.restart_delay.as_secs_f64(),
                        "Subscription stream failed, restarting"
                    );
                    DispatcherMetrics::record_restart(&subscription);

                    tokio::select! {
                        () = tokio::time::sleep(self.restart_delay) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        tracing::info!(subscription = %subscription, "Pull dispatcher stopped");
    }
}
