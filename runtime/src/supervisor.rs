//! Lifecycle owner for the pull dispatchers.
//!
//! The [`Supervisor`] holds the stop signal shared by every dispatcher and the
//! join handles of their tasks. `shutdown()` flips the signal and waits for
//! every dispatcher (and its in-flight deliveries) to finish, bounded by a
//! timeout.
//!
//! ```ignore
//! let mut supervisor = Supervisor::new(Duration::from_secs(30));
//! supervisor.spawn_all(&registry, broker, Duration::from_secs(10));
//!
//! wait_for_signal().await;
//! supervisor.shutdown().await?;
//! ```

use crate::dispatcher::PullDispatcher;
use crate::registry::SubscriptionRegistry;
use courier_core::broker::Broker;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Errors reported by [`Supervisor::shutdown`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    /// Some dispatchers did not stop within the timeout
    #[error("Dispatchers did not stop within {timeout:?}: {subscriptions:?}")]
    Timeout {
        /// How long shutdown waited
        timeout: Duration,
        /// Subscriptions whose dispatcher was still running
        subscriptions: Vec<String>,
    },

    /// A dispatcher task panicked
    #[error("Dispatcher for '{subscription}' panicked: {reason}")]
    Panicked {
        /// Subscription of the failed dispatcher
        subscription: String,
        /// Join error message
        reason: String,
    },
}

/// Owns the stop signal and every running dispatcher.
pub struct Supervisor {
    stop: watch::Sender<bool>,
    tasks: Vec<(String, JoinHandle<()>)>,
    timeout: Duration,
}

impl Supervisor {
    /// Create a supervisor whose shutdown waits at most `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            stop,
            tasks: Vec::new(),
            timeout,
        }
    }

    /// A receiver of the stop signal, for other components (e.g. the HTTP server).
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    /// Spawn one dispatcher on the current runtime.
    pub fn spawn(&mut self, dispatcher: PullDispatcher) {
        let subscription = dispatcher.subscription().to_string();
        let handle = tokio::spawn(dispatcher.run(self.stop.subscribe()));
        self.tasks.push((subscription, handle));
    }

    /// Spawn a dispatcher for every binding in `registry`.
    pub fn spawn_all(
        &mut self,
        registry: &SubscriptionRegistry,
        broker: &Arc<dyn Broker>,
        restart_delay: Duration,
    ) {
        for binding in registry.iter() {
            self.spawn(
                PullDispatcher::new(Arc::clone(broker), binding.clone())
                    .with_restart_delay(restart_delay),
            );
        }
    }

    /// Number of dispatchers spawned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no dispatcher was spawned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Whether any dispatcher task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|(_, handle)| !handle.is_finished())
    }

    /// Signal every dispatcher to stop and wait for them.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Timeout`] if dispatchers are still running
    /// after the timeout (they are aborted), or
    /// [`SupervisorError::Panicked`] if a dispatcher task panicked.
    pub async fn shutdown(self) -> Result<(), SupervisorError> {
        info!(
            dispatchers = self.tasks.len(),
            timeout = ?self.timeout,
            "Stopping pull dispatchers"
        );

        self.stop.send_replace(true);

        let (names, handles): (Vec<_>, Vec<_>) = self.tasks.into_iter().unzip();
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();

        let Ok(results) =
            tokio::time::timeout(self.timeout, futures::future::join_all(handles)).await
        else {
            let subscriptions: Vec<String> = names
                .into_iter()
                .zip(&aborts)
                .filter(|(_, abort)| !abort.is_finished())
                .map(|(name, _)| name)
                .collect();
            for abort in &aborts {
                abort.abort();
            }
            error!(?subscriptions, "Dispatchers did not stop in time, aborted");
            return Err(SupervisorError::Timeout {
                timeout: self.timeout,
                subscriptions,
            });
        };

        for (subscription, result) in names.into_iter().zip(results) {
            if let Err(e) = result {
                error!(subscription = %subscription, error = %e, "Dispatcher task failed");
                return Err(SupervisorError::Panicked {
                    subscription,
                    reason: e.to_string(),
                });
            }
        }

        info!("All pull dispatchers stopped");
        Ok(())
    }
}

/// Wait for SIGTERM or Ctrl+C.
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler, waiting for Ctrl+C only");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to wait for Ctrl+C");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C"),
            Err(e) => error!(error = %e, "Failed to wait for Ctrl+C"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use courier_core::message::OutboundMessage;
    use courier_testing::{InMemoryBroker, ScriptedProcessor};

    fn registry(processor: &ScriptedProcessor) -> SubscriptionRegistry {
        let mut registry = SubscriptionRegistry::new();
        registry
            .bind("orders", 2, Arc::new(processor.clone()))
            .unwrap()
            .bind("plans", 2, Arc::new(processor.clone()))
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn spawn_all_runs_every_binding_until_shutdown() {
        let memory = InMemoryBroker::new();
        memory.create_subscription("orders", "order-events");
        memory.create_subscription("plans", "plan-events");
        let broker: Arc<dyn Broker> = Arc::new(memory.clone());
        let processor = ScriptedProcessor::new("all");

        let mut supervisor = Supervisor::new(Duration::from_secs(5));
        supervisor.spawn_all(&registry(&processor), &broker, Duration::from_millis(10));
        assert_eq!(supervisor.len(), 2);
        assert!(supervisor.is_running());

        broker
            .publish("order-events", OutboundMessage::default())
            .await
            .unwrap();
        broker
            .publish("plan-events", OutboundMessage::default())
            .await
            .unwrap();

        assert!(
            memory
                .wait_until(Duration::from_secs(5), |b| {
                    b.acked("orders").len() == 1 && b.acked("plans").len() == 1
                })
                .await
        );

        let stop = supervisor.subscribe();
        supervisor.shutdown().await.unwrap();
        assert!(*stop.borrow());
    }

    #[tokio::test]
    async fn shutdown_without_dispatchers_succeeds() {
        let supervisor = Supervisor::new(Duration::from_millis(100));
        assert!(supervisor.is_empty());
        assert!(!supervisor.is_running());
        tokio_test::assert_ok!(supervisor.shutdown().await);
    }

    #[tokio::test]
    async fn slow_processor_hits_the_timeout() {
        let memory = InMemoryBroker::new();
        memory.create_subscription("orders", "order-events");
        let broker: Arc<dyn Broker> = Arc::new(memory.clone());
        let processor = ScriptedProcessor::new("slow").with_delay(Duration::from_secs(30));

        let mut registry = SubscriptionRegistry::new();
        registry
            .bind("orders", 1, Arc::new(processor.clone()))
            .unwrap();

        let mut supervisor = Supervisor::new(Duration::from_millis(50));
        supervisor.spawn_all(&registry, &broker, Duration::from_millis(10));
        broker
            .publish("order-events", OutboundMessage::default())
            .await
            .unwrap();
        assert!(
            memory
                .wait_until(Duration::from_secs(5), |_| processor.calls() == 1)
                .await
        );

        let err = supervisor.shutdown().await.unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::Timeout { ref subscriptions, .. } if subscriptions == &["orders".to_string()]
        ));
    }
}
