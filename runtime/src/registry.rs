//! Subscription bindings.
//!
//! Each subscription name is bound once at startup to exactly one processor
//! and an outstanding-message ceiling. The registry is then frozen behind an
//! `Arc` and shared read-only by the pull dispatchers and the push adapter.

use courier_core::broker::ReceiveSettings;
use courier_core::processor::Processor;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while binding subscriptions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The subscription name is already bound
    #[error("Subscription '{0}' is already bound")]
    Duplicate(String),

    /// The subscription name is empty
    #[error("Subscription name must not be empty")]
    EmptyName,

    /// The outstanding-message ceiling is zero
    #[error("Subscription '{0}' must allow at least one outstanding message")]
    ZeroCeiling(String),
}

/// One subscription bound to its processor.
#[derive(Clone)]
pub struct Binding {
    name: String,
    settings: ReceiveSettings,
    processor: Arc<dyn Processor>,
}

impl Binding {
    /// Subscription name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Flow-control settings for the pull path.
    #[must_use]
    pub const fn settings(&self) -> ReceiveSettings {
        self.settings
    }

    /// The processor every delivery on this subscription goes to.
    #[must_use]
    pub fn processor(&self) -> &Arc<dyn Processor> {
        &self.processor
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("name", &self.name)
            .field("max_outstanding", &self.settings.max_outstanding)
            .field("processor", &self.processor.name())
            .finish()
    }
}

/// Subscription name → processor bindings.
#[derive(Default, Debug)]
pub struct SubscriptionRegistry {
    bindings: BTreeMap<String, Binding>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a subscription to a processor.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the name is empty or already bound, or if
    /// `max_outstanding` is zero.
    pub fn bind(
        &mut self,
        name: impl Into<String>,
        max_outstanding: usize,
        processor: Arc<dyn Processor>,
    ) -> Result<&mut Self, RegistryError> {
        let name = name.into();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if max_outstanding == 0 {
            return Err(RegistryError::ZeroCeiling(name));
        }
        if self.bindings.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }

        tracing::debug!(
            subscription = %name,
            max_outstanding,
            processor = processor.name(),
            "Bound subscription"
        );

        self.bindings.insert(
            name.clone(),
            Binding {
                name,
                settings: ReceiveSettings::new(max_outstanding),
                processor,
            },
        );
        Ok(self)
    }

    /// Look up a binding by subscription name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    /// All bindings, ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.values()
    }

    /// Number of bound subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Freeze the registry for sharing.
    #[must_use]
    pub fn freeze(self) -> Arc<Self> {
        Arc::new(self)
    }
}
