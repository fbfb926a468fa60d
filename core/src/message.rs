//! Raw messages as they cross the broker boundary.
//!
//! [`BrokerMessage`] is what a subscription delivers on the pull path:
//! `{id, attributes, data}`. [`OutboundMessage`] is what the outbox publisher
//! hands the broker; the broker assigns the id on confirm.

use std::collections::HashMap;

/// A message delivered by a broker subscription.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Broker-assigned message id.
    pub id: String,
    /// Attributes carried alongside the payload, keys as published.
    pub attributes: HashMap<String, String>,
    /// Opaque payload bytes.
    pub data: Vec<u8>,
    /// Delivery attempt counter, when the broker tracks one (starts at 1).
    pub delivery_attempt: Option<u32>,
}

impl BrokerMessage {
    /// Create a message without a delivery attempt counter.
    #[must_use]
    pub fn new(id: impl Into<String>, attributes: HashMap<String, String>, data: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            attributes,
            data,
            delivery_attempt: None,
        }
    }

    /// Attach a delivery attempt counter.
    #[must_use]
    pub const fn with_delivery_attempt(mut self, attempt: u32) -> Self {
        self.delivery_attempt = Some(attempt);
        self
    }
}

/// A message about to be published.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Attributes copied onto the broker message.
    pub attributes: HashMap<String, String>,
    /// Opaque payload bytes.
    pub data: Vec<u8>,
}

impl OutboundMessage {
    /// Create an outbound message.
    #[must_use]
    pub const fn new(attributes: HashMap<String, String>, data: Vec<u8>) -> Self {
        Self { attributes, data }
    }
}
