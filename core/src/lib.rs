//! # Courier Core
//!
//! Core traits and types for the Courier event delivery core.
//!
//! Courier moves domain events from the HTTP handlers that produce them to the
//! processors that react to them. This crate holds the transport-independent
//! pieces that every other crate agrees on.
//!
//! ## Core Concepts
//!
//! - **Envelope**: One normalized event, whichever transport delivered it
//! - **Processor**: The single callback all business logic implements
//! - **Disposition**: `Handled` (ack) or `Retry` (nack), derived from a status code
//! - **Broker**: Publish-with-confirm plus a streaming receive with flow control
//! - **Outbox record**: Payload plus the fixed attribute set subscribers filter on
//!
//! ## Data Flow
//!
//! ```text
//! ┌──────────────┐   publish + confirm   ┌────────┐
//! │ HTTP handler │ ────────────────────► │ Broker │
//! └──────────────┘                       └───┬────┘
//!                                  fan-out   │
//!                         ┌──────────────────┴───────────┐
//!                         ▼                              ▼
//!                  ┌─────────────┐                ┌─────────────┐
//!                  │ Pull stream │                │ HTTP push   │
//!                  └──────┬──────┘                └──────┬──────┘
//!                         │        Envelope              │
//!                         └──────────────┬───────────────┘
//!                                        ▼
//!                                  ┌───────────┐
//!                                  │ Processor │ → status code → ack / nack
//!                                  └───────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use courier_core::envelope::Envelope;
//! use courier_core::message::BrokerMessage;
//! use courier_core::processor::Disposition;
//! use std::collections::HashMap;
//!
//! let message = BrokerMessage::new(
//!     "42",
//!     HashMap::from([("eventType".to_string(), "orderSubmitted".to_string())]),
//!     br#"{"referenceID":"A1"}"#.to_vec(),
//! );
//!
//! let envelope = Envelope::from_message(&message, "memory/orders");
//! assert_eq!(envelope.extension("eventType"), Some("orderSubmitted"));
//! assert_eq!(Disposition::from_status(503), Disposition::Retry);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broker;
pub mod envelope;
pub mod message;
pub mod outbox;
pub mod processor;
pub mod push;

// Re-export commonly used types
pub use broker::{Broker, BrokerError, DeliveryHandler, ReceiveSettings};
pub use envelope::{Envelope, EnvelopeError};
pub use message::{BrokerMessage, OutboundMessage};
pub use outbox::{OutboxAttributes, OutboxRecord, OutboxStatus};
pub use processor::{
    Disposition, EventHandler, EventTypeFilter, FnProcessor, JsonProcessor, ProcessContext,
    Processor, ProcessorOutcome, Transport, processor_fn,
};
pub use push::{PushBody, PushMessage};
