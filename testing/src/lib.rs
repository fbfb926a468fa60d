//! # Courier Testing
//!
//! Test doubles for the Courier event delivery core.
//!
//! This crate provides:
//! - [`InMemoryBroker`]: topics, subscriptions, ack/nack accounting and fault injection
//! - [`ScriptedProcessor`]: records envelopes and replies with scripted status codes
//!
//! ## Example
//!
//! ```ignore
//! use courier_testing::{InMemoryBroker, ScriptedProcessor};
//!
//! #[tokio::test]
//! async fn test_redelivery() {
//!     let broker = InMemoryBroker::new();
//!     broker.create_subscription("orders", "logistics-events");
//!     let processor = ScriptedProcessor::new("orders").then_reply(503, Some("down"));
//!
//!     // wire the processor to the subscription, publish, then:
//!     assert!(broker.wait_until(timeout, |b| b.acked("orders").len() == 1).await);
//!     assert_eq!(broker.nacked("orders").len(), 1);
//! }
//! ```

pub mod broker;
pub mod processor;

pub use broker::{InMemoryBroker, InMemoryBrokerBuilder, PublishedMessage};
pub use processor::{ScriptedProcessor, ScriptedReply};
