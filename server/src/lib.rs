//! Logistics event delivery server.
//!
//! Wires [`CourierConfig`](courier_runtime::CourierConfig) into a running
//! process: a Redpanda broker, the subscription registry with the logistics
//! processors, supervised pull dispatchers for pull-mode subscriptions and the
//! push endpoint for everything bound.

pub mod bootstrap;
pub mod processors;
