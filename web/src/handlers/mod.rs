//! HTTP request handlers.

pub mod health;
pub mod metrics;
pub mod push;

// Re-export common handler utilities
pub use health::health_check;
pub use metrics::render_metrics;
pub use push::handle_push;
