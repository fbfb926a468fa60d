//! Axum push adapter for the Courier event delivery core.
//!
//! Brokers that deliver by HTTP push post each message to
//! `POST /subscription/{name}`. The adapter normalizes the request into an
//! [`Envelope`](courier_core::Envelope), hands it to the same processor the
//! pull dispatcher would use, and maps the outcome onto the response.
//!
//! # Routes
//!
//! | Route | Handler |
//! |---|---|
//! | `POST /subscription/:name` | [`handlers::handle_push`] |
//! | `GET /health` | [`handlers::health_check`] |
//! | `GET /metrics` | [`handlers::render_metrics`] |
//!
//! # Example
//!
//! ```ignore
//! use courier_web::{PushState, router};
//!
//! let state = PushState::new(registry, "x-push-channel-id", broker.name())?;
//! let listener = tokio::net::TcpListener::bind(addr).await?;
//! axum::serve(listener, router(state)).await?;
//! ```

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod state;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::PushDelivery;
pub use state::PushState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Build the push adapter's router.
#[must_use]
pub fn router(state: PushState) -> Router {
    Router::new()
        .route("/subscription/:name", post(handlers::handle_push))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::render_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
