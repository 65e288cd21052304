//! HTTP routes

pub mod bits;
pub mod health;

use axum::routing::{any, get};
use axum::Router;

use crate::state::AppState;

/// Builds the application router.
///
/// The BITS endpoint accepts any path; the final path segment names the
/// upload file. Method filtering happens inside the handler because BITS
/// clients use a nonstandard verb (`BITS_POST`).
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::health_check))
        .route("/", any(bits::handle_packet))
        .route("/{*path}", any(bits::handle_packet))
        .with_state(state)
}
