//! # Cartpilot Web
//!
//! The HTTP control plane: exactly the four session operations — start,
//! get, approve, cancel — plus health and metrics. Handlers are thin
//! adapters over [`cartpilot_runtime::SessionService`]; no business logic
//! lives here, and nothing in this crate (or below it) places an order.

pub mod error;
pub mod handlers;
pub mod state;

pub use error::AppError;
pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the control-plane router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/sessions", post(handlers::sessions::start))
        .route("/v1/sessions/:session_id", get(handlers::sessions::get_session))
        .route(
            "/v1/sessions/:session_id/approve",
            post(handlers::sessions::approve),
        )
        .route(
            "/v1/sessions/:session_id/cancel",
            post(handlers::sessions::cancel),
        )
        .route("/healthz", get(handlers::health::healthz))
        .route("/metrics", get(handlers::health::metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Initialize tracing for server binaries: env-filter over a compact
/// format. Safe to call once.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
