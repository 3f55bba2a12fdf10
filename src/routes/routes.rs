//! Defines routes for the probe endpoints.
//!
//! - `GET /healthz`: liveness
//! - `GET /readyz` : readiness (bucket watch synced)

use crate::{
    handlers::health_handlers::{healthz, readyz},
    services::watcher::Readiness,
};
use axum::{Router, routing::get};

/// Build the probe router. The router carries the watch `Readiness` flag.
pub fn routes() -> Router<Readiness> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}
