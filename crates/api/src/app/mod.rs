//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: backend selection and engine wiring
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};

pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, Backends, build_services};

/// Build the full HTTP router (public entrypoint used by `main.rs`
/// and the black-box tests).
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(Extension(services))
}
