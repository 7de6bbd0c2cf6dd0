use axum::{Router, routing::get};

pub mod contents;
pub mod satellite;
pub mod system;

/// Router for all wire-protocol endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/api/contents/:token", get(contents::fetch))
        .nest("/api/satellite", satellite::router())
}
