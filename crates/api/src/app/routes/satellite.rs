//! Hub/satellite wire endpoints.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{ConnectInfo, Extension, Path},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::{get, patch, post},
};
use serde::Deserialize;

use edumesh_core::SeedingId;
use edumesh_replication::wire::{SeedCompleteRequest, SeedRequest, SyncRequest};

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/sync", patch(sync))
        .route("/seedRequest", post(seed_request))
        .route("/seedComplete", post(seed_complete))
        .route("/seed/:seeding_id", get(seed_blob))
        .route("/init", post(init))
}

/// Inbound sync delivery from the peer node.
pub async fn sync(
    Extension(services): Extension<Arc<AppServices>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<SyncRequest>,
) -> axum::response::Response {
    match services.receiver.handle(request, Some(addr.ip())).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => errors::apply_error_to_response(e),
    }
}

/// A satellite asking the hub for its bootstrap dataset.
pub async fn seed_request(
    Extension(services): Extension<Arc<AppServices>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<SeedRequest>,
) -> axum::response::Response {
    let Some(seed) = services.seed.as_ref() else {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "not a hub");
    };
    match seed.handle_request(request, Some(addr.ip())).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => errors::seed_error_to_response(e),
    }
}

/// A satellite reporting the outcome of its bootstrap.
pub async fn seed_complete(
    Extension(services): Extension<Arc<AppServices>>,
    Json(request): Json<SeedCompleteRequest>,
) -> axum::response::Response {
    let Some(seed) = services.seed.as_ref() else {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "not a hub");
    };
    match seed.handle_complete(request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => errors::seed_error_to_response(e),
    }
}

/// Download of the seed blob, gated by the short-lived access token.
pub async fn seed_blob(
    Extension(services): Extension<Arc<AppServices>>,
    Path(seeding_id): Path<String>,
    headers: HeaderMap,
) -> axum::response::Response {
    let Some(seed) = services.seed.as_ref() else {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "not a hub");
    };
    let Ok(seeding_id) = SeedingId::from_str(&seeding_id) else {
        return errors::json_error(StatusCode::BAD_REQUEST, "bad_request", "malformed seeding id");
    };
    let Some(token) = bearer_token(&headers) else {
        return errors::json_error(StatusCode::UNAUTHORIZED, "missing_token", "missing bearer token");
    };
    match seed.download_blob(token, seeding_id).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "application/json")], bytes).into_response(),
        Err(e) => errors::seed_error_to_response(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    /// Hub-issued satellite token for this deployment's tenant.
    pub token: String,
    /// Public URL under which the hub can reach this satellite.
    pub url: String,
    #[serde(default)]
    pub force: bool,
}

/// Operator-triggered bootstrap of a fresh satellite.
pub async fn init(
    Extension(services): Extension<Arc<AppServices>>,
    Json(request): Json<InitRequest>,
) -> axum::response::Response {
    let Some(bootstrap) = services.bootstrap.as_ref() else {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "not a satellite");
    };
    match bootstrap.run(&request.token, &request.url, request.force).await {
        Ok(report) => Json(serde_json::json!({
            "documents": report.documents,
            "contents": report.contents,
            "media": {"cloned": report.media_cloned, "failed": report.media_failed},
        }))
        .into_response(),
        Err(e) => errors::seed_error_to_response(e),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}
