use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use edumesh_core::ContentId;

use crate::app::errors;
use crate::app::services::AppServices;

#[derive(Debug, Deserialize)]
pub struct ContentsQuery {
    /// Optional comma-separated subset of granted ids.
    pub ids: Option<String>,
}

/// Serve content documents to the bearer of a valid content token.
/// The token alone bounds what is visible; the `ids` query can only
/// narrow it.
pub async fn fetch(
    Extension(services): Extension<Arc<AppServices>>,
    Path(token): Path<String>,
    Query(query): Query<ContentsQuery>,
) -> axum::response::Response {
    let granted = match services.signer.verify_content_ids(&token, None) {
        Ok(ids) => ids,
        Err(_) => {
            return errors::json_error(StatusCode::FORBIDDEN, "invalid_token", "invalid content token");
        }
    };

    let wanted: Vec<ContentId> = match &query.ids {
        None => granted,
        Some(raw) => {
            let requested: Vec<ContentId> = raw
                .split(',')
                .filter(|s| !s.is_empty())
                .filter_map(|s| ContentId::from_str(s.trim()).ok())
                .collect();
            requested
                .into_iter()
                .filter(|id| granted.contains(id))
                .collect()
        }
    };

    match services.documents.fetch_contents(&wanted).await {
        Ok(docs) => Json(docs).into_response(),
        Err(e) => errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string()),
    }
}
