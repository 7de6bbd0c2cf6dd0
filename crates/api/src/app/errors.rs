use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use edumesh_engine::{ApplyError, SeedError};

pub fn apply_error_to_response(err: ApplyError) -> axum::response::Response {
    match err {
        ApplyError::UnknownTenant => json_error(StatusCode::NOT_FOUND, "unknown_tenant", "unknown tenant"),
        ApplyError::ApiKeyMismatch => json_error(StatusCode::FORBIDDEN, "api_key_mismatch", "api key mismatch"),
        ApplyError::AddressMismatch => {
            json_error(StatusCode::FORBIDDEN, "address_mismatch", "satellite address mismatch")
        }
        ApplyError::ClockSkew(ms) => json_error(
            StatusCode::BAD_REQUEST,
            "clock_skew",
            format!("clock skew of {ms}ms exceeds limit"),
        ),
        ApplyError::VersionMismatch(v) => json_error(
            StatusCode::BAD_REQUEST,
            "version_mismatch",
            format!("incompatible sender version {v}"),
        ),
        ApplyError::Store(e) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
    }
}

pub fn seed_error_to_response(err: SeedError) -> axum::response::Response {
    match err {
        SeedError::Token(_) => json_error(StatusCode::UNAUTHORIZED, "invalid_token", "invalid satellite token"),
        SeedError::UnknownTenant => json_error(StatusCode::NOT_FOUND, "unknown_tenant", "unknown tenant"),
        SeedError::BlobNotFound => json_error(StatusCode::NOT_FOUND, "not_found", "seed blob not found"),
        SeedError::ClockSkew(_) | SeedError::VersionMismatch(_) | SeedError::BadSeedResponse(_) => {
            json_error(StatusCode::BAD_REQUEST, "bad_request", err.to_string())
        }
        SeedError::ReseedWindow(_) | SeedError::AlreadyInitialized | SeedError::InitInProgress => {
            json_error(StatusCode::CONFLICT, "conflict", err.to_string())
        }
        SeedError::SeedData(e) => json_error(StatusCode::BAD_GATEWAY, "invalid_seed_data", e.to_string()),
        SeedError::Transport(e) => json_error(StatusCode::BAD_GATEWAY, "upstream_error", e.to_string()),
        SeedError::Misconfigured
        | SeedError::Store(_)
        | SeedError::Storage(_)
        | SeedError::Serialize(_) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", err.to_string())
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
