//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! The engine exposes three operations over HTTP: the suggestion hot
//! path (GET and POST), the admin rollup refresh, and admin stats over
//! the audit log. Everything else about the workout service lives in
//! other deployables.

pub mod admin;
pub mod overload;

use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};

use crate::state::AppState;

/// Build the API router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/api/overload/suggest",
            get(overload::suggest_get).post(overload::suggest_post),
        )
        .route("/api/admin/overload/refresh", post(admin::refresh))
        .route("/api/admin/overload/stats", get(admin::stats))
        .route("/healthz", get(healthz))
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Uniform JSON error body for handler-level failures.
pub(crate) fn error_json(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
