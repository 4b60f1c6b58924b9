use crate::{api_error::ApiError, routes, state};
use axum::extract::DefaultBodyLimit;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

const MAX_BODY_BYTES: usize = 64 * 1024;

async fn not_found() -> impl IntoResponse {
    ApiError::not_found("route not found")
}

async fn method_not_allowed() -> impl IntoResponse {
    ApiError::method_not_allowed()
}

/// Build the main Axum router.
///
/// `/healthz` and `/readyz` are unthrottled probes; the `/v1/*` routes get a
/// request body limit. Wrong-method hits on known paths return the 405
/// envelope, unknown paths the 404 envelope.
pub fn build_router(state: Arc<state::AppState>) -> Router {
    let api = Router::new()
        .route(
            "/v1/search",
            post(routes::search).fallback(method_not_allowed),
        )
        .route("/v1/fetch", post(routes::fetch).fallback(method_not_allowed))
        .route(
            "/v1/web-fetch",
            post(routes::web_fetch).fallback(method_not_allowed),
        )
        .route(
            "/v1/lists/allowlist",
            post(routes::add_allowlist_domain)
                .get(routes::list_allowlist_domains)
                .fallback(method_not_allowed),
        )
        .route(
            "/v1/lists/blocklist",
            post(routes::add_blocklist_domain)
                .get(routes::list_blocklist_domains)
                .fallback(method_not_allowed),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES));

    Router::new()
        .route("/healthz", get(routes::healthz))
        .route("/readyz", get(routes::readyz))
        .merge(api)
        .fallback(not_found)
        .with_state(state)
}
