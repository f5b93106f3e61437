use crate::state::AppState;
use crate::{api, logging};
use axum::http::{header, Extensions, HeaderMap, StatusCode, Version};
use axum::middleware;
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::decompression::RequestDecompressionLayer;

/// Only JSON and HTML responses are worth compressing.
fn json_or_html(_: StatusCode, _: Version, headers: &HeaderMap, _: &Extensions) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json") || ct.starts_with("text/html"))
}

/// Layers, outermost first: gzip responses, inflate gzip requests, request log.
pub fn build_http_app(state: AppState) -> Router {
    api::routes()
        .layer(middleware::from_fn(logging::request_logging))
        .layer(RequestDecompressionLayer::new())
        .layer(CompressionLayer::new().compress_when(json_or_html))
        .with_state(state)
}
