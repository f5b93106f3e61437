//! Metric ingestion and lookup routes.

use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use pulsemon_common::types::{Metric, MetricKind, RawMetric};
use pulsemon_storage::StorageError;
use std::fmt::Write;

/// Handler failure, rendered as a plaintext body.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound,
    Internal(&'static str),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "metric not found").into_response(),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
        }
    }
}

fn storage_failure(what: &'static str, err: StorageError) -> ApiError {
    if err.is_cancelled() {
        tracing::debug!(error = %err, "{what}: cancelled by shutdown");
    } else {
        tracing::error!(error = %err, "{what}");
    }
    ApiError::Internal(what)
}

fn require_json(headers: &HeaderMap) -> Result<(), ApiError> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"));
    if is_json {
        Ok(())
    } else {
        Err(ApiError::BadRequest(
            "Content-Type must be application/json".to_string(),
        ))
    }
}

fn decode<T: serde::de::DeserializeOwned>(headers: &HeaderMap, body: &Bytes) -> Result<T, ApiError> {
    require_json(headers)?;
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

async fn store_metric(state: &AppState, metric: &Metric) -> Result<(), ApiError> {
    let result = match (metric.kind, metric.value, metric.delta) {
        (MetricKind::Gauge, Some(value), _) => state.storage.update_gauge(&metric.id, value).await,
        (MetricKind::Counter, _, Some(delta)) => {
            state.storage.update_counter(&metric.id, delta).await
        }
        _ => return Err(ApiError::BadRequest(format!("metric '{}' has no payload", metric.id))),
    };
    result.map_err(|e| storage_failure("failed to update metric", e))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_metrics))
        .route("/ping", get(ping))
        .route("/update/", post(update_json))
        .route("/update/{kind}/{name}/{value}", post(update_path))
        .route("/updates/", post(update_batch))
        .route("/value/", post(value_json))
        .route("/value/{kind}/{name}", get(value_path))
}

/// `POST /update/{kind}/{name}/{value}`
async fn update_path(
    State(state): State<AppState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let kind: MetricKind = kind
        .parse()
        .map_err(|e: pulsemon_common::types::MetricError| ApiError::BadRequest(e.to_string()))?;
    let metric =
        Metric::parse(kind, &name, &value).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    store_metric(&state, &metric).await?;
    state.persist_after_update().await;
    Ok(StatusCode::OK)
}

/// `POST /update/` with one JSON metric; answers with the stored metric.
async fn update_json(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Metric>, ApiError> {
    let raw: RawMetric = decode(&headers, &body)?;
    let metric = raw
        .into_metric()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    store_metric(&state, &metric).await?;
    state.persist_after_update().await;

    let stored = state
        .storage
        .get_metric(metric.kind, &metric.id)
        .await
        .map_err(|e| storage_failure("failed to read updated metric", e))?
        .ok_or(ApiError::Internal("updated metric vanished"))?;
    Ok(Json(stored))
}

/// `POST /updates/` with a JSON array. Invalid entries are skipped.
async fn update_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let raw: Vec<RawMetric> = decode(&headers, &body)?;
    if raw.is_empty() {
        return Err(ApiError::BadRequest("empty metrics batch".to_string()));
    }

    let received = raw.len();
    let metrics: Vec<Metric> = raw
        .into_iter()
        .filter_map(|m| {
            let id = m.id.clone();
            m.into_metric()
                .map_err(|e| tracing::warn!(metric = %id, error = %e, "Skipping batch entry"))
                .ok()
        })
        .collect();

    if !metrics.is_empty() {
        state
            .storage
            .update_batch(&metrics)
            .await
            .map_err(|e| storage_failure("failed to update metrics batch", e))?;
        state.persist_after_update().await;
    }
    tracing::debug!(received, applied = metrics.len(), "Batch ingested");
    Ok(StatusCode::OK)
}

/// `GET /value/{kind}/{name}` as plaintext.
async fn value_path(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<String, ApiError> {
    let kind: MetricKind = kind.parse().map_err(|_| ApiError::NotFound)?;
    state
        .storage
        .get_metric(kind, &name)
        .await
        .map_err(|e| storage_failure("failed to read metric", e))?
        .and_then(|m| m.value_string())
        .ok_or(ApiError::NotFound)
}

/// `POST /value/` with `{id, type}`.
async fn value_json(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Metric>, ApiError> {
    let raw: RawMetric = decode(&headers, &body)?;
    if raw.id.is_empty() || raw.kind.as_deref().unwrap_or("").is_empty() {
        return Err(ApiError::BadRequest(
            "metric id and type are required".to_string(),
        ));
    }
    let kind = raw.parse_kind().map_err(|_| ApiError::NotFound)?;
    state
        .storage
        .get_metric(kind, &raw.id)
        .await
        .map_err(|e| storage_failure("failed to read metric", e))?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

/// `GET /` renders every metric as an HTML list.
async fn list_metrics(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let all = state
        .storage
        .get_all()
        .await
        .map_err(|e| storage_failure("failed to retrieve metrics", e))?;
    let mut metrics: Vec<Metric> = all.into_values().collect();
    metrics.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(Html(render_metrics(&metrics)))
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn render_metrics(metrics: &[Metric]) -> String {
    let mut html = String::from(
        "<!DOCTYPE html>\n<html>\n<head><title>Metrics</title></head>\n<body>\n<h1>Metrics</h1>\n<ul>\n",
    );
    for metric in metrics {
        let _ = writeln!(
            html,
            "<li>{} ({}): {}</li>",
            escape_html(&metric.id),
            metric.kind,
            metric.value_string().unwrap_or_default()
        );
    }
    html.push_str("</ul>\n</body>\n</html>\n");
    html
}

/// `GET /ping`: 200 when the backend answers within the timeout.
async fn ping(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    match tokio::time::timeout(state.ping_timeout, state.storage.ping()).await {
        Ok(Ok(())) => Ok("OK"),
        Ok(Err(e)) => Err(storage_failure("storage ping failed", e)),
        Err(_) => {
            tracing::error!(
                timeout_secs = state.ping_timeout.as_secs_f64(),
                "Storage ping timed out"
            );
            Err(ApiError::Internal("storage ping timed out"))
        }
    }
}
