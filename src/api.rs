//! Read-only HTTP control plane.
//!
//! Thin axum handlers over the indexer and metrics registry: `/search`,
//! `/recommend`, `/metrics` (Prometheus text) and `/health`.

use axum::extract::{Extension, Query};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::config::ApiConfig;
use crate::indexer::{Indexer, SearchResult};
use crate::metrics::SharedMetrics;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub topk: Option<usize>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub total: usize,
}

#[derive(Deserialize)]
pub struct RecommendParams {
    pub sku: Option<String>,
}

#[derive(Serialize)]
pub struct RecommendResponse {
    pub sku: String,
    pub recommendations: Vec<String>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(message: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

async fn handle_search(
    Query(params): Query<SearchParams>,
    Extension(indexer): Extension<Arc<Indexer>>,
    Extension(metrics): Extension<SharedMetrics>,
) -> Result<Json<SearchResponse>, ApiError> {
    let Some(query) = params.q else {
        return Err(bad_request("missing query parameter 'q'"));
    };

    metrics.increment_counter("api_search_requests");
    let start = Instant::now();

    let results = indexer.search(&query, params.topk.unwrap_or(10));

    metrics.record_histogram(
        "api_search_latency_ms",
        start.elapsed().as_secs_f64() * 1000.0,
    );

    let total = results.len();
    Ok(Json(SearchResponse {
        query,
        results,
        total,
    }))
}

async fn handle_recommend(
    Query(params): Query<RecommendParams>,
    Extension(metrics): Extension<SharedMetrics>,
) -> Result<Json<RecommendResponse>, ApiError> {
    let Some(sku) = params.sku else {
        return Err(bad_request("missing parameter 'sku'"));
    };

    metrics.increment_counter("api_recommend_requests");

    // Recommendation ranking is not wired up yet; the surface is stable
    Ok(Json(RecommendResponse {
        sku,
        recommendations: Vec::new(),
    }))
}

async fn handle_metrics(Extension(metrics): Extension<SharedMetrics>) -> String {
    metrics.to_prometheus()
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

pub fn router(indexer: Arc<Indexer>, metrics: SharedMetrics) -> Router {
    Router::new()
        .route("/search", get(handle_search))
        .route("/recommend", get(handle_recommend))
        .route("/metrics", get(handle_metrics))
        .route("/health", get(handle_health))
        .layer(Extension(indexer))
        .layer(Extension(metrics))
}

/// Bind and serve the control plane until the process exits.
pub async fn serve(
    config: ApiConfig,
    indexer: Arc<Indexer>,
    metrics: SharedMetrics,
) -> Result<(), std::io::Error> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "api server listening");
    axum::serve(listener, router(indexer, metrics)).await
}
