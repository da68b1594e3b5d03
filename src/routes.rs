use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use crate::aggregator::AggregateResult;
use crate::error::NewsError;
use crate::fetcher::SourceFetchResult;
use crate::service::NewsService;
use crate::sources::{Category, Source};

pub struct AppState {
    pub service: Arc<NewsService>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(service: Arc<NewsService>) -> Self {
        Self {
            service,
            started_at: Instant::now(),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api", get(api_index))
        .route("/api/health", get(health))
        .route("/api/news", get(all_news))
        .route("/api/news/source/:source_id", get(source_news))
        .route("/api/news/category/:category", get(category_news))
        .route("/api/news/sources", get(list_sources))
        .route("/api/news/sources/:source_id", get(source_info))
        .route("/api/cache/stats", get(cache_stats))
        .route("/api/cache/keys", get(cache_keys))
        .route("/api/cache/flush", delete(cache_flush))
        .fallback(not_found)
        .with_state(state)
}

fn success(data: impl serde::Serialize) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

fn success_with_meta(data: impl serde::Serialize, meta: Value) -> Json<Value> {
    Json(json!({ "success": true, "data": data, "meta": meta }))
}

fn failure(status: StatusCode, error: &str, message: String) -> Response {
    let body = json!({ "success": false, "error": error, "message": message });
    (status, Json(body)).into_response()
}

// Failure envelope for the pipeline's typed errors
pub struct AppError(NewsError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, name) = match &self.0 {
            NewsError::NotFound(_) => (StatusCode::NOT_FOUND, "Source Not Found"),
            NewsError::Disabled(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Source Disabled"),
            NewsError::UnknownCategory(_) => (StatusCode::BAD_REQUEST, "Bad Request"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
        };
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }

        failure(status, name, self.0.to_string())
    }
}

impl From<NewsError> for AppError {
    fn from(err: NewsError) -> Self {
        AppError(err)
    }
}

fn source_status(result: &SourceFetchResult) -> Value {
    json!({
        "source": result.source_id,
        "success": result.success,
        "articleCount": result.articles.len(),
        "error": result.error,
        "fetchedAt": result.fetched_at,
    })
}

fn aggregate_meta(result: &AggregateResult) -> Value {
    json!({
        "summary": result.summary,
        "sources": result.sources.iter().map(source_status).collect::<Vec<_>>(),
    })
}

// Route handlers
pub async fn api_index() -> impl IntoResponse {
    Json(json!({
        "name": "SecNews Aggregator API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "REST API for aggregating cybersecurity news from multiple sources",
        "endpoints": {
            "health": { "method": "GET", "path": "/api/health" },
            "allNews": { "method": "GET", "path": "/api/news" },
            "sourceNews": { "method": "GET", "path": "/api/news/source/:sourceId" },
            "categoryNews": { "method": "GET", "path": "/api/news/category/:category" },
            "sources": { "method": "GET", "path": "/api/news/sources", "query": ["category", "enabled", "all"] },
            "sourceInfo": { "method": "GET", "path": "/api/news/sources/:sourceId" },
            "cacheStats": { "method": "GET", "path": "/api/cache/stats" },
            "cacheKeys": { "method": "GET", "path": "/api/cache/keys" },
            "cacheFlush": { "method": "DELETE", "path": "/api/cache/flush" }
        }
    }))
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.service.stats().await;

    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "uptime": state.started_at.elapsed().as_secs_f64(),
        "cache": {
            "keys": stats.entry_count,
            "hits": stats.hits,
            "misses": stats.misses,
            "hitRate": format!("{:.2}%", stats.hit_rate()),
        }
    }))
}

pub async fn all_news(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let result = state.service.fetch_all().await;
    success_with_meta(&result.articles, aggregate_meta(&result))
}

pub async fn source_news(
    State(state): State<Arc<AppState>>,
    Path(source_id): Path<String>,
) -> Result<Response, AppError> {
    let result = state.service.fetch_one(&source_id).await?;
    if !result.success {
        return Ok(failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("Failed to fetch news from {}", source_id),
            result.error.clone().unwrap_or_default(),
        ));
    }
    let source = state.service.registry().get_by_id(&source_id)?;

    Ok(success_with_meta(
        &result.articles,
        json!({
            "source": source,
            "status": source_status(&result),
        }),
    )
    .into_response())
}

pub async fn category_news(
    State(state): State<Arc<AppState>>,
    Path(category): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let category: Category = category.parse()?;
    let result = state.service.fetch_category(category).await;

    Ok(success_with_meta(&result.articles, aggregate_meta(&result)))
}

#[derive(Debug, Default, Deserialize)]
pub struct SourcesQuery {
    pub category: Option<String>,
    /// Defaults to listing enabled sources only.
    pub enabled: Option<bool>,
    #[serde(default)]
    pub all: bool,
}

pub async fn list_sources(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SourcesQuery>,
) -> Result<impl IntoResponse, AppError> {
    let category = query
        .category
        .as_deref()
        .map(str::parse::<Category>)
        .transpose()?;

    let sources: Vec<&Source> = state
        .service
        .registry()
        .list_all()
        .iter()
        .filter(|s| category.map_or(true, |c| s.category == c))
        .filter(|s| query.all || s.enabled == query.enabled.unwrap_or(true))
        .collect();

    let count = sources.len();
    Ok(success_with_meta(sources, json!({ "count": count })))
}

pub async fn source_info(
    State(state): State<Arc<AppState>>,
    Path(source_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let source = state.service.registry().get_by_id(&source_id)?;
    Ok(success(source))
}

pub async fn cache_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    success(state.service.stats().await)
}

pub async fn cache_keys(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    success(state.service.keys().await)
}

pub async fn cache_flush(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let flushed = state.service.flush().await;
    Json(json!({
        "success": true,
        "message": "Cache flushed successfully",
        "meta": { "flushed": flushed },
    }))
}

pub async fn not_found(uri: Uri) -> Response {
    failure(
        StatusCode::NOT_FOUND,
        "Endpoint not found",
        format!("The endpoint {} does not exist", uri.path()),
    )
}
