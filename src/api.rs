use std::sync::Arc;

use serde_json::json;
use shuttle_axum::axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::aggregator::Aggregator;
use crate::assemble::{AggregateFilters, AggregatedResult, Limits};
use crate::error::AnalyticsError;
use crate::model::Category;

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
}

impl AppState {
    pub fn new(aggregator: Aggregator) -> Self {
        Self {
            aggregator: Arc::new(aggregator),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/aggregate", get(aggregate))
        .route("/api/sources", get(sources))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug, Default, serde::Deserialize)]
struct AggregateQuery {
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Analytics(AnalyticsError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Analytics(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}

impl AggregateQuery {
    fn into_filters(self) -> Result<AggregateFilters, ApiError> {
        let category = match self.category.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                Category::parse(raw)
                    .ok_or_else(|| ApiError::BadRequest(format!("unknown category '{raw}'")))?,
            ),
        };
        if self.limit == Some(0) {
            return Err(ApiError::BadRequest("limit must be at least 1".to_string()));
        }
        Ok(AggregateFilters {
            region: self.region.filter(|r| !r.trim().is_empty()),
            category,
            limit: self.limit,
        })
    }
}

async fn aggregate(
    State(state): State<AppState>,
    Query(q): Query<AggregateQuery>,
) -> Result<Json<AggregatedResult>, ApiError> {
    let filters = q.into_filters()?;
    let out = state
        .aggregator
        .aggregate(&filters)
        .await
        .map_err(ApiError::Analytics)?;
    Ok(Json(out))
}

#[derive(serde::Serialize)]
struct SourcesOut {
    sources: Vec<String>,
    limits: Limits,
}

async fn sources(State(state): State<AppState>) -> Json<SourcesOut> {
    Json(SourcesOut {
        sources: state.aggregator.source_ids(),
        limits: state.aggregator.limits(),
    })
}
