//! HTTP API Server for Recommendations
//!
//! Serves a mined model read-only: item recommendations, the ranked rule
//! list and the run statistics.

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::config::{ApiConfig, DEFAULT_QUERY_COUNT};
use crate::error::{Error, Result};
use crate::mining::{BuildReport, Item, MiningStats, Rule, ScoredItem};
use crate::pipeline::MinedModel;

/// Largest page the rules endpoint will return
const MAX_RULES_PAGE: usize = 1000;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub model: Arc<MinedModel>,
    pub default_count: usize,
}

impl AppState {
    pub fn new(model: Arc<MinedModel>) -> Self {
        Self {
            model,
            default_count: DEFAULT_QUERY_COUNT,
        }
    }
}

/// Query params for the recommendations endpoint
#[derive(Debug, Deserialize)]
pub struct RecommendationsQuery {
    pub count: Option<usize>,
}

/// Query params for the rules endpoint
#[derive(Debug, Deserialize)]
pub struct RulesQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    20
}

/// Response for the recommendations endpoint
#[derive(Debug, Serialize)]
pub struct RecommendationsResponse {
    pub item: Item,
    pub count: usize,
    pub items: Vec<Item>,
    /// The rule behind each entry of `items`
    pub details: Vec<ScoredItem>,
    /// Rules whose antecedent contains the queried item
    pub matching_rules: usize,
}

/// Response for the rules endpoint
#[derive(Debug, Serialize)]
pub struct RulesResponse {
    pub rules: Vec<Rule>,
    pub total: usize,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub stats: MiningStats,
    pub report: BuildReport,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub rules: usize,
}

/// Build the router over `state`
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Query endpoints
        .route("/api/v1/recommendations/:item", get(get_recommendations))
        .route("/api/v1/rules", get(get_rules))
        .route("/api/v1/stats", get(get_stats))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the API server and run until `shutdown` resolves
pub async fn start_server<F>(model: Arc<MinedModel>, config: &ApiConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(AppState::new(model), config.request_timeout);

    let addr = config.bind_addr();
    info!("🚀 Starting recommendation API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("API server stopped");
    Ok(())
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        rules: state.model.rule_count(),
    })
}

/// Items most often bought together with `item`
async fn get_recommendations(
    State(state): State<AppState>,
    Path(label): Path<String>,
    Query(query): Query<RecommendationsQuery>,
) -> Result<Json<RecommendationsResponse>> {
    let item: Item = label.parse()?;
    let count = query.count.unwrap_or(state.default_count);

    let recommender = &state.model.recommender;
    let details = recommender.recommend_scored(&item, count);
    let items = details.iter().map(|scored| scored.item.clone()).collect();
    let matching_rules = recommender.rules_for(&item).count();

    debug!(item = %item, count, matching_rules, "Served recommendations");

    Ok(Json(RecommendationsResponse {
        item,
        count,
        items,
        details,
        matching_rules,
    }))
}

/// Ranked rules, strongest lift first
async fn get_rules(
    State(state): State<AppState>,
    Query(query): Query<RulesQuery>,
) -> Result<Json<RulesResponse>> {
    if query.limit == 0 || query.limit > MAX_RULES_PAGE {
        return Err(Error::bad_request(format!(
            "limit must be between 1 and {}",
            MAX_RULES_PAGE
        )));
    }

    let ranked = state.model.recommender.ranked_rules();
    let total = ranked.len();
    let rules: Vec<Rule> = ranked
        .iter()
        .skip(query.offset)
        .take(query.limit)
        .cloned()
        .collect();

    Ok(Json(RulesResponse {
        rules,
        total,
        has_more: total > query.offset.saturating_add(query.limit),
    }))
}

/// Statistics of the run that produced the served model
async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        stats: state.model.stats.clone(),
        report: state.model.report.clone(),
    })
}
