use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::health::{HealthSnapshot, HealthState};
use crate::api::latency::{LatencyStats, LatencySummary};
use crate::db::{PredictionStore, StoreSummary};
use crate::error::AppError;
use crate::state::{LeagueCommitments, PopulationStore};
use crate::types::Uid;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn PredictionStore>,
    pub population: Arc<PopulationStore>,
    pub commitments: Arc<LeagueCommitments>,
    pub latency: Arc<LatencyStats>,
    pub health: Arc<HealthState>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/stats/summary", get(get_stats_summary))
        .route("/stats/latency", get(get_stats_latency))
        .route("/responders", get(get_responders))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RespondersQuery {
    pub league: Option<String>,
    pub serving: Option<bool>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub responders: usize,
    pub serving: usize,
    #[serde(flatten)]
    pub loops: HealthSnapshot,
}

#[derive(Serialize)]
pub struct ResponderResponse {
    pub uid: Uid,
    pub identity: String,
    pub is_serving: bool,
    pub stake: f64,
    pub leagues: Vec<String>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let serving = state.population.serving_count();
    Json(HealthResponse {
        status: if serving > 0 { "ok" } else { "degraded" },
        responders: state.population.len(),
        serving,
        loops: state.health.snapshot(),
    })
}

async fn get_stats_summary(State(state): State<ApiState>) -> Result<Json<StoreSummary>, AppError> {
    Ok(Json(state.store.summary().await?))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySummary> {
    Json(state.latency.summary())
}

async fn get_responders(
    State(state): State<ApiState>,
    Query(params): Query<RespondersQuery>,
) -> Json<Vec<ResponderResponse>> {
    let in_league: Option<Vec<Uid>> =
        params.league.as_deref().map(|l| state.commitments.uids_for_league(l));
    let responders = state
        .population
        .all()
        .into_iter()
        .filter(|r| params.serving.map_or(true, |s| r.is_serving == s))
        .filter(|r| in_league.as_ref().map_or(true, |uids| uids.contains(&r.uid)))
        .map(|r| ResponderResponse {
            leagues: state.commitments.leagues_for(r.uid),
            uid: r.uid,
            identity: r.identity,
            is_serving: r.is_serving,
            stake: r.stake,
        })
        .collect();
    Json(responders)
}
