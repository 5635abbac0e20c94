mod api;
mod commitments;
mod config;
mod db;
mod dispatch;
mod error;
mod fetcher;
mod match_sync;
mod population_refresh;
mod prediction_cycle;
mod recorder;
mod reporter;
mod retry;
mod scheduler;
mod scoring;
mod selector;
mod signer;
mod state;
mod types;
mod validator;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::{HealthState, LoopKind};
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::db::{PredictionStore, SqliteStore};
use crate::dispatch::{Dispatcher, HttpTransport};
use crate::error::Result;
use crate::fetcher::http_client;
use crate::match_sync::MatchSync;
use crate::population_refresh::PopulationRefresher;
use crate::prediction_cycle::PredictionCycle;
use crate::recorder::Recorder;
use crate::reporter::Reporter;
use crate::scheduler::WindowScheduler;
use crate::scoring::EdgeScorer;
use crate::signer::{HmacSigner, Signer};
use crate::state::{LeagueCommitments, PopulationStore};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Persistence ---
    let store: Arc<dyn PredictionStore> = Arc::new(SqliteStore::connect(&cfg.db_path).await?);
    info!("Database ready at {}", cfg.db_path);

    // --- Shared collaborators ---
    let signer: Arc<dyn Signer> = Arc::new(HmacSigner::new(cfg.identity.clone(), &cfg.signing_secret)?);
    let client = http_client()?;
    let latency = Arc::new(LatencyStats::new()?);
    let health = HealthState::new();

    let transport = Arc::new(HttpTransport::new(Arc::clone(&signer), cfg.dispatch_timeout)?);
    let dispatcher = Arc::new(Dispatcher::new(transport, cfg.dispatch_timeout, Arc::clone(&latency)));

    let population = PopulationStore::new();
    let commitments = LeagueCommitments::new();
    let recorder = Arc::new(Recorder::new(Arc::clone(&store)));
    let reporter = Arc::new(Reporter::new(&cfg, Arc::clone(&signer))?);
    let scheduler = Arc::new(WindowScheduler::new(Arc::clone(&store), cfg.active_leagues.clone()));

    // --- Bootstrap: one match sync and one population refresh before the loops start ---
    let match_sync = MatchSync::new(cfg.clone(), client.clone(), Arc::clone(&store));
    let result = match_sync.sync().await;
    if let Err(e) = &result {
        warn!("Bootstrap match sync failed, continuing: {e}");
    }
    health.record(LoopKind::MatchSync, &result);

    let refresher = PopulationRefresher::new(
        cfg.clone(),
        client.clone(),
        Arc::clone(&population),
        Arc::clone(&commitments),
        Arc::clone(&recorder),
        Arc::clone(&dispatcher),
    );
    let result = refresher.refresh().await;
    if let Err(e) = &result {
        warn!("Bootstrap population refresh failed, continuing: {e}");
    }
    health.record(LoopKind::PopulationRefresh, &result);
    info!(
        responders = population.len(),
        serving = population.serving_count(),
        "Bootstrap complete"
    );

    // --- Spawn loops ---
    let h = Arc::clone(&health);
    tokio::spawn(async move { match_sync.run(h).await });

    let h = Arc::clone(&health);
    tokio::spawn(async move { refresher.run(h).await });

    let cycle = PredictionCycle::new(
        cfg.clone(),
        client.clone(),
        Arc::clone(&signer),
        scheduler,
        Arc::clone(&population),
        Arc::clone(&dispatcher),
        Arc::clone(&recorder),
        Arc::clone(&reporter),
    );
    let h = Arc::clone(&health);
    tokio::spawn(async move { cycle.run(h).await });

    let scorer = EdgeScorer::new(Arc::clone(&store), reporter, cfg.scoring_batch_size);
    let h = Arc::clone(&health);
    tokio::spawn(async move { scorer.run(h).await });

    // --- Ops API ---
    let api_state = ApiState { store, population, commitments, latency, health };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
