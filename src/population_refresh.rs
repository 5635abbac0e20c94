use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info, warn};

use crate::api::health::{HealthState, LoopKind};
use crate::commitments::run_commitment_round;
use crate::config::{Config, POPULATION_REFRESH_INTERVAL_SECS};
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::fetcher::fetch_population;
use crate::recorder::Recorder;
use crate::state::{LeagueCommitments, PopulationStore};
use crate::types::Uid;

/// Resyncs the responder population, then prunes stale predictions and refreshes commitments.
pub struct PopulationRefresher {
    cfg: Config,
    client: reqwest::Client,
    population: Arc<PopulationStore>,
    commitments: Arc<LeagueCommitments>,
    recorder: Arc<Recorder>,
    dispatcher: Arc<Dispatcher>,
}

impl PopulationRefresher {
    pub fn new(
        cfg: Config,
        client: reqwest::Client,
        population: Arc<PopulationStore>,
        commitments: Arc<LeagueCommitments>,
        recorder: Arc<Recorder>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self { cfg, client, population, commitments, recorder, dispatcher }
    }

    pub async fn run(self, health: Arc<HealthState>) {
        let mut ticker = interval(Duration::from_secs(POPULATION_REFRESH_INTERVAL_SECS));
        ticker.tick().await; // bootstrap already refreshed once

        loop {
            ticker.tick().await;
            let result = self.refresh().await;
            if let Err(e) = &result {
                error!("Population refresh failed: {e}");
            }
            health.record(LoopKind::PopulationRefresh, &result);
        }
    }

    pub async fn refresh(&self) -> Result<()> {
        let fresh = fetch_population(&self.client, &self.cfg).await?;
        if fresh.is_empty() {
            warn!("Population source returned no responders, keeping previous snapshot");
            return Ok(());
        }

        let diff = self.population.replace(fresh);
        let live: HashSet<Uid> = self.population.all().iter().map(|r| r.uid).collect();
        self.commitments.retain_uids(&live);

        info!(
            added = diff.added,
            removed = diff.removed,
            replaced = diff.replaced,
            total = self.population.len(),
            serving = self.population.serving_count(),
            "Population refresh complete: +{} added, -{} removed, {} re-registered",
            diff.added,
            diff.removed,
            diff.replaced,
        );

        if let Err(e) = self.recorder.clean_up(&self.population.active_keys()).await {
            error!("Prediction cleanup failed: {e}");
        }

        run_commitment_round(
            &self.dispatcher,
            &self.population.all(),
            self.cfg.stake_ceiling,
            &self_exclusion(&self.cfg),
            &self.commitments,
        )
        .await?;
        Ok(())
    }
}

/// The orchestrator's own uid. Only chosen as backfill when a request asks for more responders
/// than the others can supply.
pub fn self_exclusion(cfg: &Config) -> HashSet<Uid> {
    cfg.self_uid.into_iter().collect()
}
