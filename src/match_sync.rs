use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info};

use crate::api::health::{HealthState, LoopKind};
use crate::config::{Config, MATCH_SYNC_INTERVAL_SECS};
use crate::db::PredictionStore;
use crate::error::Result;
use crate::fetcher::{fetch_match_odds, fetch_matches};

/// Pulls matches and consensus odds snapshots from the data API into the store.
pub struct MatchSync {
    cfg: Config,
    client: reqwest::Client,
    store: Arc<dyn PredictionStore>,
}

impl MatchSync {
    pub fn new(cfg: Config, client: reqwest::Client, store: Arc<dyn PredictionStore>) -> Self {
        Self { cfg, client, store }
    }

    pub async fn run(self, health: Arc<HealthState>) {
        let mut ticker = interval(Duration::from_secs(MATCH_SYNC_INTERVAL_SECS));
        ticker.tick().await; // bootstrap already synced once

        loop {
            ticker.tick().await;
            let result = self.sync().await;
            if let Err(e) = &result {
                error!("Match sync failed: {e}");
            }
            health.record(LoopKind::MatchSync, &result);
        }
    }

    pub async fn sync(&self) -> Result<()> {
        let (matches, match_stats) = fetch_matches(&self.client, &self.cfg).await?;
        let upserted = self.store.upsert_matches(&matches).await?;

        let (odds, odds_stats) = fetch_match_odds(&self.client, &self.cfg).await?;
        let inserted = self.store.insert_match_odds(&odds).await?;

        info!(
            matches = match_stats.accepted,
            matches_skipped = match_stats.skipped_missing_id + match_stats.skipped_malformed,
            upserted,
            odds = odds_stats.accepted,
            odds_inserted = inserted,
            "Match sync complete"
        );
        Ok(())
    }
}
