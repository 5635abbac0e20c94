pub mod edge;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::api::health::{HealthState, LoopKind};
use crate::config::SCORING_INTERVAL_SECS;
use crate::db::PredictionStore;
use crate::error::Result;
use crate::reporter::Reporter;
use crate::types::{Prediction, ScoringBatch};

use edge::score_prediction;

/// Background task: score completed matches against the closing line, persist, report.
pub struct EdgeScorer {
    store: Arc<dyn PredictionStore>,
    reporter: Arc<Reporter>,
    batch_size: i64,
}

impl EdgeScorer {
    pub fn new(store: Arc<dyn PredictionStore>, reporter: Arc<Reporter>, batch_size: i64) -> Self {
        Self { store, reporter, batch_size }
    }

    pub async fn run(self, health: Arc<HealthState>) {
        let mut interval = tokio::time::interval(Duration::from_secs(SCORING_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let result = self.tick().await;
            if let Err(e) = &result {
                error!("Edge scoring pass failed: {e}");
            }
            health.record(LoopKind::ScoringPass, &result);
        }
    }

    async fn tick(&self) -> Result<()> {
        let batch = score_pending(self.store.as_ref(), self.batch_size).await?;
        self.reporter.post_edge_results(&batch).await
    }
}

/// Score up to `limit` unscored predictions and persist the outcome.
///
/// Already-scored rows never reach this function (the store query excludes them),
/// so calling it repeatedly is safe.
pub async fn score_pending(store: &dyn PredictionStore, limit: i64) -> Result<ScoringBatch> {
    let pending = store.predictions_to_score(limit).await?;
    if pending.is_empty() {
        return Ok(ScoringBatch::default());
    }

    let now = Utc::now();
    let mut batch = ScoringBatch::default();
    let mut scored: Vec<Prediction> = Vec::with_capacity(pending.len());

    for sp in pending {
        let score = score_prediction(&sp);
        if sp.actual_winner_odds().and_then(edge::implied_probability).is_none() {
            warn!(
                match_id = %sp.prediction.match_id,
                winner = %sp.actual_winner(),
                "Closing odds unusable for the winning side, edge set to 0"
            );
        }
        let mut prediction = sp.prediction;
        prediction.mark_scored(score.edge, now)?;
        batch.push(
            score.edge,
            score.correct_winner,
            prediction.responder_uid,
            prediction.responder_identity.clone(),
            prediction.sport,
            prediction.league.clone(),
        );
        scored.push(prediction);
    }

    let updated = store.mark_predictions_scored(&scored).await?;
    if updated < scored.len() as u64 {
        warn!(
            updated,
            batch = scored.len(),
            "Some predictions were scored concurrently and left untouched"
        );
    }
    info!(
        scored = batch.len(),
        correct = batch.correct_winner_results.iter().filter(|c| **c == 1).count(),
        "Edge scoring pass complete"
    );
    Ok(batch)
}
