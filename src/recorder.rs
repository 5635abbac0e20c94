use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::db::{PredictionStore, ResponderKey};
use crate::error::Result;
use crate::types::Prediction;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted_unscored: u64,
    pub archived_scored: u64,
}

/// Persists validated predictions and prunes those of deregistered responders.
pub struct Recorder {
    store: Arc<dyn PredictionStore>,
}

impl Recorder {
    pub fn new(store: Arc<dyn PredictionStore>) -> Self {
        Self { store }
    }

    /// Batch upsert keyed by (match, responder, window).
    pub async fn record(&self, predictions: &[Prediction]) -> Result<u64> {
        if predictions.is_empty() {
            return Ok(0);
        }
        let written = self.store.upsert_predictions(predictions).await?;
        if written < predictions.len() as u64 {
            info!(
                written,
                received = predictions.len(),
                "Some predictions targeted already-scored slots and were ignored"
            );
        }
        Ok(written)
    }

    /// Delete unscored and archive scored predictions of responders not in `active`.
    /// An empty population means the sync failed, so nothing is touched.
    pub async fn clean_up(&self, active: &HashSet<ResponderKey>) -> Result<CleanupReport> {
        if active.is_empty() {
            warn!("Population snapshot is empty, skipping prediction cleanup");
            return Ok(CleanupReport::default());
        }
        let deleted_unscored = self.store.delete_unscored_deregistered(active).await?;
        let archived_scored = self.store.archive_deregistered(active).await?;
        if deleted_unscored > 0 || archived_scored > 0 {
            info!(
                deleted_unscored,
                archived_scored,
                "Cleaned up predictions from deregistered responders"
            );
        }
        Ok(CleanupReport { deleted_unscored, archived_scored })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite_store::test_support::{prediction, test_match};
    use crate::db::SqliteStore;

    #[tokio::test]
    async fn empty_population_skips_cleanup() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let recorder = Recorder::new(store.clone());
        let m = test_match("m1", "MLB");
        recorder
            .record(&[prediction(&m, 1, "hk1", "24_hour", 0.6)])
            .await
            .unwrap();

        let report = recorder.clean_up(&HashSet::new()).await.unwrap();
        assert_eq!(report, CleanupReport::default());
        assert_eq!(store.summary().await.unwrap().predictions, 1);
    }

    #[tokio::test]
    async fn deregistered_unscored_predictions_are_deleted() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let recorder = Recorder::new(store.clone());
        let m = test_match("m1", "MLB");
        recorder
            .record(&[
                prediction(&m, 1, "hk1", "24_hour", 0.6),
                prediction(&m, 2, "hk2", "24_hour", 0.4),
            ])
            .await
            .unwrap();

        let active = HashSet::from([(2, "hk2".to_string())]);
        let report = recorder.clean_up(&active).await.unwrap();
        assert_eq!(report.deleted_unscored, 1);
        assert_eq!(report.archived_scored, 0);
        assert_eq!(store.summary().await.unwrap().predictions, 1);
    }

    #[tokio::test]
    async fn recording_nothing_is_a_no_op() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let recorder = Recorder::new(store);
        assert_eq!(recorder.record(&[]).await.unwrap(), 0);
    }
}
