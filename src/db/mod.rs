pub mod models;
pub mod sqlite_store;

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::types::{Match, MatchOdds, Prediction, PredictionWindow, ScoreablePrediction, Uid, WindowFlags};

pub use sqlite_store::SqliteStore;

/// A responder as the store knows it: uid plus the identity that held it.
pub type ResponderKey = (Uid, String);

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreSummary {
    pub matches: i64,
    pub open_matches: i64,
    pub predictions: i64,
    pub scored_predictions: i64,
    pub archived_predictions: i64,
    pub windows_fired: i64,
}

/// Everything the orchestration core reads from and writes to persistence.
#[async_trait]
pub trait PredictionStore: Send + Sync {
    /// Incomplete matches that have not kicked off yet.
    async fn matches_to_predict(&self, now: DateTime<Utc>) -> Result<Vec<Match>>;

    /// Window flags per match. Matches never checked are absent.
    async fn window_states(&self) -> Result<HashMap<String, WindowFlags>>;

    /// Set the given flags in one transaction, creating state rows as needed.
    async fn mark_windows_fired(&self, fired: &[(String, PredictionWindow)]) -> Result<()>;

    /// Insert or refresh predictions keyed by (match, responder, window).
    /// Scored rows and identity fields are never rewritten.
    async fn upsert_predictions(&self, predictions: &[Prediction]) -> Result<u64>;

    /// Up to `limit` unscored predictions on completed matches with closing odds.
    async fn predictions_to_score(&self, limit: i64) -> Result<Vec<ScoreablePrediction>>;

    /// Persist edge + scored flag for a scored batch. Already-scored rows are skipped.
    async fn mark_predictions_scored(&self, predictions: &[Prediction]) -> Result<u64>;

    /// Hard-delete unscored predictions from responders outside `active`.
    async fn delete_unscored_deregistered(&self, active: &HashSet<ResponderKey>) -> Result<u64>;

    /// Move scored predictions from responders outside `active` into the archive.
    async fn archive_deregistered(&self, active: &HashSet<ResponderKey>) -> Result<u64>;

    async fn upsert_matches(&self, matches: &[Match]) -> Result<u64>;

    async fn insert_match_odds(&self, odds: &[MatchOdds]) -> Result<u64>;

    async fn summary(&self) -> Result<StoreSummary>;
}
