use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::db::models::{
    to_millis, MatchRow, ResponderPairRow, ScoreableRow, WindowStateRow,
};
use crate::db::{PredictionStore, ResponderKey, StoreSummary};
use crate::error::{AppError, Result};
use crate::types::{
    Match, MatchOdds, Prediction, PredictionWindow, ScoreablePrediction, Uid, WindowFlags,
};

const PREDICTION_COLUMNS: &str = "p.prediction_id, p.responder_uid, p.responder_identity, \
     p.match_id, p.match_date, p.sport, p.league, p.home_team_name, p.away_team_name, \
     p.request_window, p.app_request_id, p.probability_choice, p.probability, \
     p.prediction_date, p.is_scored, p.scored_date, p.closing_edge";

/// SQLite-backed store. Handed to every component at construction.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database file and apply migrations.
    pub async fn connect(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Private in-memory database. One connection, since every `:memory:` connection is its own DB.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// (uid, identity) pairs that own predictions but are not in `active`.
    async fn stale_responders(&self, active: &HashSet<ResponderKey>) -> Result<Vec<ResponderKey>> {
        let rows: Vec<ResponderPairRow> = sqlx::query_as(
            "SELECT DISTINCT responder_uid, responder_identity FROM match_predictions",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stale = Vec::new();
        for row in rows {
            let Ok(uid) = Uid::try_from(row.responder_uid) else {
                warn!("Skipping prediction owner with invalid uid {}", row.responder_uid);
                continue;
            };
            let key = (uid, row.responder_identity);
            if !active.contains(&key) {
                stale.push(key);
            }
        }
        Ok(stale)
    }
}

fn window_column(window: PredictionWindow) -> &'static str {
    match window {
        PredictionWindow::Hours24 => "prediction_24_hour",
        PredictionWindow::Hours12 => "prediction_12_hour",
        PredictionWindow::Hours4 => "prediction_4_hour",
        PredictionWindow::Minutes10 => "prediction_10_min",
    }
}

#[async_trait]
impl PredictionStore for SqliteStore {
    async fn matches_to_predict(&self, now: DateTime<Utc>) -> Result<Vec<Match>> {
        let rows: Vec<MatchRow> = sqlx::query_as(
            r#"
            SELECT match_id, match_date, sport, league, home_team_name, away_team_name,
                   home_team_score, away_team_score, is_complete
            FROM matches
            WHERE is_complete = 0 AND match_date > ?
            ORDER BY match_date ASC
            "#,
        )
        .bind(to_millis(&now))
        .fetch_all(&self.pool)
        .await?;

        let mut matches = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.match_id.clone();
            match Match::try_from(row) {
                Ok(m) => matches.push(m),
                Err(e) => warn!(match_id = %id, "Skipping unreadable match row: {e}"),
            }
        }
        Ok(matches)
    }

    async fn window_states(&self) -> Result<HashMap<String, WindowFlags>> {
        let rows: Vec<WindowStateRow> = sqlx::query_as(
            r#"
            SELECT match_id, prediction_24_hour, prediction_12_hour, prediction_4_hour, prediction_10_min
            FROM match_prediction_requests
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| (r.match_id.clone(), WindowFlags::from(r)))
            .collect())
    }

    async fn mark_windows_fired(&self, fired: &[(String, PredictionWindow)]) -> Result<()> {
        if fired.is_empty() {
            return Ok(());
        }
        let now = to_millis(&Utc::now());
        let mut tx = self.pool.begin().await?;
        for (match_id, window) in fired {
            sqlx::query(
                "INSERT OR IGNORE INTO match_prediction_requests (match_id, last_updated) VALUES (?, ?)",
            )
            .bind(match_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            // Column name comes from a closed enum, never from input.
            let sql = format!(
                "UPDATE match_prediction_requests SET {} = 1, last_updated = ? WHERE match_id = ?",
                window_column(*window)
            );
            sqlx::query(&sql)
                .bind(now)
                .bind(match_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_predictions(&self, predictions: &[Prediction]) -> Result<u64> {
        if predictions.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;
        for p in predictions {
            let result = sqlx::query(
                r#"
                INSERT INTO match_predictions (
                    responder_uid, responder_identity, match_id, match_date, sport, league,
                    home_team_name, away_team_name, request_window, app_request_id,
                    probability_choice, probability, prediction_date
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (match_id, responder_uid, responder_identity, request_window) DO UPDATE SET
                    probability_choice = excluded.probability_choice,
                    probability = excluded.probability,
                    prediction_date = excluded.prediction_date,
                    app_request_id = excluded.app_request_id
                WHERE match_predictions.is_scored = 0
                "#,
            )
            .bind(i64::from(p.responder_uid))
            .bind(&p.responder_identity)
            .bind(&p.match_id)
            .bind(to_millis(&p.match_date))
            .bind(i64::from(u8::from(p.sport)))
            .bind(&p.league)
            .bind(&p.home_team_name)
            .bind(&p.away_team_name)
            .bind(&p.window)
            .bind(&p.app_request_id)
            .bind(p.probability_choice.as_str())
            .bind(p.probability)
            .bind(to_millis(&p.prediction_date))
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn predictions_to_score(&self, limit: i64) -> Result<Vec<ScoreablePrediction>> {
        // Closing line: the last snapshot at or before kickoff, else the one closest after it.
        let sql = format!(
            r#"
            SELECT {PREDICTION_COLUMNS},
                   m.home_team_score AS actual_home_score,
                   m.away_team_score AS actual_away_score,
                   o.home_odds, o.away_odds, o.draw_odds,
                   o.last_updated AS odds_updated
            FROM match_predictions p
            JOIN matches m ON m.match_id = p.match_id
            JOIN match_odds o ON o.match_id = p.match_id
            WHERE p.is_scored = 0
              AND m.is_complete = 1
              AND m.home_team_score IS NOT NULL
              AND m.away_team_score IS NOT NULL
              AND o.id = (
                  SELECT o2.id FROM match_odds o2
                  WHERE o2.match_id = m.match_id
                  ORDER BY (o2.last_updated <= m.match_date) DESC,
                           ABS(o2.last_updated - m.match_date) ASC
                  LIMIT 1
              )
            ORDER BY p.prediction_id ASC
            LIMIT ?
            "#
        );
        let rows: Vec<ScoreableRow> = sqlx::query_as(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.prediction.prediction_id;
            match ScoreablePrediction::try_from(row) {
                Ok(sp) => out.push(sp),
                Err(e) => warn!(prediction_id = id, "Skipping unreadable prediction row: {e}"),
            }
        }
        Ok(out)
    }

    async fn mark_predictions_scored(&self, predictions: &[Prediction]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut updated = 0u64;
        for p in predictions {
            let Some(id) = p.prediction_id else {
                return Err(AppError::Payload(format!("prediction {} has no id", p.key())));
            };
            let result = sqlx::query(
                r#"
                UPDATE match_predictions
                SET is_scored = 1, scored_date = ?, closing_edge = ?
                WHERE prediction_id = ? AND is_scored = 0
                "#,
            )
            .bind(p.scored_date.as_ref().map(to_millis))
            .bind(p.closing_edge)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                debug!(prediction_id = id, "Prediction already scored, left untouched");
            }
            updated += result.rows_affected();
        }
        tx.commit().await?;
        Ok(updated)
    }

    async fn delete_unscored_deregistered(&self, active: &HashSet<ResponderKey>) -> Result<u64> {
        let stale = self.stale_responders(active).await?;
        if stale.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let mut deleted = 0u64;
        for (uid, identity) in &stale {
            let result = sqlx::query(
                "DELETE FROM match_predictions WHERE responder_uid = ? AND responder_identity = ? AND is_scored = 0",
            )
            .bind(i64::from(*uid))
            .bind(identity)
            .execute(&mut *tx)
            .await?;
            deleted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(deleted)
    }

    async fn archive_deregistered(&self, active: &HashSet<ResponderKey>) -> Result<u64> {
        let stale = self.stale_responders(active).await?;
        if stale.is_empty() {
            return Ok(0);
        }
        let now = to_millis(&Utc::now());
        let mut tx = self.pool.begin().await?;
        let mut archived = 0u64;
        for (uid, identity) in &stale {
            let copied = sqlx::query(
                r#"
                INSERT OR IGNORE INTO match_predictions_archive (
                    prediction_id, responder_uid, responder_identity, match_id, match_date, sport,
                    league, home_team_name, away_team_name, request_window, app_request_id,
                    probability_choice, probability, prediction_date, is_scored, scored_date,
                    closing_edge, archived_at
                )
                SELECT prediction_id, responder_uid, responder_identity, match_id, match_date, sport,
                       league, home_team_name, away_team_name, request_window, app_request_id,
                       probability_choice, probability, prediction_date, is_scored, scored_date,
                       closing_edge, ?
                FROM match_predictions
                WHERE responder_uid = ? AND responder_identity = ? AND is_scored = 1
                "#,
            )
            .bind(now)
            .bind(i64::from(*uid))
            .bind(identity)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "DELETE FROM match_predictions WHERE responder_uid = ? AND responder_identity = ? AND is_scored = 1",
            )
            .bind(i64::from(*uid))
            .bind(identity)
            .execute(&mut *tx)
            .await?;
            archived += copied.rows_affected();
        }
        tx.commit().await?;
        Ok(archived)
    }

    async fn upsert_matches(&self, matches: &[Match]) -> Result<u64> {
        if matches.is_empty() {
            return Ok(0);
        }
        let now = to_millis(&Utc::now());
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;
        for m in matches {
            // Identity columns are only written on insert.
            let result = sqlx::query(
                r#"
                INSERT INTO matches (
                    match_id, match_date, sport, league, home_team_name, away_team_name,
                    home_team_score, away_team_score, is_complete, last_updated
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (match_id) DO UPDATE SET
                    home_team_score = excluded.home_team_score,
                    away_team_score = excluded.away_team_score,
                    is_complete = excluded.is_complete,
                    last_updated = excluded.last_updated
                "#,
            )
            .bind(&m.match_id)
            .bind(to_millis(&m.match_date))
            .bind(i64::from(u8::from(m.sport)))
            .bind(&m.league)
            .bind(&m.home_team_name)
            .bind(&m.away_team_name)
            .bind(m.home_team_score)
            .bind(m.away_team_score)
            .bind(i64::from(m.is_complete))
            .bind(now)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn insert_match_odds(&self, odds: &[MatchOdds]) -> Result<u64> {
        if odds.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for o in odds {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO match_odds (match_id, home_odds, away_odds, draw_odds, last_updated)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&o.match_id)
            .bind(o.home_odds)
            .bind(o.away_odds)
            .bind(o.draw_odds)
            .bind(to_millis(&o.last_updated))
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn summary(&self) -> Result<StoreSummary> {
        let now = to_millis(&Utc::now());
        let (matches, open_matches): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN is_complete = 0 AND match_date > ? THEN 1 ELSE 0 END), 0) FROM matches",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        let (predictions, scored_predictions): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(is_scored), 0) FROM match_predictions",
        )
        .fetch_one(&self.pool)
        .await?;
        let archived_predictions: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM match_predictions_archive")
                .fetch_one(&self.pool)
                .await?;
        let windows_fired: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(prediction_24_hour + prediction_12_hour + prediction_4_hour + prediction_10_min), 0)
            FROM match_prediction_requests
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreSummary {
            matches,
            open_matches,
            predictions,
            scored_predictions,
            archived_predictions,
            windows_fired,
        })
    }
}
