//! Row types matching `migrations/0001_init.sql`. Timestamps are unix milliseconds.
use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::types::{
    Match, MatchOdds, Prediction, ProbabilityChoice, ScoreablePrediction, Sport, Uid,
    WindowFlags,
};

#[derive(Debug, sqlx::FromRow)]
pub struct MatchRow {
    pub match_id: String,
    pub match_date: i64,
    pub sport: i64,
    pub league: String,
    pub home_team_name: String,
    pub away_team_name: String,
    pub home_team_score: Option<i64>,
    pub away_team_score: Option<i64>,
    pub is_complete: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct WindowStateRow {
    pub match_id: String,
    pub prediction_24_hour: i64,
    pub prediction_12_hour: i64,
    pub prediction_4_hour: i64,
    pub prediction_10_min: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct PredictionRow {
    pub prediction_id: i64,
    pub responder_uid: i64,
    pub responder_identity: String,
    pub match_id: String,
    pub match_date: i64,
    pub sport: i64,
    pub league: String,
    pub home_team_name: String,
    pub away_team_name: String,
    pub request_window: String,
    pub app_request_id: Option<String>,
    pub probability_choice: String,
    pub probability: f64,
    pub prediction_date: i64,
    pub is_scored: i64,
    pub scored_date: Option<i64>,
    pub closing_edge: Option<f64>,
}

/// Unscored prediction joined with final scores and the chosen closing odds snapshot.
#[derive(Debug, sqlx::FromRow)]
pub struct ScoreableRow {
    #[sqlx(flatten)]
    pub prediction: PredictionRow,
    pub actual_home_score: i64,
    pub actual_away_score: i64,
    pub home_odds: f64,
    pub away_odds: f64,
    pub draw_odds: Option<f64>,
    pub odds_updated: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct ResponderPairRow {
    pub responder_uid: i64,
    pub responder_identity: String,
}

pub fn to_millis(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| AppError::Payload(format!("timestamp out of range: {ms}")))
}

fn sport_from_column(code: i64) -> Result<Sport> {
    u8::try_from(code)
        .map_err(|_| AppError::Payload(format!("unknown sport code {code}")))
        .and_then(|c| Sport::try_from(c).map_err(AppError::Payload))
}

fn score_from_column(v: i64) -> Result<i32> {
    i32::try_from(v).map_err(|_| AppError::Payload(format!("score out of range: {v}")))
}

impl TryFrom<MatchRow> for Match {
    type Error = AppError;

    fn try_from(r: MatchRow) -> Result<Self> {
        Ok(Match {
            match_date: from_millis(r.match_date)?,
            sport: sport_from_column(r.sport)?,
            home_team_score: r.home_team_score.map(score_from_column).transpose()?,
            away_team_score: r.away_team_score.map(score_from_column).transpose()?,
            is_complete: r.is_complete != 0,
            match_id: r.match_id,
            league: r.league,
            home_team_name: r.home_team_name,
            away_team_name: r.away_team_name,
        })
    }
}

impl From<&WindowStateRow> for WindowFlags {
    fn from(r: &WindowStateRow) -> Self {
        WindowFlags {
            hours_24: r.prediction_24_hour != 0,
            hours_12: r.prediction_12_hour != 0,
            hours_4: r.prediction_4_hour != 0,
            minutes_10: r.prediction_10_min != 0,
        }
    }
}

impl TryFrom<PredictionRow> for Prediction {
    type Error = AppError;

    fn try_from(r: PredictionRow) -> Result<Self> {
        let probability_choice = ProbabilityChoice::from_label(&r.probability_choice)
            .ok_or_else(|| AppError::Payload(format!("bad choice column {}", r.probability_choice)))?;
        Ok(Prediction {
            prediction_id: Some(r.prediction_id),
            responder_uid: Uid::try_from(r.responder_uid)
                .map_err(|_| AppError::Payload(format!("bad uid {}", r.responder_uid)))?,
            match_date: from_millis(r.match_date)?,
            sport: sport_from_column(r.sport)?,
            prediction_date: from_millis(r.prediction_date)?,
            scored_date: r.scored_date.map(from_millis).transpose()?,
            is_scored: r.is_scored != 0,
            probability_choice,
            responder_identity: r.responder_identity,
            match_id: r.match_id,
            league: r.league,
            home_team_name: r.home_team_name,
            away_team_name: r.away_team_name,
            window: r.request_window,
            app_request_id: r.app_request_id,
            probability: r.probability,
            closing_edge: r.closing_edge,
        })
    }
}

impl TryFrom<ScoreableRow> for ScoreablePrediction {
    type Error = AppError;

    fn try_from(r: ScoreableRow) -> Result<Self> {
        let prediction = Prediction::try_from(r.prediction)?;
        Ok(ScoreablePrediction {
            closing_odds: MatchOdds {
                match_id: prediction.match_id.clone(),
                home_odds: r.home_odds,
                away_odds: r.away_odds,
                draw_odds: r.draw_odds,
                last_updated: from_millis(r.odds_updated)?,
            },
            actual_home_score: score_from_column(r.actual_home_score)?,
            actual_away_score: score_from_column(r.actual_away_score)?,
            prediction,
        })
    }
}
