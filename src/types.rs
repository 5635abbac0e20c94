use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Position of a responder in the population.
pub type Uid = u32;

/// Kickoff times travel on the wire as naive UTC strings in this layout.
pub const MATCH_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_match_date(dt: &DateTime<Utc>) -> String {
    dt.format(MATCH_DATE_FORMAT).to_string()
}

/// Accepts the wire layout as well as RFC 3339 / `T`-separated variants.
pub fn parse_match_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let s = s.strip_suffix('Z').unwrap_or(s);
    let s = if let Some(dot) = s.find('.') { &s[..dot] } else { s };
    NaiveDateTime::parse_from_str(s, MATCH_DATE_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .map(|n| n.and_utc())
}

// ---------------------------------------------------------------------------
// Sport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Sport {
    Soccer,
    Football,
    Baseball,
    Basketball,
    Cricket,
    /// Codes reserved for sources not wired up yet.
    Reserved6,
    Reserved7,
}

impl TryFrom<u8> for Sport {
    type Error = String;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        match code {
            1 => Ok(Sport::Soccer),
            2 => Ok(Sport::Football),
            3 => Ok(Sport::Baseball),
            4 => Ok(Sport::Basketball),
            5 => Ok(Sport::Cricket),
            6 => Ok(Sport::Reserved6),
            7 => Ok(Sport::Reserved7),
            other => Err(format!("unknown sport code {other}")),
        }
    }
}

impl From<Sport> for u8 {
    fn from(sport: Sport) -> u8 {
        match sport {
            Sport::Soccer => 1,
            Sport::Football => 2,
            Sport::Baseball => 3,
            Sport::Basketball => 4,
            Sport::Cricket => 5,
            Sport::Reserved6 => 6,
            Sport::Reserved7 => 7,
        }
    }
}

impl std::fmt::Display for Sport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Sport::Soccer => "soccer",
            Sport::Football => "football",
            Sport::Baseball => "baseball",
            Sport::Basketball => "basketball",
            Sport::Cricket => "cricket",
            Sport::Reserved6 => "unknown_6",
            Sport::Reserved7 => "unknown_7",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Match
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub match_id: String,
    pub match_date: DateTime<Utc>,
    pub sport: Sport,
    pub league: String,
    pub home_team_name: String,
    pub away_team_name: String,
    pub home_team_score: Option<i32>,
    pub away_team_score: Option<i32>,
    pub is_complete: bool,
}

impl Match {
    pub fn time_until_kickoff(&self, now: DateTime<Utc>) -> TimeDelta {
        self.match_date - now
    }

    /// Actual result from final scores; None until both scores are known.
    pub fn winner(&self) -> Option<ProbabilityChoice> {
        Some(winner_from_scores(self.home_team_score?, self.away_team_score?))
    }
}

pub fn winner_from_scores(home: i32, away: i32) -> ProbabilityChoice {
    match home.cmp(&away) {
        std::cmp::Ordering::Greater => ProbabilityChoice::HomeTeam,
        std::cmp::Ordering::Less => ProbabilityChoice::AwayTeam,
        std::cmp::Ordering::Equal => ProbabilityChoice::Draw,
    }
}

/// One consensus odds snapshot, decimal odds.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOdds {
    pub match_id: String,
    pub home_odds: f64,
    pub away_odds: f64,
    pub draw_odds: Option<f64>,
    pub last_updated: DateTime<Utc>,
}

impl MatchOdds {
    pub fn odds_for(&self, side: ProbabilityChoice) -> Option<f64> {
        match side {
            ProbabilityChoice::HomeTeam => Some(self.home_odds),
            ProbabilityChoice::AwayTeam => Some(self.away_odds),
            ProbabilityChoice::Draw => self.draw_odds,
        }
    }
}

// ---------------------------------------------------------------------------
// Probability choice
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbabilityChoice {
    HomeTeam,
    AwayTeam,
    Draw,
}

impl ProbabilityChoice {
    /// Lenient label lookup: case-insensitive, `_`, `-` and spaces ignored.
    pub fn from_label(label: &str) -> Option<Self> {
        let norm: String = label
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(|c| c.to_lowercase())
            .collect();
        match norm.as_str() {
            "home" | "hometeam" => Some(ProbabilityChoice::HomeTeam),
            "away" | "awayteam" => Some(ProbabilityChoice::AwayTeam),
            "draw" | "tie" => Some(ProbabilityChoice::Draw),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProbabilityChoice::HomeTeam => "HomeTeam",
            ProbabilityChoice::AwayTeam => "AwayTeam",
            ProbabilityChoice::Draw => "Draw",
        }
    }
}

impl std::fmt::Display for ProbabilityChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// `probabilityChoice` as sent by a responder: either the canonical enum or a free label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChoiceField {
    Choice(ProbabilityChoice),
    Label(String),
}

impl ChoiceField {
    pub fn resolve(&self) -> Option<ProbabilityChoice> {
        match self {
            ChoiceField::Choice(c) => Some(*c),
            ChoiceField::Label(l) => ProbabilityChoice::from_label(l),
        }
    }
}

// ---------------------------------------------------------------------------
// Prediction windows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredictionWindow {
    Hours24,
    Hours12,
    Hours4,
    Minutes10,
}

impl PredictionWindow {
    /// Evaluation order. The first due window wins.
    pub const ALL: [PredictionWindow; 4] = [
        PredictionWindow::Hours24,
        PredictionWindow::Hours12,
        PredictionWindow::Hours4,
        PredictionWindow::Minutes10,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PredictionWindow::Hours24 => "24_hour",
            PredictionWindow::Hours12 => "12_hour",
            PredictionWindow::Hours4 => "4_hour",
            PredictionWindow::Minutes10 => "10_min",
        }
    }

    /// `(upper, lower)` time-before-kickoff bounds.
    pub fn bounds(&self) -> (TimeDelta, TimeDelta) {
        match self {
            PredictionWindow::Hours24 => (TimeDelta::hours(24), TimeDelta::hours(23)),
            PredictionWindow::Hours12 => (TimeDelta::hours(12), TimeDelta::hours(11)),
            PredictionWindow::Hours4 => (TimeDelta::hours(4), TimeDelta::hours(3)),
            PredictionWindow::Minutes10 => (TimeDelta::minutes(15), TimeDelta::minutes(5)),
        }
    }

    /// `lower < time_until <= upper`.
    pub fn contains(&self, time_until: TimeDelta) -> bool {
        let (upper, lower) = self.bounds();
        time_until <= upper && time_until > lower
    }
}

impl std::fmt::Display for PredictionWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Per-match request flags. Each flag only ever goes false → true.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowFlags {
    pub hours_24: bool,
    pub hours_12: bool,
    pub hours_4: bool,
    pub minutes_10: bool,
}

impl WindowFlags {
    pub fn is_set(&self, window: PredictionWindow) -> bool {
        match window {
            PredictionWindow::Hours24 => self.hours_24,
            PredictionWindow::Hours12 => self.hours_12,
            PredictionWindow::Hours4 => self.hours_4,
            PredictionWindow::Minutes10 => self.minutes_10,
        }
    }

    pub fn set(&mut self, window: PredictionWindow) {
        match window {
            PredictionWindow::Hours24 => self.hours_24 = true,
            PredictionWindow::Hours12 => self.hours_12 = true,
            PredictionWindow::Hours4 => self.hours_4 = true,
            PredictionWindow::Minutes10 => self.minutes_10 = true,
        }
    }
}

/// Why a prediction was solicited. Stored in the `window` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    Scheduled(PredictionWindow),
    App { request_id: String },
}

pub const APP_WINDOW_LABEL: &str = "app";

impl RequestKind {
    pub fn window_label(&self) -> &'static str {
        match self {
            RequestKind::Scheduled(w) => w.label(),
            RequestKind::App { .. } => APP_WINDOW_LABEL,
        }
    }

    pub fn app_request_id(&self) -> Option<&str> {
        match self {
            RequestKind::Scheduled(_) => None,
            RequestKind::App { request_id } => Some(request_id),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire payloads exchanged with responders
// ---------------------------------------------------------------------------

/// Body of a prediction request, echoed back (filled in) by the responder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchPredictionPayload {
    pub match_id: String,
    pub match_date: String,
    pub sport: Sport,
    pub league: String,
    pub home_team_name: String,
    pub away_team_name: String,
    #[serde(default)]
    pub home_team_score: Option<i32>,
    #[serde(default)]
    pub away_team_score: Option<i32>,
    #[serde(default)]
    pub probability_choice: Option<ChoiceField>,
    /// Kept untyped so a non-numeric value is a validation reject, not a decode failure.
    #[serde(default)]
    pub probability: Option<serde_json::Value>,
    #[serde(default)]
    pub closing_edge: Option<serde_json::Value>,
}

impl MatchPredictionPayload {
    /// A blank request for a match: no scores, no probability, no edge.
    pub fn for_match(m: &Match) -> Self {
        Self {
            match_id: m.match_id.clone(),
            match_date: format_match_date(&m.match_date),
            sport: m.sport,
            league: m.league.clone(),
            home_team_name: m.home_team_name.clone(),
            away_team_name: m.away_team_name.clone(),
            home_team_score: None,
            away_team_score: None,
            probability_choice: None,
            probability: None,
            closing_edge: None,
        }
    }

    /// Copy with score-bearing fields blanked, for log lines.
    pub fn redacted(&self) -> Self {
        let redact = |present: bool| present.then(|| serde_json::Value::String("REDACTED".into()));
        Self {
            home_team_score: None,
            away_team_score: None,
            probability_choice: self
                .probability_choice
                .as_ref()
                .map(|_| ChoiceField::Label("REDACTED".to_string())),
            probability: redact(self.probability.is_some()),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionEnvelope {
    pub match_prediction: MatchPredictionPayload,
}

/// One outbound prediction request produced by the scheduler or the app cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRequest {
    pub kind: RequestKind,
    pub kickoff: DateTime<Utc>,
    pub payload: MatchPredictionPayload,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitmentEnvelope {
    #[serde(default)]
    pub leagues: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Responders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Responder {
    pub uid: Uid,
    pub identity: String,
    pub host: String,
    pub port: u16,
    pub is_serving: bool,
    pub stake: f64,
}

impl Responder {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

// ---------------------------------------------------------------------------
// Predictions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub prediction_id: Option<i64>,
    pub responder_uid: Uid,
    pub responder_identity: String,
    pub match_id: String,
    pub match_date: DateTime<Utc>,
    pub sport: Sport,
    pub league: String,
    pub home_team_name: String,
    pub away_team_name: String,
    pub window: String,
    pub app_request_id: Option<String>,
    pub probability_choice: ProbabilityChoice,
    pub probability: f64,
    pub prediction_date: DateTime<Utc>,
    pub is_scored: bool,
    pub scored_date: Option<DateTime<Utc>>,
    pub closing_edge: Option<f64>,
}

impl Prediction {
    /// Record the scoring outcome. A prediction is scored once.
    pub fn mark_scored(&mut self, edge: f64, at: DateTime<Utc>) -> Result<()> {
        if self.is_scored {
            return Err(AppError::AlreadyScored(self.key()));
        }
        self.closing_edge = Some(edge);
        self.is_scored = true;
        self.scored_date = Some(at);
        Ok(())
    }

    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.match_id, self.responder_uid, self.window)
    }
}

/// An unscored prediction joined with the ground truth needed to score it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreablePrediction {
    pub prediction: Prediction,
    pub actual_home_score: i32,
    pub actual_away_score: i32,
    pub closing_odds: MatchOdds,
}

impl ScoreablePrediction {
    pub fn actual_winner(&self) -> ProbabilityChoice {
        winner_from_scores(self.actual_home_score, self.actual_away_score)
    }

    pub fn actual_winner_odds(&self) -> Option<f64> {
        self.closing_odds.odds_for(self.actual_winner())
    }
}

/// One scoring pass. Index `i` of every vector describes the same prediction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoringBatch {
    #[serde(rename = "scores")]
    pub edge_scores: Vec<f64>,
    pub correct_winner_results: Vec<u8>,
    pub uids: Vec<Uid>,
    /// Identity that held each uid when the prediction was made.
    pub hotkeys: Vec<String>,
    pub sports: Vec<Sport>,
    pub leagues: Vec<String>,
}

impl ScoringBatch {
    pub fn push(&mut self, edge: f64, correct: u8, uid: Uid, identity: String, sport: Sport, league: String) {
        self.edge_scores.push(edge);
        self.correct_winner_results.push(correct);
        self.uids.push(uid);
        self.hotkeys.push(identity);
        self.sports.push(sport);
        self.leagues.push(league);
    }

    pub fn len(&self) -> usize {
        self.edge_scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edge_scores.is_empty()
    }
}

// ---------------------------------------------------------------------------
// App-originated requests
// ---------------------------------------------------------------------------

/// A prediction request raised by the app for one specific responder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppPredictionRequest {
    #[serde(rename = "app_request_id")]
    pub app_request_id: String,
    pub match_id: String,
    pub match_date: String,
    pub sport: Sport,
    pub league: String,
    pub home_team_name: String,
    pub away_team_name: String,
    #[serde(rename = "miner_hotkey")]
    pub responder_identity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppPredictionResponse {
    #[serde(rename = "app_request_id")]
    pub app_request_id: String,
    #[serde(rename = "miner_hotkey")]
    pub responder_identity: String,
    #[serde(flatten)]
    pub match_prediction: MatchPredictionPayload,
    pub miner_has_issue: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub miner_issue_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn sport_codes_round_trip_through_json() {
        let s: Sport = serde_json::from_str("3").unwrap();
        assert_eq!(s, Sport::Baseball);
        assert_eq!(serde_json::to_string(&Sport::Cricket).unwrap(), "5");
        assert!(serde_json::from_str::<Sport>("9").is_err());
    }

    #[test]
    fn choice_field_accepts_enum_or_label() {
        let c: ChoiceField = serde_json::from_str("\"AwayTeam\"").unwrap();
        assert_eq!(c, ChoiceField::Choice(ProbabilityChoice::AwayTeam));

        let l: ChoiceField = serde_json::from_str("\"HOME\"").unwrap();
        assert_eq!(l, ChoiceField::Label("HOME".to_string()));
        assert_eq!(l.resolve(), Some(ProbabilityChoice::HomeTeam));

        let bad = ChoiceField::Label("over".to_string());
        assert_eq!(bad.resolve(), None);
    }

    #[test]
    fn labels_are_normalized() {
        assert_eq!(ProbabilityChoice::from_label("home_team"), Some(ProbabilityChoice::HomeTeam));
        assert_eq!(ProbabilityChoice::from_label("Away Team"), Some(ProbabilityChoice::AwayTeam));
        assert_eq!(ProbabilityChoice::from_label("TIE"), Some(ProbabilityChoice::Draw));
        assert_eq!(ProbabilityChoice::from_label(""), None);
    }

    #[test]
    fn window_bounds_are_half_open_at_lower_edge() {
        let w = PredictionWindow::Hours24;
        assert!(w.contains(TimeDelta::hours(24)));
        assert!(w.contains(TimeDelta::minutes(23 * 60 + 30)));
        assert!(!w.contains(TimeDelta::hours(23)));
        assert!(!w.contains(TimeDelta::hours(24) + TimeDelta::seconds(1)));

        let m = PredictionWindow::Minutes10;
        assert!(m.contains(TimeDelta::minutes(15)));
        assert!(m.contains(TimeDelta::minutes(6)));
        assert!(!m.contains(TimeDelta::minutes(5)));
    }

    #[test]
    fn match_dates_parse_from_several_layouts() {
        let expected = Utc.with_ymd_and_hms(2024, 8, 1, 15, 30, 0).unwrap();
        assert_eq!(parse_match_date("2024-08-01 15:30:00"), Some(expected));
        assert_eq!(parse_match_date("2024-08-01T15:30:00"), Some(expected));
        assert_eq!(parse_match_date("2024-08-01T15:30:00Z"), Some(expected));
        assert_eq!(parse_match_date("2024-08-01T15:30:00.250"), Some(expected));
        assert_eq!(format_match_date(&expected), "2024-08-01 15:30:00");
        assert_eq!(parse_match_date("yesterday"), None);
    }

    #[test]
    fn winner_follows_scores() {
        assert_eq!(winner_from_scores(3, 1), ProbabilityChoice::HomeTeam);
        assert_eq!(winner_from_scores(0, 2), ProbabilityChoice::AwayTeam);
        assert_eq!(winner_from_scores(1, 1), ProbabilityChoice::Draw);
    }

    fn prediction() -> Prediction {
        Prediction {
            prediction_id: Some(7),
            responder_uid: 4,
            responder_identity: "5Hot".to_string(),
            match_id: "m1".to_string(),
            match_date: Utc.with_ymd_and_hms(2024, 8, 1, 15, 30, 0).unwrap(),
            sport: Sport::Baseball,
            league: "MLB".to_string(),
            home_team_name: "A".to_string(),
            away_team_name: "B".to_string(),
            window: "24_hour".to_string(),
            app_request_id: None,
            probability_choice: ProbabilityChoice::HomeTeam,
            probability: 0.6,
            prediction_date: Utc.with_ymd_and_hms(2024, 7, 31, 16, 0, 0).unwrap(),
            is_scored: false,
            scored_date: None,
            closing_edge: None,
        }
    }

    #[test]
    fn scoring_happens_once() {
        let mut p = prediction();
        let at = Utc.with_ymd_and_hms(2024, 8, 2, 0, 0, 0).unwrap();
        p.mark_scored(0.1, at).unwrap();
        assert!(p.is_scored);
        assert_eq!(p.closing_edge, Some(0.1));
        assert!(matches!(p.mark_scored(0.2, at), Err(AppError::AlreadyScored(_))));
        assert_eq!(p.closing_edge, Some(0.1));
    }

    #[test]
    fn redaction_hides_probabilities() {
        let mut payload = MatchPredictionPayload {
            match_id: "m1".into(),
            match_date: "2024-08-01 15:30:00".into(),
            sport: Sport::Soccer,
            league: "EPL".into(),
            home_team_name: "A".into(),
            away_team_name: "B".into(),
            home_team_score: Some(2),
            away_team_score: Some(1),
            probability_choice: Some(ChoiceField::Choice(ProbabilityChoice::HomeTeam)),
            probability: Some(serde_json::json!(0.7)),
            closing_edge: None,
        };
        let r = payload.redacted();
        assert_eq!(r.home_team_score, None);
        assert_eq!(r.probability, Some(serde_json::json!("REDACTED")));
        assert_eq!(r.match_id, "m1");
        payload.probability = None;
        assert_eq!(payload.redacted().probability, None);
    }
}
