use std::time::Duration;

use crate::error::{AppError, Result};

pub const DATA_API_URL: &str = "https://api.sportstensor.com";
pub const POPULATION_URL: &str = "http://127.0.0.1:9944/population";

/// Population resync cadence. Staleness between refreshes is tolerated.
pub const POPULATION_REFRESH_INTERVAL_SECS: u64 = 90;

/// How often the scheduler looks for due prediction windows.
pub const PREDICTION_CYCLE_INTERVAL_SECS: u64 = 60;

/// How often completed matches are scored and reported.
pub const SCORING_INTERVAL_SECS: u64 = 300;

/// How often matches and odds are pulled from the data API.
pub const MATCH_SYNC_INTERVAL_SECS: u64 = 300;

/// Upstream posting: attempts per payload and the fixed pause between them.
pub const UPSTREAM_MAX_ATTEMPTS: u32 = 3;
pub const UPSTREAM_RETRY_DELAY_SECS: u64 = 2;

/// Timeout for plain upstream HTTP calls (data API, population source, aggregator).
pub const HTTP_CLIENT_TIMEOUT_SECS: u64 = 30;

/// Route names a responder serves.
pub const PREDICTION_ROUTE: &str = "GetMatchPrediction";
pub const COMMITMENT_ROUTE: &str = "GetLeagueCommitments";

/// Response header carrying the replying responder's identity.
pub const RESPONDER_IDENTITY_HEADER: &str = "x-responder-identity";

/// Leagues a responder may commit to. Anything else in a commitment reply is dropped.
pub const KNOWN_LEAGUES: &[&str] = &[
    "MLB",
    "NFL",
    "NBA",
    "MLS",
    "EPL",
    "IPL",
    "English Premier League",
    "American Major League Soccer",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Base URL of the upstream data API / aggregator (DATA_API_URL)
    pub data_api_url: String,
    /// Responder population listing (POPULATION_URL)
    pub population_url: String,
    /// Identity presented in the signed auth header (ORCHESTRATOR_IDENTITY)
    pub identity: String,
    /// HMAC key for the auth header signature (SIGNING_SECRET, required)
    pub signing_secret: String,
    /// This orchestrator's own uid in the population, never selected (SELF_UID)
    pub self_uid: Option<u32>,
    /// Only matches in these leagues are scheduled (ACTIVE_LEAGUES, comma-separated)
    pub active_leagues: Vec<String>,
    /// Shared deadline for one dispatch fan-out (DISPATCH_TIMEOUT_SECS)
    pub dispatch_timeout: Duration,
    /// Responders above this stake are not predictors (STAKE_CEILING)
    pub stake_ceiling: f64,
    /// Responders solicited per request; 0 or negative means all eligible (RESPONDERS_PER_REQUEST)
    pub responders_per_request: i64,
    /// Max predictions scored per pass (SCORING_BATCH_SIZE)
    pub scoring_batch_size: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let signing_secret = std::env::var("SIGNING_SECRET").unwrap_or_default();
        if signing_secret.is_empty() {
            return Err(AppError::Config("SIGNING_SECRET must be set".to_string()));
        }

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "orchestrator.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            data_api_url: std::env::var("DATA_API_URL")
                .unwrap_or_else(|_| DATA_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            population_url: std::env::var("POPULATION_URL")
                .unwrap_or_else(|_| POPULATION_URL.to_string()),
            identity: std::env::var("ORCHESTRATOR_IDENTITY")
                .unwrap_or_else(|_| "orchestrator".to_string()),
            signing_secret,
            self_uid: std::env::var("SELF_UID").ok().and_then(|s| s.parse::<u32>().ok()),
            active_leagues: parse_list(
                &std::env::var("ACTIVE_LEAGUES")
                    .unwrap_or_else(|_| "MLB,NFL,English Premier League,American Major League Soccer".to_string()),
            ),
            dispatch_timeout: Duration::from_secs(
                std::env::var("DISPATCH_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse::<u64>()
                    .unwrap_or(20),
            ),
            stake_ceiling: std::env::var("STAKE_CEILING")
                .unwrap_or_else(|_| "4096".to_string())
                .parse::<f64>()
                .unwrap_or(4096.0),
            responders_per_request: std::env::var("RESPONDERS_PER_REQUEST")
                .unwrap_or_else(|_| "0".to_string())
                .parse::<i64>()
                .unwrap_or(0),
            scoring_batch_size: std::env::var("SCORING_BATCH_SIZE")
                .unwrap_or_else(|_| "500".to_string())
                .parse::<i64>()
                .unwrap_or(500),
        })
    }

    pub fn matches_endpoint(&self) -> String {
        format!("{}/matches", self.data_api_url)
    }

    pub fn odds_endpoint(&self) -> String {
        format!("{}/matchOdds", self.data_api_url)
    }

    /// GET lists pending app requests; POST accepts their responses.
    pub fn app_predictions_endpoint(&self) -> String {
        format!("{}/AppMatchPredictionsForValidators", self.data_api_url)
    }

    pub fn edge_results_endpoint(&self) -> String {
        format!("{}/predictionEdgeResults", self.data_api_url)
    }
}

/// Exact, case-sensitive match against the configured active leagues.
pub fn is_active_league(active_leagues: &[String], league: &str) -> bool {
    active_leagues.iter().any(|l| l == league)
}

pub fn is_known_league(league: &str) -> bool {
    KNOWN_LEAGUES.contains(&league)
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
impl Config {
    pub fn for_tests() -> Self {
        Self {
            log_level: "debug".to_string(),
            db_path: ":memory:".to_string(),
            api_port: 0,
            data_api_url: "http://127.0.0.1:9".to_string(),
            population_url: "http://127.0.0.1:9/population".to_string(),
            identity: "orchestrator-test".to_string(),
            signing_secret: "secret".to_string(),
            self_uid: None,
            active_leagues: vec!["MLB".to_string(), "NFL".to_string()],
            dispatch_timeout: Duration::from_secs(5),
            stake_ceiling: 1000.0,
            responders_per_request: 0,
            scoring_batch_size: 100,
        }
    }
}
