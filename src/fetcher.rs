use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{Config, HTTP_CLIENT_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::signer::Signer;
use crate::types::{
    parse_match_date, AppPredictionRequest, Match, MatchOdds, Responder, Sport,
};

#[derive(Debug, Default, PartialEq)]
pub struct FetchStats {
    pub api_total: usize,
    pub skipped_missing_id: usize,
    pub skipped_malformed: usize,
    pub accepted: usize,
}

pub fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_CLIENT_TIMEOUT_SECS))
        .build()?)
}

async fn get_json(client: &reqwest::Client, url: &str, signer: Option<&dyn Signer>) -> Result<Value> {
    let mut req = client.get(url);
    if let Some(signer) = signer {
        let (user, signature) = signer.credentials()?;
        req = req.basic_auth(user, Some(signature));
    }
    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(AppError::UpstreamStatus { endpoint: url.to_string(), status: status.as_u16() });
    }
    Ok(resp.json().await?)
}

/// Items of `body[key]`, or an empty list when the key is absent.
fn items<'a>(body: &'a Value, key: &str) -> &'a [Value] {
    body.get(key).and_then(|v| v.as_array()).map(Vec::as_slice).unwrap_or(&[])
}

fn parse_items<T>(
    list: &[Value],
    kind: &str,
    parse: impl Fn(&Value) -> Option<T>,
) -> (Vec<T>, FetchStats) {
    let mut stats = FetchStats { api_total: list.len(), ..Default::default() };
    let mut out = Vec::with_capacity(list.len());
    for item in list {
        if item.get("matchId").and_then(|v| v.as_str()).is_none() {
            warn!("Skipping {kind} missing matchId: {item}");
            stats.skipped_missing_id += 1;
            continue;
        }
        match parse(item) {
            Some(v) => out.push(v),
            None => {
                warn!("Skipping malformed {kind}: {item}");
                stats.skipped_malformed += 1;
            }
        }
    }
    stats.accepted = out.len();
    (out, stats)
}

// ---------------------------------------------------------------------------
// Matches and odds
// ---------------------------------------------------------------------------

pub async fn fetch_matches(client: &reqwest::Client, cfg: &Config) -> Result<(Vec<Match>, FetchStats)> {
    let body = get_json(client, &cfg.matches_endpoint(), None).await?;
    Ok(parse_items(items(&body, "matches"), "match", parse_match))
}

pub async fn fetch_match_odds(
    client: &reqwest::Client,
    cfg: &Config,
) -> Result<(Vec<MatchOdds>, FetchStats)> {
    let body = get_json(client, &cfg.odds_endpoint(), None).await?;
    Ok(parse_items(items(&body, "match_odds"), "odds snapshot", parse_match_odds))
}

/// Accepts either the integer code or the sport's name.
pub fn parse_sport(v: &Value) -> Option<Sport> {
    if let Some(code) = v.as_u64() {
        return u8::try_from(code).ok().and_then(|c| Sport::try_from(c).ok());
    }
    match v.as_str()?.to_ascii_lowercase().as_str() {
        "soccer" => Some(Sport::Soccer),
        "football" => Some(Sport::Football),
        "baseball" => Some(Sport::Baseball),
        "basketball" => Some(Sport::Basketball),
        "cricket" => Some(Sport::Cricket),
        other => other.parse::<u8>().ok().and_then(|c| Sport::try_from(c).ok()),
    }
}

fn as_flag(v: Option<&Value>) -> bool {
    match v {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
        _ => false,
    }
}

fn as_score(v: Option<&Value>) -> Option<i32> {
    v.and_then(|x| x.as_i64()).and_then(|x| i32::try_from(x).ok())
}

/// Odds arrive as numbers or numeric strings.
fn as_odds(v: Option<&Value>) -> Option<f64> {
    let v = v?;
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn as_text(item: &Value, key: &str) -> Option<String> {
    item.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

pub fn parse_match(item: &Value) -> Option<Match> {
    let league = as_text(item, "matchLeague").or_else(|| as_text(item, "league"))?;
    Some(Match {
        match_id: as_text(item, "matchId")?,
        match_date: parse_match_date(item.get("matchDate")?.as_str()?)?,
        sport: parse_sport(item.get("sport")?)?,
        league,
        home_team_name: as_text(item, "homeTeamName")?,
        away_team_name: as_text(item, "awayTeamName")?,
        home_team_score: as_score(item.get("homeTeamScore")),
        away_team_score: as_score(item.get("awayTeamScore")),
        is_complete: as_flag(item.get("isComplete")),
    })
}

pub fn parse_match_odds(item: &Value) -> Option<MatchOdds> {
    Some(MatchOdds {
        match_id: as_text(item, "matchId")?,
        home_odds: as_odds(item.get("homeTeamOdds"))?,
        away_odds: as_odds(item.get("awayTeamOdds"))?,
        draw_odds: as_odds(item.get("drawOdds")),
        last_updated: parse_match_date(item.get("lastUpdated")?.as_str()?)?,
    })
}

// ---------------------------------------------------------------------------
// Population and app requests
// ---------------------------------------------------------------------------

pub async fn fetch_population(client: &reqwest::Client, cfg: &Config) -> Result<Vec<Responder>> {
    let body = get_json(client, &cfg.population_url, None).await?;
    let population: Vec<Responder> = serde_json::from_value(body)?;
    debug!(responders = population.len(), "Fetched responder population");
    Ok(population)
}

pub async fn fetch_app_requests(
    client: &reqwest::Client,
    cfg: &Config,
    signer: &dyn Signer,
) -> Result<Vec<AppPredictionRequest>> {
    let body = get_json(client, &cfg.app_predictions_endpoint(), Some(signer)).await?;
    let (requests, stats) = parse_items(items(&body, "requests"), "app request", |item| {
        serde_json::from_value::<AppPredictionRequest>(item.clone()).ok()
    });
    if stats.skipped_malformed > 0 || stats.skipped_missing_id > 0 {
        warn!(?stats, "Some app requests were unusable");
    }
    Ok(requests)
}
