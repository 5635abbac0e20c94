use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::thread_rng;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::api::health::{HealthState, LoopKind};
use crate::config::{Config, PREDICTION_CYCLE_INTERVAL_SECS, PREDICTION_ROUTE};
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::fetcher::fetch_app_requests;
use crate::population_refresh::self_exclusion;
use crate::recorder::Recorder;
use crate::reporter::Reporter;
use crate::scheduler::WindowScheduler;
use crate::selector::select_responders;
use crate::signer::Signer;
use crate::state::PopulationStore;
use crate::types::{
    parse_match_date, AppPredictionRequest, AppPredictionResponse, ChoiceField,
    MatchPredictionPayload, Prediction, PredictionEnvelope, PredictionRequest, RequestKind,
    Responder,
};
use crate::validator::validate_round;

const NO_PREDICTION_MESSAGE: &str = "Miner did not respond with a prediction.";

/// Counts from one scheduled pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    pub requests: usize,
    pub dispatched: usize,
    pub accepted: usize,
    pub recorded: u64,
}

/// Scheduler → selector → dispatcher → validator → recorder, plus the app-request round trip.
pub struct PredictionCycle {
    cfg: Config,
    client: reqwest::Client,
    signer: Arc<dyn Signer>,
    scheduler: Arc<WindowScheduler>,
    population: Arc<PopulationStore>,
    dispatcher: Arc<Dispatcher>,
    recorder: Arc<Recorder>,
    reporter: Arc<Reporter>,
}

impl PredictionCycle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Config,
        client: reqwest::Client,
        signer: Arc<dyn Signer>,
        scheduler: Arc<WindowScheduler>,
        population: Arc<PopulationStore>,
        dispatcher: Arc<Dispatcher>,
        recorder: Arc<Recorder>,
        reporter: Arc<Reporter>,
    ) -> Self {
        Self { cfg, client, signer, scheduler, population, dispatcher, recorder, reporter }
    }

    pub async fn run(self, health: Arc<HealthState>) {
        let mut ticker = interval(Duration::from_secs(PREDICTION_CYCLE_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            let result = self.scheduled_pass().await;
            if let Err(e) = &result {
                error!("Scheduled prediction pass failed: {e}");
            }
            health.record(LoopKind::PredictionPass, &result);

            let result = self.app_pass().await;
            if let Err(e) = &result {
                error!("App prediction pass failed: {e}");
            }
            health.record(LoopKind::AppPass, &result);
        }
    }

    /// Fails when any accepted prediction could not be stored. Remaining requests are still
    /// dispatched, since their window flags are already set.
    pub async fn scheduled_pass(&self) -> Result<PassReport> {
        let requests = self.scheduler.run_pass(Utc::now()).await?;
        let mut report = PassReport { requests: requests.len(), ..Default::default() };
        if requests.is_empty() {
            return Ok(report);
        }

        let population = self.population.all();
        let exclude = self_exclusion(&self.cfg);
        let mut record_error = None;

        for request in &requests {
            let targets = {
                let mut rng = thread_rng();
                select_responders(
                    &population,
                    self.cfg.stake_ceiling,
                    &exclude,
                    self.cfg.responders_per_request,
                    &mut rng,
                )
            };
            if targets.is_empty() {
                warn!(match_id = %request.payload.match_id, "No eligible responders for request");
                continue;
            }
            report.dispatched += targets.len();

            let accepted = self.solicit(request, targets).await?;
            report.accepted += accepted.len();
            match self.recorder.record(&accepted).await {
                Ok(n) => report.recorded += n,
                Err(e) => {
                    error!(match_id = %request.payload.match_id, "Recording predictions failed: {e}");
                    record_error.get_or_insert(e);
                }
            }
        }

        info!(
            requests = report.requests,
            dispatched = report.dispatched,
            accepted = report.accepted,
            recorded = report.recorded,
            "Scheduled prediction pass complete"
        );
        match record_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Dispatch one request and keep only the replies that pass validation.
    async fn solicit(&self, request: &PredictionRequest, targets: Vec<Responder>) -> Result<Vec<Prediction>> {
        let body = serde_json::to_value(PredictionEnvelope { match_prediction: request.payload.clone() })?;
        let outcomes = self.dispatcher.dispatch(targets, PREDICTION_ROUTE, &body).await;
        Ok(validate_round(&outcomes, request, Utc::now()).accepted)
    }

    pub async fn app_pass(&self) -> Result<usize> {
        let app_requests = fetch_app_requests(&self.client, &self.cfg, self.signer.as_ref()).await?;
        if app_requests.is_empty() {
            return Ok(0);
        }
        info!(requests = app_requests.len(), "Processing app prediction requests");

        let mut responses = Vec::new();
        let mut record_error = None;
        for app in &app_requests {
            let Some(responder) = self.population.find_by_identity(&app.responder_identity) else {
                info!(identity = %app.responder_identity, "No responder registered under identity, skipping");
                continue;
            };
            let Some(request) = app_request_to_prediction_request(app) else {
                warn!(app_request_id = %app.app_request_id, "Unparseable matchDate in app request, skipping");
                continue;
            };

            let accepted = self.solicit(&request, vec![responder]).await?;
            if let Err(e) = self.recorder.record(&accepted).await {
                error!(app_request_id = %app.app_request_id, "Recording app prediction failed: {e}");
                record_error.get_or_insert(e);
            }
            responses.push(app_response(app, &request, accepted.first()));
        }

        // The app still gets its answers when storage failed.
        self.reporter.post_app_responses(&responses).await?;
        match record_error {
            Some(e) => Err(e),
            None => Ok(responses.len()),
        }
    }
}

pub fn app_request_to_prediction_request(app: &AppPredictionRequest) -> Option<PredictionRequest> {
    let kickoff = parse_match_date(&app.match_date)?;
    Some(PredictionRequest {
        kind: RequestKind::App { request_id: app.app_request_id.clone() },
        kickoff,
        payload: MatchPredictionPayload {
            match_id: app.match_id.clone(),
            match_date: app.match_date.clone(),
            sport: app.sport,
            league: app.league.clone(),
            home_team_name: app.home_team_name.clone(),
            away_team_name: app.away_team_name.clone(),
            home_team_score: None,
            away_team_score: None,
            probability_choice: None,
            probability: None,
            closing_edge: None,
        },
    })
}

/// Upstream answer for one app request; flags the responder when it gave no valid prediction.
pub fn app_response(
    app: &AppPredictionRequest,
    request: &PredictionRequest,
    accepted: Option<&Prediction>,
) -> AppPredictionResponse {
    let mut payload = request.payload.clone();
    match accepted {
        Some(p) => {
            payload.probability_choice = Some(ChoiceField::Choice(p.probability_choice));
            payload.probability = Some(serde_json::json!(p.probability));
            AppPredictionResponse {
                app_request_id: app.app_request_id.clone(),
                responder_identity: app.responder_identity.clone(),
                match_prediction: payload,
                miner_has_issue: false,
                miner_issue_message: None,
            }
        }
        None => AppPredictionResponse {
            app_request_id: app.app_request_id.clone(),
            responder_identity: app.responder_identity.clone(),
            match_prediction: payload,
            miner_has_issue: true,
            miner_issue_message: Some(NO_PREDICTION_MESSAGE.to_string()),
        },
    }
}
