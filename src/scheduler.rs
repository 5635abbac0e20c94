use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::is_active_league;
use crate::db::PredictionStore;
use crate::error::Result;
use crate::types::{
    MatchPredictionPayload, PredictionRequest, PredictionWindow, RequestKind, WindowFlags,
};

/// First window, in fixed order, that is unflagged and contains `time_until`.
pub fn due_window(flags: &WindowFlags, time_until: TimeDelta) -> Option<PredictionWindow> {
    PredictionWindow::ALL
        .into_iter()
        .find(|w| !flags.is_set(*w) && w.contains(time_until))
}

/// Decides which matches need a prediction request this pass.
pub struct WindowScheduler {
    store: Arc<dyn PredictionStore>,
    active_leagues: Vec<String>,
    /// Serializes passes so two never read the same flag snapshot.
    pass_lock: Mutex<()>,
}

impl WindowScheduler {
    pub fn new(store: Arc<dyn PredictionStore>, active_leagues: Vec<String>) -> Self {
        Self { store, active_leagues, pass_lock: Mutex::new(()) }
    }

    /// One scheduling pass. Flags for every firing are persisted before any request is returned.
    pub async fn run_pass(&self, now: DateTime<Utc>) -> Result<Vec<PredictionRequest>> {
        let _guard = self.pass_lock.lock().await;

        let matches = self.store.matches_to_predict(now).await?;
        let states = self.store.window_states().await?;

        let mut fired = Vec::new();
        let mut requests = Vec::new();
        let mut skipped_inactive = 0usize;

        for m in &matches {
            if !is_active_league(&self.active_leagues, &m.league) {
                skipped_inactive += 1;
                continue;
            }
            let flags = states.get(&m.match_id).copied().unwrap_or_default();
            let Some(window) = due_window(&flags, m.time_until_kickoff(now)) else {
                continue;
            };
            debug!(match_id = %m.match_id, window = %window, "Prediction window due");
            fired.push((m.match_id.clone(), window));
            requests.push(PredictionRequest {
                kind: RequestKind::Scheduled(window),
                kickoff: m.match_date,
                payload: MatchPredictionPayload::for_match(m),
            });
        }

        self.store.mark_windows_fired(&fired).await?;

        if !requests.is_empty() {
            info!(
                candidates = matches.len(),
                skipped_inactive,
                fired = requests.len(),
                "Scheduling pass fired {} window(s)",
                requests.len()
            );
        }
        Ok(requests)
    }
}
