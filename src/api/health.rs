//! Liveness of the background loops, for the /health endpoint.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    PopulationRefresh,
    MatchSync,
    PredictionPass,
    AppPass,
    ScoringPass,
}

#[derive(Default)]
struct LoopHealth {
    /// Unix millis of the last successful pass (0 = never).
    last_ok_ms: AtomicI64,
    failures: AtomicU64,
}

/// Updated by each loop after every pass, read by the API.
#[derive(Default)]
pub struct HealthState {
    started_at_ms: AtomicI64,
    population: LoopHealth,
    match_sync: LoopHealth,
    prediction: LoopHealth,
    app: LoopHealth,
    scoring: LoopHealth,
}

#[derive(Debug, Serialize)]
pub struct LoopSnapshot {
    pub last_ok_ms: Option<i64>,
    pub failures: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub uptime_secs: i64,
    pub population_refresh: LoopSnapshot,
    pub match_sync: LoopSnapshot,
    pub prediction_pass: LoopSnapshot,
    pub app_pass: LoopSnapshot,
    pub scoring_pass: LoopSnapshot,
}

impl HealthState {
    pub fn new() -> Arc<Self> {
        let state = Self::default();
        state.started_at_ms.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        Arc::new(state)
    }

    fn slot(&self, kind: LoopKind) -> &LoopHealth {
        match kind {
            LoopKind::PopulationRefresh => &self.population,
            LoopKind::MatchSync => &self.match_sync,
            LoopKind::PredictionPass => &self.prediction,
            LoopKind::AppPass => &self.app,
            LoopKind::ScoringPass => &self.scoring,
        }
    }

    pub fn record_ok(&self, kind: LoopKind) {
        self.slot(kind)
            .last_ok_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn record_failure(&self, kind: LoopKind) {
        self.slot(kind).failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one pass.
    pub fn record<T, E>(&self, kind: LoopKind, result: &Result<T, E>) {
        match result {
            Ok(_) => self.record_ok(kind),
            Err(_) => self.record_failure(kind),
        }
    }

    fn loop_snapshot(&self, kind: LoopKind) -> LoopSnapshot {
        let slot = self.slot(kind);
        let last = slot.last_ok_ms.load(Ordering::Relaxed);
        LoopSnapshot {
            last_ok_ms: (last > 0).then_some(last),
            failures: slot.failures.load(Ordering::Relaxed),
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let started = self.started_at_ms.load(Ordering::Relaxed);
        HealthSnapshot {
            uptime_secs: (Utc::now().timestamp_millis() - started) / 1000,
            population_refresh: self.loop_snapshot(LoopKind::PopulationRefresh),
            match_sync: self.loop_snapshot(LoopKind::MatchSync),
            prediction_pass: self.loop_snapshot(LoopKind::PredictionPass),
            app_pass: self.loop_snapshot(LoopKind::AppPass),
            scoring_pass: self.loop_snapshot(LoopKind::ScoringPass),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_are_tracked_per_loop() {
        let health = HealthState::new();
        health.record::<(), ()>(LoopKind::ScoringPass, &Err(()));
        health.record::<(), ()>(LoopKind::ScoringPass, &Err(()));
        health.record::<(), ()>(LoopKind::MatchSync, &Ok(()));
        health.record::<(), ()>(LoopKind::AppPass, &Err(()));

        let snap = health.snapshot();
        assert_eq!(snap.scoring_pass.failures, 2);
        assert!(snap.scoring_pass.last_ok_ms.is_none());
        assert!(snap.match_sync.last_ok_ms.is_some());
        assert!(snap.population_refresh.last_ok_ms.is_none());
        assert_eq!(snap.app_pass.failures, 1);
        assert_eq!(snap.prediction_pass.failures, 0);
    }
}
