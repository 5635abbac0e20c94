//! Round-trip latency of responder calls, recorded by the dispatcher and read by the ops API.

use std::sync::Mutex;
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;

use crate::error::{AppError, Result};

/// Values stored in milliseconds, 1ms to 10 minutes.
pub struct LatencyStats {
    inner: Mutex<Histogram<u64>>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct LatencySummary {
    pub samples: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
    pub max_ms: Option<u64>,
}

impl LatencyStats {
    pub fn new() -> Result<Self> {
        let histogram = Histogram::new_with_bounds(1, 600_000, 3)
            .map_err(|e| AppError::Config(format!("latency histogram: {e}")))?;
        Ok(Self { inner: Mutex::new(histogram) })
    }

    pub fn record(&self, d: Duration) {
        let ms = u64::try_from(d.as_millis()).unwrap_or(u64::MAX).max(1);
        if let Ok(mut h) = self.inner.lock() {
            h.saturating_record(ms);
        }
    }

    pub fn summary(&self) -> LatencySummary {
        let Ok(h) = self.inner.lock() else {
            return LatencySummary { samples: 0, p50_ms: None, p95_ms: None, p99_ms: None, max_ms: None };
        };
        if h.is_empty() {
            return LatencySummary { samples: 0, p50_ms: None, p95_ms: None, p99_ms: None, max_ms: None };
        }
        LatencySummary {
            samples: h.len(),
            p50_ms: Some(h.value_at_quantile(0.5)),
            p95_ms: Some(h.value_at_quantile(0.95)),
            p99_ms: Some(h.value_at_quantile(0.99)),
            max_ms: Some(h.max()),
        }
    }
}
