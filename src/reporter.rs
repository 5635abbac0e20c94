use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::config::{Config, HTTP_CLIENT_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::retry::{retry, RetryPolicy};
use crate::signer::Signer;
use crate::types::{AppPredictionResponse, ScoringBatch};

/// Posts results to the upstream aggregator with signed auth and bounded retry.
pub struct Reporter {
    client: reqwest::Client,
    signer: Arc<dyn Signer>,
    edge_results_url: String,
    app_responses_url: String,
    policy: RetryPolicy,
}

impl Reporter {
    pub fn new(cfg: &Config, signer: Arc<dyn Signer>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_CLIENT_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            signer,
            edge_results_url: cfg.edge_results_endpoint(),
            app_responses_url: cfg.app_predictions_endpoint(),
            policy: RetryPolicy::upstream(),
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Post one scoring pass. The sequences stay index-aligned on the wire.
    pub async fn post_edge_results(&self, batch: &ScoringBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.post_json(&self.edge_results_url, batch, "post edge results").await?;
        info!(predictions = batch.len(), "Posted edge results upstream");
        Ok(())
    }

    pub async fn post_app_responses(&self, responses: &[AppPredictionResponse]) -> Result<()> {
        if responses.is_empty() {
            return Ok(());
        }
        self.post_json(&self.app_responses_url, responses, "post app prediction responses")
            .await?;
        info!(responses = responses.len(), "Posted app prediction responses upstream");
        Ok(())
    }

    async fn post_json<T: Serialize + ?Sized>(&self, url: &str, body: &T, operation: &str) -> Result<()> {
        retry(&self.policy, operation, move || async move {
            let (user, signature) = self.signer.credentials()?;
            let resp = self
                .client
                .post(url)
                .basic_auth(user, Some(signature))
                .json(body)
                .send()
                .await?;
            let status = resp.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(AppError::UpstreamStatus { endpoint: url.to_string(), status: status.as_u16() })
            }
        })
        .await
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{spawn, Upstream};
    use super::*;
    use crate::retry::Backoff;
    use crate::signer::HmacSigner;
    use crate::types::Sport;
    use std::sync::atomic::Ordering;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy { max_attempts: 3, delay: Duration::from_millis(10), backoff: Backoff::Fixed }
    }

    fn reporter(base: String) -> Reporter {
        let mut cfg = Config::for_tests();
        cfg.data_api_url = base;
        let signer = Arc::new(HmacSigner::new("orchestrator-test", "secret").unwrap());
        Reporter::new(&cfg, signer).unwrap().with_policy(fast_policy())
    }

    fn batch() -> ScoringBatch {
        let mut b = ScoringBatch::default();
        b.push(0.1, 1, 4, "hk4".to_string(), Sport::Baseball, "MLB".to_string());
        b.push(-0.2, 0, 9, "hk9".to_string(), Sport::Soccer, "EPL".to_string());
        b
    }

    #[tokio::test]
    async fn posts_aligned_sequences_with_basic_auth() {
        let up = Upstream::default();
        let base = spawn(up.clone()).await;
        reporter(base).post_edge_results(&batch()).await.unwrap();

        let bodies = up.bodies.lock().unwrap().clone();
        assert_eq!(bodies.len(), 1);
        let body = &bodies[0];
        assert_eq!(body["scores"], serde_json::json!([0.1, -0.2]));
        assert_eq!(body["correct_winner_results"], serde_json::json!([1, 0]));
        assert_eq!(body["uids"], serde_json::json!([4, 9]));
        assert_eq!(body["hotkeys"], serde_json::json!(["hk4", "hk9"]));
        assert_eq!(body["sports"], serde_json::json!([3, 1]));
        assert_eq!(body["leagues"], serde_json::json!(["MLB", "EPL"]));
        assert!(up.auth.lock().unwrap()[0].starts_with("Basic "));
    }

    #[tokio::test]
    async fn recovers_from_transient_failures() {
        let up = Upstream { fail_first: 2, ..Default::default() };
        let base = spawn(up.clone()).await;
        reporter(base).post_edge_results(&batch()).await.unwrap();
        assert_eq!(up.calls.load(Ordering::SeqCst), 3);
        assert_eq!(up.bodies.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn persistent_failure_surfaces_after_three_attempts() {
        let up = Upstream { fail_first: u32::MAX, ..Default::default() };
        let base = spawn(up.clone()).await;
        let err = reporter(base).post_edge_results(&batch()).await.unwrap_err();
        assert!(matches!(err, AppError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(up.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_payloads_are_not_posted() {
        let up = Upstream::default();
        let base = spawn(up.clone()).await;
        let r = reporter(base);
        r.post_edge_results(&ScoringBatch::default()).await.unwrap();
        r.post_app_responses(&[]).await.unwrap();
        assert_eq!(up.calls.load(Ordering::SeqCst), 0);
    }
}
