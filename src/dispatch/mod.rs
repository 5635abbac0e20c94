pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use rand::seq::SliceRandom;
use serde_json::Value;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info};

use crate::api::latency::LatencyStats;
use crate::types::Responder;

pub use transport::{HttpTransport, Reply, ResponderTransport};

/// Result of one call in a fan-out. `reply` is `None` for timeouts and errors alike.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub responder: Responder,
    pub reply: Option<Reply>,
}

/// Fans one request out to many responders under a single shared deadline.
pub struct Dispatcher {
    transport: Arc<dyn ResponderTransport>,
    timeout: Duration,
    latency: Arc<LatencyStats>,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn ResponderTransport>,
        timeout: Duration,
        latency: Arc<LatencyStats>,
    ) -> Self {
        Self { transport, timeout, latency }
    }

    /// One outcome per responder, in shuffled dispatch order. No persistence here.
    pub async fn dispatch(
        &self,
        mut responders: Vec<Responder>,
        route: &str,
        body: &Value,
    ) -> Vec<DispatchOutcome> {
        if responders.is_empty() {
            return Vec::new();
        }
        responders.shuffle(&mut rand::thread_rng());

        let deadline = Instant::now() + self.timeout;
        let calls = responders.into_iter().map(|responder| {
            let transport = Arc::clone(&self.transport);
            let latency = Arc::clone(&self.latency);
            async move {
                let started = Instant::now();
                let reply = match timeout_at(deadline, transport.call(&responder, route, body)).await {
                    Ok(Ok(reply)) => {
                        latency.record(started.elapsed());
                        Some(reply)
                    }
                    Ok(Err(e)) => {
                        debug!(uid = responder.uid, route, "Responder call failed: {e}");
                        None
                    }
                    Err(_) => {
                        debug!(uid = responder.uid, route, "Responder missed the deadline");
                        None
                    }
                };
                DispatchOutcome { responder, reply }
            }
        });

        let outcomes = join_all(calls).await;
        let answered = outcomes.iter().filter(|o| o.reply.is_some()).count();
        info!(
            route,
            sent = outcomes.len(),
            answered,
            "Dispatch complete: {answered}/{} responders answered",
            outcomes.len()
        );
        outcomes
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::{Reply, ResponderTransport};
    use crate::error::{AppError, Result};
    use crate::types::{Responder, Uid};

    /// Scripted replies per uid: a delay, then either a body or a failure.
    #[derive(Default)]
    pub struct MockTransport {
        pub scripts: HashMap<Uid, (std::time::Duration, Option<Reply>)>,
        pub calls: Mutex<Vec<(Uid, String, Value)>>,
    }

    impl MockTransport {
        pub fn reply(mut self, uid: Uid, delay_ms: u64, reply: Reply) -> Self {
            self.scripts.insert(uid, (std::time::Duration::from_millis(delay_ms), Some(reply)));
            self
        }

        pub fn fail(mut self, uid: Uid) -> Self {
            self.scripts.insert(uid, (std::time::Duration::ZERO, None));
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ResponderTransport for MockTransport {
        async fn call(&self, responder: &Responder, route: &str, body: &Value) -> Result<Reply> {
            self.calls
                .lock()
                .unwrap()
                .push((responder.uid, route.to_string(), body.clone()));
            let Some((delay, reply)) = self.scripts.get(&responder.uid).cloned() else {
                return Err(AppError::Payload("no script".to_string()));
            };
            tokio::time::sleep(delay).await;
            reply.ok_or_else(|| AppError::Payload("connection refused".to_string()))
        }
    }
}
