use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::config::RESPONDER_IDENTITY_HEADER;
use crate::error::{AppError, Result};
use crate::signer::Signer;
use crate::types::Responder;

/// What came back from one responder call.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Identity the reply claims to come from.
    pub sender_identity: Option<String>,
    /// Decoded body, `None` when the body was not JSON.
    pub body: Option<Value>,
}

/// One request/response exchange with a responder. Errors and timeouts are both "no reply" upstream.
#[async_trait]
pub trait ResponderTransport: Send + Sync {
    async fn call(&self, responder: &Responder, route: &str, body: &Value) -> Result<Reply>;
}

/// JSON over HTTP: POST `http://{host}:{port}/{route}` with signed Basic auth.
pub struct HttpTransport {
    client: reqwest::Client,
    signer: Arc<dyn Signer>,
}

impl HttpTransport {
    pub fn new(signer: Arc<dyn Signer>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, signer })
    }
}

#[async_trait]
impl ResponderTransport for HttpTransport {
    async fn call(&self, responder: &Responder, route: &str, body: &Value) -> Result<Reply> {
        let url = format!("{}/{}", responder.base_url(), route);
        let (user, signature) = self.signer.credentials()?;

        let resp = self
            .client
            .post(&url)
            .basic_auth(user, Some(signature))
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::UpstreamStatus { endpoint: url, status: status.as_u16() });
        }

        let sender_identity = resp
            .headers()
            .get(RESPONDER_IDENTITY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .filter(|s| !s.is_empty());
        let bytes = resp.bytes().await?;
        let body = match serde_json::from_slice::<Value>(&bytes) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(uid = responder.uid, "Undecodable reply body: {e}");
                None
            }
        };
        Ok(Reply { sender_identity, body })
    }
}
