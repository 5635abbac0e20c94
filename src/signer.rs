use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Produces the identity + signature pair sent with every outbound call.
pub trait Signer: Send + Sync {
    fn identity(&self) -> &str;

    /// `0x`-prefixed hex signature over `message`.
    fn sign(&self, message: &[u8]) -> Result<String>;

    /// Basic-auth credentials: the identity signed with itself as the message.
    fn credentials(&self) -> Result<(String, String)> {
        let identity = self.identity().to_string();
        let signature = self.sign(identity.as_bytes())?;
        Ok((identity, signature))
    }
}

pub struct HmacSigner {
    identity: String,
    secret: Vec<u8>,
}

impl HmacSigner {
    pub fn new(identity: impl Into<String>, secret: impl AsRef<[u8]>) -> Result<Self> {
        let secret = secret.as_ref().to_vec();
        if secret.is_empty() {
            return Err(AppError::Config("signing secret is empty".to_string()));
        }
        Ok(Self { identity: identity.into(), secret })
    }
}

impl Signer for HmacSigner {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn sign(&self, message: &[u8]) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AppError::Config(format!("HMAC key error: {e}")))?;
        mac.update(message);
        Ok(format!("0x{}", hex::encode(mac.finalize().into_bytes())))
    }
}
