use hmac::{Hmac, Mac};
use sha2::Sha256;
use spotlink_core::GatewayError;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 request signer keyed with the account secret.
#[derive(Clone)]
pub struct Signer {
    secret: Option<String>,
}

impl Signer {
    pub fn new(secret: Option<String>) -> Self {
        Self { secret }
    }

    /// Hex-encoded HMAC-SHA256 of the UTF-8 payload bytes.
    pub fn sign(&self, payload: &str) -> Result<String, GatewayError> {
        let secret = self
            .secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GatewayError::Configuration("secret key is required for signing".to_string()))?;
        if payload.is_empty() {
            return Err(GatewayError::Configuration(
                "cannot sign an empty payload".to_string(),
            ));
        }

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| GatewayError::Configuration(format!("invalid secret key: {}", e)))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

/// The string a signed request signs: the query string followed by the
/// serialized JSON body, if there is one.
pub fn signature_payload(query: &str, body: Option<&serde_json::Value>) -> String {
    match body {
        Some(body) => format!("{}{}", query, body),
        None => query.to_string(),
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("has_secret", &self.secret.is_some())
            .finish()
    }
}
