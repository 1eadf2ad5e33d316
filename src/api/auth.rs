//! HMAC request authentication
//!
//! Every protected request carries:
//! - `X-API-Key`: the configured client key
//! - `X-Timestamp`: unix seconds, within 60 seconds of server time
//! - `X-Signature`: hex(HMAC-SHA256(api_secret, timestamp || body))

use super::handlers::ApiError;
use super::AppState;
use crate::config::AuthConfig;
use crate::{Error, Result};
use alloy::primitives::hex;
use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use hmac::{Hmac, Mac};
use http_body_util::LengthLimitError;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const TIMESTAMP_HEADER: &str = "x-timestamp";
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Maximum accepted distance between request and server time, in seconds
pub const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Upper bound for request bodies read by the middleware
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Verifies the API key, timestamp and HMAC of incoming requests
pub struct RequestAuthenticator {
    api_key: String,
    api_secret: SecretString,
    max_skew: i64,
}

impl std::fmt::Debug for RequestAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestAuthenticator")
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("max_skew", &self.max_skew)
            .finish()
    }
}

impl RequestAuthenticator {
    pub fn new(api_key: impl Into<String>, api_secret: SecretString) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret,
            max_skew: MAX_CLOCK_SKEW_SECS,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let secret = config
            .api_secret
            .as_ref()
            .filter(|s| !s.expose_secret().is_empty())
            .ok_or_else(|| Error::Config("auth.api_secret must be set".to_string()))?;
        if config.api_key.is_empty() {
            return Err(Error::Config("auth.api_key must be set".to_string()));
        }
        Ok(Self::new(
            config.api_key.clone(),
            SecretString::from(secret.expose_secret().to_owned()),
        ))
    }

    fn mac(&self, timestamp: &str, body: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.expose_secret().as_bytes())
            .map_err(|e| Error::Config(format!("invalid HMAC key: {}", e)))?;
        mac.update(timestamp.as_bytes());
        mac.update(body);
        Ok(mac)
    }

    /// Hex HMAC a client must send for `timestamp` and `body`
    pub fn signature(&self, timestamp: &str, body: &[u8]) -> Result<String> {
        Ok(hex::encode(self.mac(timestamp, body)?.finalize().into_bytes()))
    }

    /// Check the authentication headers of a request against its raw body
    pub fn verify(&self, headers: &HeaderMap, body: &[u8], now: i64) -> Result<()> {
        let api_key = header(headers, API_KEY_HEADER)?;
        if api_key != self.api_key {
            return Err(Error::Auth("invalid API key".to_string()));
        }

        let timestamp = header(headers, TIMESTAMP_HEADER)?;
        let issued_at: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| Error::Auth("invalid timestamp format".to_string()))?;
        if (now - issued_at).abs() > self.max_skew {
            return Err(Error::Auth("timestamp outside the accepted window".to_string()));
        }

        let provided = hex::decode(header(headers, SIGNATURE_HEADER)?.trim())
            .map_err(|_| Error::Auth("invalid signature encoding".to_string()))?;
        self.mac(timestamp, body)?
            .verify_slice(&provided)
            .map_err(|_| Error::Auth("invalid signature".to_string()))
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str> {
    headers
        .get(name)
        .ok_or_else(|| Error::Auth(format!("missing {} header", name)))?
        .to_str()
        .map_err(|_| Error::Auth(format!("malformed {} header", name)))
}

/// Middleware rejecting requests that fail [`RequestAuthenticator::verify`]
pub async fn require_hmac(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let cause = e.into_inner();
            if cause.is::<LengthLimitError>() {
                return ApiError::payload_too_large(format!(
                    "request body exceeds {} bytes",
                    MAX_BODY_BYTES
                ))
                .into_response();
            }
            return ApiError::bad_request(format!("failed to read request body: {}", cause))
                .into_response();
        }
    };

    let now = chrono::Utc::now().timestamp();
    if let Err(e) = state.auth.verify(&parts.headers, &bytes, now) {
        tracing::warn!(path = %parts.uri.path(), error = %e, "Rejected unauthenticated request");
        return ApiError::from(e).into_response();
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}
