use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Method,
};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::ApiError;

type HmacSha256 = Hmac<Sha256>;

pub const API_KEY_HEADER: &str = "X-Api-Key";
pub const TIMESTAMP_HEADER: &str = "X-Timestamp";
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// API key plus signing secret for one API host.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        if self.api_key.trim().is_empty() {
            return Err(ApiError::InvalidCredentials("missing api key".into()));
        }
        if self.secret.trim().is_empty() {
            return Err(ApiError::InvalidCredentials("missing signing secret".into()));
        }
        Ok(())
    }

    /// Signs `"{timestamp}\n{METHOD}\n{url}"` with HMAC-SHA256.
    pub fn sign(
        &self,
        timestamp: DateTime<Utc>,
        method: &Method,
        url: &str,
    ) -> Result<SignedHeaders, ApiError> {
        self.validate()?;
        let timestamp = timestamp.timestamp();
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|err| ApiError::InvalidCredentials(err.to_string()))?;
        mac.update(signing_payload(timestamp, method, url).as_bytes());
        Ok(SignedHeaders {
            api_key: self.api_key.clone(),
            timestamp,
            signature: STANDARD.encode(mac.finalize().into_bytes()),
        })
    }

    pub fn verify(&self, headers: &SignedHeaders, method: &Method, url: &str) -> bool {
        let Ok(signature) = STANDARD.decode(&headers.signature) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(self.secret.as_bytes()) else {
            return false;
        };
        mac.update(signing_payload(headers.timestamp, method, url).as_bytes());
        headers.api_key == self.api_key && mac.verify_slice(&signature).is_ok()
    }
}

impl Drop for Credentials {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

fn signing_payload(timestamp: i64, method: &Method, url: &str) -> String {
    format!("{timestamp}\n{}\n{url}", method.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub api_key: String,
    pub timestamp: i64,
    pub signature: String,
}

impl SignedHeaders {
    pub fn write_to(self, headers: &mut HeaderMap) -> Result<(), ApiError> {
        for (name, value) in [
            (API_KEY_HEADER, self.api_key),
            (TIMESTAMP_HEADER, self.timestamp.to_string()),
            (SIGNATURE_HEADER, self.signature),
        ] {
            let value = HeaderValue::from_str(&value)
                .map_err(|err| ApiError::InvalidCredentials(format!("{name}: {err}")))?;
            headers.insert(name, value);
        }
        Ok(())
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let text = |name: &str| headers.get(name)?.to_str().ok().map(str::to_string);
        Some(Self {
            api_key: text(API_KEY_HEADER)?,
            timestamp: text(TIMESTAMP_HEADER)?.parse().ok()?,
            signature: text(SIGNATURE_HEADER)?,
        })
    }
}
