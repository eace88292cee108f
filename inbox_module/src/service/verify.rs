use std::sync::Arc;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use base64::Engine;
use tracing::warn;

use super::config::ServiceConfig;

pub const POSTMARK_TOKEN_HEADER: &str = "x-postmark-token";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("missing credentials")]
    Missing,
    #[error("invalid credentials")]
    Invalid,
}

/// Decides whether a webhook request really came from the mail processor.
pub trait OriginVerifier: Send + Sync {
    fn verify(&self, headers: &HeaderMap) -> Result<(), VerifyError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllOrigins;

impl OriginVerifier for AllowAllOrigins {
    fn verify(&self, _headers: &HeaderMap) -> Result<(), VerifyError> {
        Ok(())
    }
}

/// Compares a shared secret header, `X-Postmark-Token` by default.
#[derive(Debug, Clone)]
pub struct SharedTokenVerifier {
    header: String,
    token: String,
}

impl SharedTokenVerifier {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_header(POSTMARK_TOKEN_HEADER, token)
    }

    pub fn with_header(header: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            token: token.into(),
        }
    }
}

impl OriginVerifier for SharedTokenVerifier {
    fn verify(&self, headers: &HeaderMap) -> Result<(), VerifyError> {
        let value = headers
            .get(self.header.as_str())
            .and_then(|value| value.to_str().ok())
            .ok_or(VerifyError::Missing)?;
        if value.trim() != self.token {
            return Err(VerifyError::Invalid);
        }
        Ok(())
    }
}

/// HTTP basic auth credentials embedded in the webhook URL.
#[derive(Debug, Clone)]
pub struct BasicAuthVerifier {
    user: String,
    password: String,
}

impl BasicAuthVerifier {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl OriginVerifier for BasicAuthVerifier {
    fn verify(&self, headers: &HeaderMap) -> Result<(), VerifyError> {
        let header = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(VerifyError::Missing)?;
        let encoded = header
            .strip_prefix("Basic ")
            .or_else(|| header.strip_prefix("basic "))
            .ok_or(VerifyError::Invalid)?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| VerifyError::Invalid)?;
        let decoded = String::from_utf8(decoded).map_err(|_| VerifyError::Invalid)?;
        let (user, password) = decoded.split_once(':').ok_or(VerifyError::Invalid)?;
        if user != self.user || password != self.password {
            return Err(VerifyError::Invalid);
        }
        Ok(())
    }
}

/// Basic auth wins over the shared token; with neither configured every
/// request is accepted.
pub fn build_verifier(config: &ServiceConfig) -> Arc<dyn OriginVerifier> {
    if let Some((user, password)) = &config.postmark_basic_auth {
        return Arc::new(BasicAuthVerifier::new(user.clone(), password.clone()));
    }
    if let Some(token) = &config.postmark_inbound_token {
        return Arc::new(SharedTokenVerifier::new(token.clone()));
    }
    warn!("no webhook credentials configured; accepting postman requests from any origin");
    Arc::new(AllowAllOrigins)
}
