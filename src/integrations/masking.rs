//! Masked calling through an ExoPhone-style provider.

use super::{send_json, HttpFailure, MASKING_TIMEOUT};
use crate::error::CoreError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MaskingError {
    #[error("network error: {0}")]
    Network(String),
    #[error("provider rate limited")]
    RateLimited,
    #[error("provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("unexpected provider response: {0}")]
    Parse(String),
    #[error("no caller ids configured")]
    NoCallerId,
}

impl From<HttpFailure> for MaskingError {
    fn from(failure: HttpFailure) -> Self {
        match failure {
            HttpFailure::Network(msg) => MaskingError::Network(msg),
            HttpFailure::RateLimited => MaskingError::RateLimited,
            HttpFailure::Status { status, body } => MaskingError::Http {
                status,
                message: body,
            },
            HttpFailure::Parse(msg) => MaskingError::Parse(msg),
        }
    }
}

impl From<MaskingError> for CoreError {
    fn from(err: MaskingError) -> Self {
        CoreError::ExternalUnavailable(err.to_string())
    }
}

#[async_trait]
pub trait MaskingProvider: Send + Sync + fmt::Debug {
    /// Bridge `from` to `to`, presenting `caller_id` to both legs.
    /// Returns the provider's call id.
    async fn initiate(&self, from: &str, to: &str, caller_id: &str) -> Result<String, MaskingError>;

    /// Remaining account balance as reported by the provider.
    async fn balance(&self) -> Result<String, MaskingError>;
}

/// Round-robin pool of masked caller ids.
#[derive(Debug, Default)]
pub struct CallerIdPool {
    ids: Vec<String>,
    next: AtomicUsize,
}

impl CallerIdPool {
    pub fn new(ids: Vec<String>) -> Self {
        let ids = ids
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        Self {
            ids,
            next: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn next_id(&self) -> Result<&str, MaskingError> {
        if self.ids.is_empty() {
            return Err(MaskingError::NoCallerId);
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.ids.len();
        Ok(&self.ids[idx])
    }
}

/// HTTP masking provider (`/Calls/connect.json` style API).
#[derive(Debug, Clone)]
pub struct ExotelProvider {
    client: Client,
    api_url: String,
    api_token: String,
}

impl ExotelProvider {
    pub fn new(api_url: String, api_token: String) -> Result<Self, MaskingError> {
        let client = Client::builder()
            .timeout(MASKING_TIMEOUT)
            .build()
            .map_err(|e| MaskingError::Network(e.to_string()))?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }
}

fn call_sid(body: &Value) -> Option<String> {
    body.pointer("/Call/Sid")
        .or_else(|| body.get("sid"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[async_trait]
impl MaskingProvider for ExotelProvider {
    async fn initiate(&self, from: &str, to: &str, caller_id: &str) -> Result<String, MaskingError> {
        let url = format!("{}/Calls/connect.json", self.api_url);
        let form = [("From", from), ("To", to), ("CallerId", caller_id)];
        let body = send_json(MASKING_TIMEOUT, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_token)
                .form(&form)
        })
        .await?;

        call_sid(&body).ok_or_else(|| MaskingError::Parse("missing call sid".into()))
    }

    async fn balance(&self) -> Result<String, MaskingError> {
        let url = format!("{}/Balance.json", self.api_url);
        let body = send_json(MASKING_TIMEOUT, || {
            self.client.get(&url).bearer_auth(&self.api_token)
        })
        .await?;

        match body.get("balance") {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(MaskingError::Parse("missing balance".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_ids_rotate() {
        let pool = CallerIdPool::new(vec!["0801".into(), " ".into(), "0802".into()]);
        assert_eq!(pool.len(), 2);
        let picks: Vec<String> = (0..4).map(|_| pool.next_id().unwrap().to_string()).collect();
        assert_eq!(picks, vec!["0801", "0802", "0801", "0802"]);
    }

    #[test]
    fn test_empty_pool_is_an_error() {
        let pool = CallerIdPool::new(Vec::new());
        assert_eq!(pool.next_id(), Err(MaskingError::NoCallerId));
    }

    #[test]
    fn test_call_sid_shapes() {
        let nested = serde_json::json!({"Call": {"Sid": "abc123"}});
        assert_eq!(call_sid(&nested).as_deref(), Some("abc123"));
        let flat = serde_json::json!({"sid": "xyz"});
        assert_eq!(call_sid(&flat).as_deref(), Some("xyz"));
        assert_eq!(call_sid(&serde_json::json!({})), None);
    }
}
