//! Payment gateway contract and the Razorpay client.

use super::{send_json, HttpFailure, PAYMENT_TIMEOUT};
use crate::error::CoreError;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// An order created on the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    /// Amount in paise.
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("gateway unreachable: {0}")]
    Network(String),
    #[error("gateway rate limited")]
    RateLimited,
    #[error("gateway returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("unexpected gateway response: {0}")]
    Parse(String),
    #[error("gateway rejected request: {0}")]
    Rejected(String),
}

impl From<HttpFailure> for GatewayError {
    fn from(failure: HttpFailure) -> Self {
        match failure {
            HttpFailure::Network(msg) => GatewayError::Network(msg),
            HttpFailure::RateLimited => GatewayError::RateLimited,
            HttpFailure::Status { status, body } => GatewayError::Http {
                status,
                message: body,
            },
            HttpFailure::Parse(msg) => GatewayError::Parse(msg),
        }
    }
}

impl From<GatewayError> for CoreError {
    fn from(err: GatewayError) -> Self {
        CoreError::ExternalUnavailable(err.to_string())
    }
}

/// Payment gateway used for booking, quote and wallet-recharge payments.
#[async_trait]
pub trait PaymentGateway: Send + Sync + fmt::Debug {
    /// Create an order for `amount_paise`.
    async fn create_order(
        &self,
        amount_paise: i64,
        receipt: &str,
        notes: &str,
    ) -> Result<GatewayOrder, GatewayError>;

    /// Check the checkout signature for `order_id|payment_id`.
    fn verify(&self, order_id: &str, payment_id: &str, signature: &str) -> bool;

    /// Request a refund. Best-effort; returns the gateway's refund id.
    async fn refund(&self, payment_id: &str, amount_paise: i64) -> Result<String, GatewayError>;
}

fn mac_for(
    secret: &str,
    order_id: &str,
    payment_id: &str,
) -> Result<HmacSha256, hmac::digest::InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac.update(order_id.as_bytes());
    mac.update(b"|");
    mac.update(payment_id.as_bytes());
    Ok(mac)
}

/// Lowercase hex HMAC-SHA256 over `order_id|payment_id`.
pub fn sign_payment(secret: &str, order_id: &str, payment_id: &str) -> String {
    mac_for(secret, order_id, payment_id)
        .map(|mac| hex::encode(mac.finalize().into_bytes()))
        .unwrap_or_default()
}

/// Verify a checkout signature. Hex comparison is case-sensitive and the
/// digest comparison runs in constant time.
pub fn verify_signature(secret: &str, order_id: &str, payment_id: &str, signature: &str) -> bool {
    let Ok(bytes) = hex::decode(signature) else {
        return false;
    };
    if hex::encode(&bytes) != signature {
        return false;
    }
    mac_for(secret, order_id, payment_id)
        .map(|mac| mac.verify_slice(&bytes).is_ok())
        .unwrap_or(false)
}

/// Razorpay Orders API client.
#[derive(Debug, Clone)]
pub struct RazorpayGateway {
    client: Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl RazorpayGateway {
    pub fn new(base_url: String, key_id: String, key_secret: String) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(PAYMENT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            key_id,
            key_secret,
        })
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    async fn create_order(
        &self,
        amount_paise: i64,
        receipt: &str,
        notes: &str,
    ) -> Result<GatewayOrder, GatewayError> {
        if amount_paise <= 0 {
            return Err(GatewayError::Rejected(format!(
                "order amount must be positive, got {}",
                amount_paise
            )));
        }
        let url = format!("{}/orders", self.base_url);
        let payload = serde_json::json!({
            "amount": amount_paise,
            "currency": "INR",
            "receipt": receipt,
            "notes": { "note": notes },
        });

        let body = send_json(PAYMENT_TIMEOUT, || {
            self.client
                .post(&url)
                .basic_auth(&self.key_id, Some(&self.key_secret))
                .json(&payload)
        })
        .await?;

        let order: GatewayOrder =
            serde_json::from_value(body).map_err(|e| GatewayError::Parse(e.to_string()))?;
        debug!(order_id = %order.id, amount = order.amount, %receipt, "Gateway order created");
        Ok(order)
    }

    fn verify(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        verify_signature(&self.key_secret, order_id, payment_id, signature)
    }

    async fn refund(&self, payment_id: &str, amount_paise: i64) -> Result<String, GatewayError> {
        let url = format!("{}/payments/{}/refund", self.base_url, payment_id);
        let payload = serde_json::json!({ "amount": amount_paise });

        let body = send_json(PAYMENT_TIMEOUT, || {
            self.client
                .post(&url)
                .basic_auth(&self.key_id, Some(&self.key_secret))
                .json(&payload)
        })
        .await?;

        match body.get("id").and_then(|v| v.as_str()) {
            Some(id) => Ok(id.to_string()),
            None => {
                warn!(%payment_id, "Refund response carried no id");
                Err(GatewayError::Parse("refund response without id".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_round_trip() {
        let sig = sign_payment("secret", "order_9A33XWu170gUtm", "pay_29QQoUBi66xm2f");
        assert_eq!(sig.len(), 64);
        assert!(verify_signature(
            "secret",
            "order_9A33XWu170gUtm",
            "pay_29QQoUBi66xm2f",
            &sig
        ));
    }

    #[test]
    fn test_signature_is_case_sensitive() {
        let sig = sign_payment("secret", "order_1", "pay_1");
        assert!(!verify_signature("secret", "order_1", "pay_1", &sig.to_uppercase()));
    }

    #[test]
    fn test_signature_binds_both_ids_and_secret() {
        let sig = sign_payment("secret", "order_1", "pay_1");
        assert!(!verify_signature("secret", "order_1", "pay_2", &sig));
        assert!(!verify_signature("secret", "order_2", "pay_1", &sig));
        assert!(!verify_signature("other", "order_1", "pay_1", &sig));
        assert!(!verify_signature("secret", "order_1", "pay_1", "not-hex"));
    }

    #[test]
    fn test_gateway_error_maps_to_external_unavailable() {
        let err: CoreError = GatewayError::RateLimited.into();
        assert!(matches!(err, CoreError::ExternalUnavailable(_)));
    }
}
