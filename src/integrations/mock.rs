//! In-memory integrations for tests and offline runs.

use super::geocoder::{GeocodeError, GeocodeResult, Geocoder};
use super::masking::{MaskingError, MaskingProvider};
use super::payment::{sign_payment, verify_signature, GatewayError, GatewayOrder, PaymentGateway};
use crate::domain::Coordinate;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// Gateway that signs with a local secret and records every call.
#[derive(Debug)]
pub struct MockPaymentGateway {
    secret: String,
    counter: AtomicU64,
    fail_orders: AtomicBool,
    orders: Mutex<Vec<GatewayOrder>>,
    refunds: Mutex<Vec<(String, i64)>>,
}

impl MockPaymentGateway {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            counter: AtomicU64::new(0),
            fail_orders: AtomicBool::new(false),
            orders: Mutex::new(Vec::new()),
            refunds: Mutex::new(Vec::new()),
        }
    }

    /// Signature a real checkout would return for this order and payment.
    pub fn sign(&self, order_id: &str, payment_id: &str) -> String {
        sign_payment(&self.secret, order_id, payment_id)
    }

    /// Make subsequent `create_order` calls fail as if the gateway were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.fail_orders.store(unavailable, Ordering::SeqCst);
    }

    pub fn orders(&self) -> Vec<GatewayOrder> {
        self.orders.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn refunds(&self) -> Vec<(String, i64)> {
        self.refunds.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self::new("test_secret")
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_order(
        &self,
        amount_paise: i64,
        _receipt: &str,
        _notes: &str,
    ) -> Result<GatewayOrder, GatewayError> {
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(GatewayError::Network("mock gateway unavailable".into()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let order = GatewayOrder {
            id: format!("order_mock_{}", n),
            amount: amount_paise,
            currency: "INR".into(),
        };
        self.orders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(order.clone());
        Ok(order)
    }

    fn verify(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        verify_signature(&self.secret, order_id, payment_id, signature)
    }

    async fn refund(&self, payment_id: &str, amount_paise: i64) -> Result<String, GatewayError> {
        let mut refunds = self.refunds.lock().unwrap_or_else(|e| e.into_inner());
        refunds.push((payment_id.to_string(), amount_paise));
        Ok(format!("rfnd_mock_{}", refunds.len()))
    }
}

/// Geocoder answering from a fixed table.
#[derive(Debug, Default)]
pub struct MockGeocoder {
    forward: HashMap<String, GeocodeResult>,
    calls: AtomicU64,
}

impl MockGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(mut self, address: &str, result: GeocodeResult) -> Self {
        self.forward.insert(address.trim().to_lowercase(), result);
        self
    }

    /// Number of upstream lookups served.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Geocoder for MockGeocoder {
    async fn geocode(&self, address: &str) -> Result<Vec<GeocodeResult>, GeocodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.forward
            .get(&address.trim().to_lowercase())
            .map(|r| vec![r.clone()])
            .ok_or(GeocodeError::NoResults)
    }

    async fn reverse(&self, position: Coordinate) -> Result<Vec<GeocodeResult>, GeocodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let nearest = self.forward.values().find(|r| {
            (r.latitude - position.latitude).abs() < 1e-4
                && (r.longitude - position.longitude).abs() < 1e-4
        });
        nearest
            .map(|r| vec![r.clone()])
            .ok_or(GeocodeError::NoResults)
    }
}

/// A call placed through [`MockMaskingProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedCall {
    pub from: String,
    pub to: String,
    pub caller_id: String,
}

/// Masking provider that records calls instead of dialing.
#[derive(Debug, Default)]
pub struct MockMaskingProvider {
    calls: Mutex<Vec<PlacedCall>>,
}

impl MockMaskingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<PlacedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl MaskingProvider for MockMaskingProvider {
    async fn initiate(&self, from: &str, to: &str, caller_id: &str) -> Result<String, MaskingError> {
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls.push(PlacedCall {
            from: from.to_string(),
            to: to.to_string(),
            caller_id: caller_id.to_string(),
        });
        Ok(format!("call_mock_{}", calls.len()))
    }

    async fn balance(&self) -> Result<String, MaskingError> {
        Ok("100.00".into())
    }
}
