//! Opaque external capabilities: payment gateway, geocoder and call masking.
//!
//! Each capability is an `async_trait` with an HTTP implementation and an
//! in-memory mock. HTTP calls share one retry policy: network failures,
//! 429 and 5xx are retried with exponential backoff until the per-call
//! deadline; other statuses fail immediately.

use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::RequestBuilder;
use std::time::Duration;
use tracing::debug;

pub mod geocoder;
pub mod masking;
pub mod mock;
pub mod payment;

pub use geocoder::{
    AddressComponent, CachingGeocoder, GeocodeError, GeocodeResult, Geocoder, GoogleGeocoder,
};
pub use masking::{CallerIdPool, ExotelProvider, MaskingError, MaskingProvider};
pub use mock::{MockGeocoder, MockMaskingProvider, MockPaymentGateway, PlacedCall};
pub use payment::{
    sign_payment, verify_signature, GatewayError, GatewayOrder, PaymentGateway, RazorpayGateway,
};

/// Per-call deadline for payment gateway requests.
pub const PAYMENT_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-call deadline for geocoder requests.
pub const GEOCODE_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-call deadline for masking provider requests.
pub const MASKING_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport-level failure of a JSON HTTP call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HttpFailure {
    Network(String),
    RateLimited,
    Status { status: u16, body: String },
    Parse(String),
}

/// Send the request built by `build` and decode a JSON body, retrying
/// transient failures until `deadline` has elapsed.
pub(crate) async fn send_json<F>(deadline: Duration, build: F) -> Result<serde_json::Value, HttpFailure>
where
    F: Fn() -> RequestBuilder,
{
    let backoff = ExponentialBackoff {
        max_elapsed_time: Some(deadline),
        ..Default::default()
    };

    retry(backoff, || async {
        let response = build()
            .timeout(deadline)
            .send()
            .await
            .map_err(|e| backoff::Error::transient(HttpFailure::Network(e.to_string())))?;

        let status = response.status();
        if status == 429 {
            return Err(backoff::Error::transient(HttpFailure::RateLimited));
        }
        if status.is_server_error() {
            debug!(status = status.as_u16(), "Transient upstream error");
            return Err(backoff::Error::transient(HttpFailure::Status {
                status: status.as_u16(),
                body: String::new(),
            }));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(backoff::Error::permanent(HttpFailure::Status {
                status: status.as_u16(),
                body,
            }));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| backoff::Error::permanent(HttpFailure::Parse(e.to_string())))
    })
    .await
}
