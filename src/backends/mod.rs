use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;

use crate::models::{AvailabilityObservation, AvailabilityStatus, BackendConfig, RetryPolicy};
use crate::utils::error::{AppError, Result};

pub mod affiliate_api;
pub mod direct_api;
pub mod scraped;

pub use affiliate_api::AffiliateApiAdapter;
pub use direct_api::DirectApiAdapter;
pub use scraped::ScrapedAdapter;

/// One availability lookup as the orchestrator hands it to an adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilityRequest {
    pub product_id: String,
    /// Retailer-facing reference: SKU when known, otherwise a query string.
    pub reference: String,
}

impl AvailabilityRequest {
    pub fn new(product_id: &str, reference: &str) -> Self {
        Self {
            product_id: product_id.to_string(),
            reference: reference.to_string(),
        }
    }
}

/// A backend's self-reported health probe result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: Option<String>,
    pub latency_ms: u64,
}

/// One external product-data source.
///
/// Implementations must report failures by returning `Err`, never a sentinel
/// "ok" value; the circuit breaker and metrics both count on it.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn backend_id(&self) -> &str;

    async fn check_availability(
        &self,
        request: &AvailabilityRequest,
    ) -> Result<AvailabilityObservation>;

    async fn search_products(&self, query: &str) -> Result<Vec<AvailabilityObservation>>;

    async fn health_check(&self) -> Result<HealthStatus>;
}

/// Shared reqwest client builder honoring the backend's configured timeout.
pub(crate) fn build_http_client(config: &BackendConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.timeout())
        .user_agent(concat!("dropwatch/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(AppError::from)
}

/// Runs `action` under the backend's retry policy with a fixed inter-attempt
/// delay. The last error is returned once attempts are exhausted.
pub(crate) async fn with_retry<T, F, Fut>(policy: &RetryPolicy, action: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1) as usize;
    let strategy = FixedInterval::from_millis(policy.backoff_ms).take(attempts - 1);
    Retry::spawn(strategy, action).await
}

/// Maps a backend-reported status string onto the shared status enum.
pub(crate) fn parse_status(raw: Option<&str>, in_stock: bool) -> AvailabilityStatus {
    match raw.map(|s| s.to_ascii_lowercase()).as_deref() {
        Some("in_stock") | Some("instock") | Some("available") => AvailabilityStatus::InStock,
        Some("out_of_stock") | Some("outofstock") | Some("unavailable") | Some("sold_out") => {
            AvailabilityStatus::OutOfStock
        }
        Some("preorder") | Some("pre_order") => AvailabilityStatus::Preorder,
        Some("discontinued") => AvailabilityStatus::Discontinued,
        Some(_) | None => {
            if in_stock {
                AvailabilityStatus::InStock
            } else {
                AvailabilityStatus::Unknown
            }
        }
    }
}
