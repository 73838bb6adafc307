use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::time::Instant;

use crate::backends::{
    build_http_client, parse_status, with_retry, AvailabilityRequest, BackendAdapter, HealthStatus,
};
use crate::models::{AvailabilityObservation, BackendConfig};
use crate::utils::error::{AppError, Result};

/// Adapter for affiliate-network product APIs.
///
/// These speak a nested `{"data": ...}` envelope and authenticate with an
/// api key; otherwise the shape matches the direct kind.
pub struct AffiliateApiAdapter {
    config: BackendConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct AffiliateItem {
    #[serde(default)]
    available: bool,
    #[serde(default)]
    availability: Option<String>,
    #[serde(default)]
    sale_price: Option<Decimal>,
    #[serde(default)]
    list_price: Option<Decimal>,
    #[serde(default)]
    affiliate_url: Option<String>,
    #[serde(default)]
    add_to_cart_url: Option<String>,
    #[serde(default)]
    quantity: Option<i64>,
}

impl AffiliateApiAdapter {
    pub fn new(config: BackendConfig) -> Result<Self> {
        if config.api_key.is_none() {
            return Err(AppError::Validation(format!(
                "affiliate backend {} requires an api_key",
                config.id
            )));
        }
        let client = build_http_client(&config)?;
        Ok(Self { config, client })
    }

    fn api_key(&self) -> &str {
        // Presence checked in the constructor.
        self.config.api_key.as_deref().unwrap_or_default()
    }

    fn observation_from(&self, item: AffiliateItem) -> AvailabilityObservation {
        AvailabilityObservation {
            backend_id: self.config.id.clone(),
            in_stock: item.available,
            status: parse_status(item.availability.as_deref(), item.available),
            price: item.sale_price,
            original_price: item.list_price,
            product_url: item.affiliate_url,
            cart_url: item.add_to_cart_url,
            stock_level: item.quantity,
            store_locations: Vec::new(),
            checked_at: Utc::now(),
        }
    }

    async fn get_data<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        with_retry(&self.config.retry, || async {
            let response = self
                .client
                .get(url)
                .query(query)
                .header("x-api-key", self.api_key())
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(AppError::Backend {
                    backend: self.config.id.clone(),
                    message: format!("{} returned {}", url, response.status()),
                });
            }
            let envelope = response.json::<Envelope<T>>().await?;
            Ok(envelope.data)
        })
        .await
    }
}

#[async_trait]
impl BackendAdapter for AffiliateApiAdapter {
    fn backend_id(&self) -> &str {
        &self.config.id
    }

    async fn check_availability(
        &self,
        request: &AvailabilityRequest,
    ) -> Result<AvailabilityObservation> {
        let url = format!(
            "{}/products/{}/offers",
            self.config.base_url.trim_end_matches('/'),
            request.reference
        );
        let item: AffiliateItem = self.get_data(&url, &[]).await?;
        Ok(self.observation_from(item))
    }

    async fn search_products(&self, query: &str) -> Result<Vec<AvailabilityObservation>> {
        let url = format!("{}/products", self.config.base_url.trim_end_matches('/'));
        let items: Vec<AffiliateItem> = self.get_data(&url, &[("keyword", query)]).await?;
        Ok(items
            .into_iter()
            .map(|i| self.observation_from(i))
            .collect())
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let url = format!("{}/ping", self.config.base_url.trim_end_matches('/'));
        let started = Instant::now();
        let response = self
            .client
            .get(&url)
            .header("x-api-key", self.api_key())
            .send()
            .await?;
        let latency_ms = started.elapsed().as_millis() as u64;
        Ok(HealthStatus {
            healthy: response.status().is_success(),
            message: (!response.status().is_success())
                .then(|| format!("ping returned {}", response.status())),
            latency_ms,
        })
    }
}
