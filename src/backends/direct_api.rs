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

/// Adapter for backends exposing a first-party REST availability API.
pub struct DirectApiAdapter {
    config: BackendConfig,
    client: reqwest::Client,
}

/// Wire format of the availability endpoint.
#[derive(Debug, Deserialize)]
struct ApiAvailability {
    #[serde(default)]
    in_stock: bool,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    price: Option<Decimal>,
    #[serde(default)]
    original_price: Option<Decimal>,
    #[serde(default)]
    product_url: Option<String>,
    #[serde(default)]
    cart_url: Option<String>,
    #[serde(default)]
    stock_level: Option<i64>,
    #[serde(default)]
    store_locations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ApiSearchResponse {
    #[serde(default)]
    results: Vec<ApiAvailability>,
}

impl DirectApiAdapter {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let client = build_http_client(&config)?;
        Ok(Self { config, client })
    }

    fn observation_from(&self, payload: ApiAvailability) -> AvailabilityObservation {
        AvailabilityObservation {
            backend_id: self.config.id.clone(),
            in_stock: payload.in_stock,
            status: parse_status(payload.status.as_deref(), payload.in_stock),
            price: payload.price,
            original_price: payload.original_price,
            product_url: payload.product_url,
            cart_url: payload.cart_url,
            stock_level: payload.stock_level,
            store_locations: payload.store_locations,
            checked_at: Utc::now(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        with_retry(&self.config.retry, || async {
            let response = self.client.get(url).query(query).send().await?;
            if !response.status().is_success() {
                return Err(AppError::Backend {
                    backend: self.config.id.clone(),
                    message: format!("{} returned {}", url, response.status()),
                });
            }
            response.json::<T>().await.map_err(AppError::from)
        })
        .await
    }
}

#[async_trait]
impl BackendAdapter for DirectApiAdapter {
    fn backend_id(&self) -> &str {
        &self.config.id
    }

    async fn check_availability(
        &self,
        request: &AvailabilityRequest,
    ) -> Result<AvailabilityObservation> {
        let url = format!(
            "{}/v1/availability/{}",
            self.config.base_url.trim_end_matches('/'),
            request.reference
        );
        let payload: ApiAvailability = self.get_json(&url, &[]).await?;
        Ok(self.observation_from(payload))
    }

    async fn search_products(&self, query: &str) -> Result<Vec<AvailabilityObservation>> {
        let url = format!("{}/v1/search", self.config.base_url.trim_end_matches('/'));
        let payload: ApiSearchResponse = self.get_json(&url, &[("q", query)]).await?;
        Ok(payload
            .results
            .into_iter()
            .map(|r| self.observation_from(r))
            .collect())
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let url = format!("{}/health", self.config.base_url.trim_end_matches('/'));
        let started = Instant::now();
        let response = self.client.get(&url).send().await?;
        let latency_ms = started.elapsed().as_millis() as u64;
        Ok(HealthStatus {
            healthy: response.status().is_success(),
            message: (!response.status().is_success())
                .then(|| format!("health endpoint returned {}", response.status())),
            latency_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AvailabilityStatus;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter_for(server: &MockServer) -> DirectApiAdapter {
        DirectApiAdapter::new(BackendConfig {
            id: "bigbox".to_string(),
            name: "BigBox".to_string(),
            slug: "bigbox".to_string(),
            kind: "direct_api".to_string(),
            base_url: server.uri(),
            api_key: None,
            rate_limit: Default::default(),
            timeout_secs: 5,
            retry: crate::models::RetryPolicy {
                max_attempts: 1,
                backoff_ms: 1,
            },
            active: true,
            selectors: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_search_query_is_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .and(query_param("q", "gpu & model x"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"in_stock": true}]
            })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let results = adapter.search_products("gpu & model x").await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_check_availability_parses_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/availability/GPX-1000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "in_stock": true,
                "status": "in_stock",
                "price": 499.99,
                "product_url": "https://bigbox.example/p/gpx-1000",
                "stock_level": 12,
                "store_locations": ["Downtown"]
            })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let obs = adapter
            .check_availability(&AvailabilityRequest::new("prod1", "GPX-1000"))
            .await
            .unwrap();

        assert_eq!(obs.backend_id, "bigbox");
        assert!(obs.in_stock);
        assert_eq!(obs.status, AvailabilityStatus::InStock);
        assert_eq!(obs.stock_level, Some(12));
        assert_eq!(obs.store_locations, vec!["Downtown".to_string()]);
        assert!(obs.price.is_some());
    }

    #[tokio::test]
    async fn test_server_error_is_raised_not_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let result = adapter
            .check_availability(&AvailabilityRequest::new("prod1", "GPX-1000"))
            .await;

        assert!(matches!(result, Err(AppError::Backend { .. })));
    }

    #[tokio::test]
    async fn test_search_returns_all_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .and(query_param("q", "gpu"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {"in_stock": true, "status": "in_stock"},
                    {"in_stock": false, "status": "out_of_stock"}
                ]
            })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let results = adapter.search_products("gpu").await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].in_stock);
        assert_eq!(results[1].status, AvailabilityStatus::OutOfStock);
    }

    #[tokio::test]
    async fn test_health_check_reports_probe_outcome() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let health = adapter.health_check().await.unwrap();
        assert!(health.healthy);
        assert!(health.message.is_none());
    }
}
