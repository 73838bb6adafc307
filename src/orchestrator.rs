use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;

use crate::backends::{AvailabilityRequest, BackendAdapter};
use crate::circuit_breaker::CircuitBreakerSnapshot;
use crate::metrics::BackendMetricsSnapshot;
use crate::models::AvailabilityObservation;
use crate::registry::{BackendRegistry, RegisteredBackend};
use crate::utils::error::Result;

/// Merged health view of one backend: probe result plus breaker and
/// request counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendHealth {
    pub backend_id: String,
    pub active: bool,
    pub healthy: bool,
    pub message: Option<String>,
    pub latency_ms: Option<u64>,
    pub breaker: CircuitBreakerSnapshot,
    pub metrics: BackendMetricsSnapshot,
}

/// Fans requests out across every active backend and absorbs per-backend
/// failures so one broken integration never takes down a whole operation.
///
/// Every call goes through the backend's rate budget and circuit breaker,
/// and lands in the metrics collector whatever the outcome.
pub struct IntegrationOrchestrator {
    registry: Arc<BackendRegistry>,
}

impl IntegrationOrchestrator {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// Searches backends concurrently and flattens the hits. `backend_ids`
    /// narrows the fan-out to those backends; `None` means every active one.
    /// Backends that error contribute nothing; an all-failed fan-out is an
    /// empty result, never an error.
    pub async fn search_products(
        &self,
        query: &str,
        backend_ids: Option<&[String]>,
    ) -> Vec<AvailabilityObservation> {
        let backends = select(self.registry.active(), backend_ids);
        let calls = backends.iter().map(|backend| {
            self.guarded(backend, |adapter| {
                let query = query.to_string();
                async move { adapter.search_products(&query).await }
            })
        });

        let mut results = Vec::new();
        let mut failures = 0usize;
        for (backend, outcome) in backends.iter().zip(join_all(calls).await) {
            match outcome {
                Ok(hits) => results.extend(hits),
                Err(e) => {
                    failures += 1;
                    tracing::warn!(backend = %backend.id(), error = %e, "search failed");
                }
            }
        }
        if !backends.is_empty() && failures == backends.len() {
            tracing::warn!(query, "search failed on every active backend");
        }
        results
    }

    /// Checks one product across backends concurrently, all active ones
    /// unless `backend_ids` names a subset. The map holds one entry per
    /// backend that answered; failed backends are logged and omitted.
    /// All-failed means an empty map, never an error.
    pub async fn check_availability(
        &self,
        request: &AvailabilityRequest,
        backend_ids: Option<&[String]>,
    ) -> HashMap<String, AvailabilityObservation> {
        let backends = select(self.registry.active(), backend_ids);
        let calls = backends.iter().map(|backend| {
            self.guarded(backend, |adapter| {
                let request = request.clone();
                async move { adapter.check_availability(&request).await }
            })
        });

        let mut results = HashMap::new();
        let mut failures = 0usize;
        for (backend, outcome) in backends.iter().zip(join_all(calls).await) {
            match outcome {
                Ok(observation) => {
                    results.insert(backend.id().to_string(), observation);
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(
                        backend = %backend.id(),
                        product = %request.product_id,
                        error = %e,
                        "availability check failed"
                    );
                }
            }
        }
        if !backends.is_empty() && failures == backends.len() {
            tracing::warn!(
                product = %request.product_id,
                "availability check failed on every active backend"
            );
        }
        results
    }

    /// Health of every registered backend (or the named subset), inactive
    /// ones included. Probe failures surface as unhealthy entries rather
    /// than errors; breaker and counter state is always attached.
    pub async fn get_health_status(
        &self,
        backend_ids: Option<&[String]>,
    ) -> HashMap<String, BackendHealth> {
        let backends = select(self.registry.all(), backend_ids);
        let metrics = self.registry.metrics();
        let probes = backends.iter().map(|backend| async {
            if !backend.is_active() {
                return None;
            }
            Some(
                self.guarded(backend, |adapter| async move {
                    adapter.health_check().await
                })
                .await,
            )
        });

        let mut health = HashMap::new();
        for (backend, probe) in backends.iter().zip(join_all(probes).await) {
            let entry = match probe {
                None => BackendHealth {
                    backend_id: backend.id().to_string(),
                    active: false,
                    healthy: false,
                    message: Some("backend disabled".to_string()),
                    latency_ms: None,
                    breaker: backend.breaker_snapshot(),
                    metrics: metrics.snapshot(backend.id()),
                },
                Some(Ok(status)) => BackendHealth {
                    backend_id: backend.id().to_string(),
                    active: true,
                    healthy: status.healthy,
                    message: status.message,
                    latency_ms: Some(status.latency_ms),
                    breaker: backend.breaker_snapshot(),
                    metrics: metrics.snapshot(backend.id()),
                },
                Some(Err(e)) => BackendHealth {
                    backend_id: backend.id().to_string(),
                    active: true,
                    healthy: false,
                    message: Some(e.to_string()),
                    latency_ms: None,
                    breaker: backend.breaker_snapshot(),
                    metrics: metrics.snapshot(backend.id()),
                },
            };
            health.insert(backend.id().to_string(), entry);
        }
        health
    }

    /// Runs one adapter call behind the backend's rate budget and breaker,
    /// recording the outcome in the metrics collector.
    async fn guarded<T, F, Fut>(&self, backend: &Arc<RegisteredBackend>, op: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn BackendAdapter>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let metrics = self.registry.metrics();
        if let Err(e) = backend.acquire_slot() {
            metrics.record_rate_limited(backend.id());
            return Err(e);
        }

        let adapter = Arc::clone(backend.adapter());
        let started = Instant::now();
        let outcome = backend.breaker().execute(|| op(adapter)).await;
        let elapsed = started.elapsed();

        match &outcome {
            Ok(_) => metrics.record_success(backend.id(), elapsed),
            Err(e) if e.is_circuit_open() => metrics.record_fast_fail(backend.id()),
            Err(_) => metrics.record_failure(backend.id(), elapsed),
        }
        outcome
    }
}

/// Keeps only the named backends; `None` keeps everything. Ids that match
/// nothing are silently ignored.
fn select(
    backends: Vec<Arc<RegisteredBackend>>,
    backend_ids: Option<&[String]>,
) -> Vec<Arc<RegisteredBackend>> {
    match backend_ids {
        None => backends,
        Some(ids) => backends
            .into_iter()
            .filter(|backend| ids.iter().any(|id| id == backend.id()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::models::{BackendConfig, RateLimitBudget};
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api_config(id: &str, base_url: &str) -> BackendConfig {
        BackendConfig {
            id: id.to_string(),
            name: id.to_string(),
            slug: id.to_string(),
            kind: "direct_api".to_string(),
            base_url: base_url.to_string(),
            api_key: None,
            rate_limit: Default::default(),
            timeout_secs: 5,
            retry: crate::models::RetryPolicy {
                max_attempts: 1,
                backoff_ms: 1,
            },
            active: true,
            selectors: None,
        }
    }

    async fn healthy_server(in_stock: bool) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/v1/availability/.*$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "in_stock": in_stock,
                "status": if in_stock { "in_stock" } else { "out_of_stock" },
                "price": 499.99
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/v1/search$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"in_stock": in_stock}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/health$"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        server
    }

    async fn failing_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        server
    }

    fn orchestrator_of(configs: Vec<BackendConfig>) -> IntegrationOrchestrator {
        orchestrator_with_breaker(configs, CircuitBreakerConfig::default())
    }

    fn orchestrator_with_breaker(
        configs: Vec<BackendConfig>,
        breaker: CircuitBreakerConfig,
    ) -> IntegrationOrchestrator {
        IntegrationOrchestrator::new(Arc::new(BackendRegistry::from_configs(configs, breaker)))
    }

    #[tokio::test]
    async fn test_partial_failure_is_absorbed() {
        let good = healthy_server(true).await;
        let bad = failing_server().await;
        let orchestrator = orchestrator_of(vec![
            api_config("good", &good.uri()),
            api_config("bad", &bad.uri()),
        ]);

        let results = orchestrator
            .check_availability(&AvailabilityRequest::new("prod1", "GPX-1000"), None)
            .await;

        assert_eq!(results.len(), 1);
        assert!(results["good"].in_stock);

        let metrics = orchestrator.registry().metrics();
        assert_eq!(metrics.snapshot("good").succeeded, 1);
        assert_eq!(metrics.snapshot("bad").failed, 1);
    }

    #[tokio::test]
    async fn test_all_failed_returns_empty_not_error() {
        let bad = failing_server().await;
        let orchestrator = orchestrator_of(vec![api_config("bad", &bad.uri())]);

        let results = orchestrator
            .check_availability(&AvailabilityRequest::new("prod1", "GPX-1000"), None)
            .await;
        assert!(results.is_empty());

        let hits = orchestrator.search_products("gpu", None).await;
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_search_flattens_across_backends() {
        let a = healthy_server(true).await;
        let b = healthy_server(false).await;
        let orchestrator = orchestrator_of(vec![
            api_config("a", &a.uri()),
            api_config("b", &b.uri()),
        ]);

        let hits = orchestrator.search_products("gpu", None).await;
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_explicit_backend_subset_limits_fanout() {
        let a = healthy_server(true).await;
        let b = healthy_server(true).await;
        let orchestrator = orchestrator_of(vec![
            api_config("a", &a.uri()),
            api_config("b", &b.uri()),
        ]);
        let request = AvailabilityRequest::new("prod1", "GPX-1000");
        let subset = vec!["b".to_string()];

        let results = orchestrator
            .check_availability(&request, Some(&subset))
            .await;
        assert_eq!(results.len(), 1);
        assert!(results.contains_key("b"));

        let hits = orchestrator.search_products("gpu", Some(&subset)).await;
        assert_eq!(hits.len(), 1);

        let health = orchestrator.get_health_status(Some(&subset)).await;
        assert_eq!(health.len(), 1);
        assert!(health.contains_key("b"));

        // The unselected backend was never called.
        let metrics = orchestrator.registry().metrics();
        assert_eq!(metrics.snapshot("a").total_requests, 0);

        // Ids that match nothing select nothing.
        let unknown = vec!["nope".to_string()];
        assert!(orchestrator
            .check_availability(&request, Some(&unknown))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_subset_cannot_resurrect_inactive_backend() {
        let good = healthy_server(true).await;
        let orchestrator = orchestrator_of(vec![api_config("good", &good.uri())]);
        orchestrator.registry().set_active("good", false).unwrap();

        let subset = vec!["good".to_string()];
        let results = orchestrator
            .check_availability(
                &AvailabilityRequest::new("prod1", "GPX-1000"),
                Some(&subset),
            )
            .await;
        assert!(results.is_empty());
        assert_eq!(
            orchestrator.registry().metrics().snapshot("good").total_requests,
            0
        );
    }

    #[tokio::test]
    async fn test_inactive_backend_is_skipped() {
        let good = healthy_server(true).await;
        let orchestrator = orchestrator_of(vec![api_config("good", &good.uri())]);
        orchestrator.registry().set_active("good", false).unwrap();

        let results = orchestrator
            .check_availability(&AvailabilityRequest::new("prod1", "GPX-1000"), None)
            .await;
        assert!(results.is_empty());
        assert_eq!(
            orchestrator.registry().metrics().snapshot("good").total_requests,
            0
        );
    }

    #[tokio::test]
    async fn test_open_breaker_fast_fails_without_network() {
        let bad = failing_server().await;
        let orchestrator = orchestrator_with_breaker(
            vec![api_config("bad", &bad.uri())],
            CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::from_secs(600),
                ..Default::default()
            },
        );
        let request = AvailabilityRequest::new("prod1", "GPX-1000");

        // First call fails over the network and opens the circuit.
        orchestrator.check_availability(&request, None).await;
        // Second call is rejected by the breaker.
        orchestrator.check_availability(&request, None).await;

        let snapshot = orchestrator.registry().metrics().snapshot("bad");
        assert_eq!(snapshot.failed, 2);
        assert_eq!(snapshot.breaker_fast_fails, 1);
    }

    #[tokio::test]
    async fn test_rate_limited_call_is_counted_and_skipped() {
        let good = healthy_server(true).await;
        let mut config = api_config("good", &good.uri());
        config.rate_limit = RateLimitBudget {
            requests_per_minute: 1,
            requests_per_hour: 100,
        };
        let orchestrator = orchestrator_of(vec![config]);
        let request = AvailabilityRequest::new("prod1", "GPX-1000");

        let first = orchestrator.check_availability(&request, None).await;
        assert_eq!(first.len(), 1);
        let second = orchestrator.check_availability(&request, None).await;
        assert!(second.is_empty());

        let snapshot = orchestrator.registry().metrics().snapshot("good");
        assert_eq!(snapshot.succeeded, 1);
        assert_eq!(snapshot.rate_limit_hits, 1);
    }

    #[tokio::test]
    async fn test_health_merges_probe_breaker_and_counters() {
        let good = healthy_server(true).await;
        let bad = failing_server().await;
        let orchestrator = orchestrator_with_breaker(
            vec![
                api_config("good", &good.uri()),
                api_config("bad", &bad.uri()),
                api_config("off", &good.uri()),
            ],
            CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::from_secs(600),
                ..Default::default()
            },
        );
        orchestrator.registry().set_active("off", false).unwrap();

        // One failed availability call opens the "bad" breaker, so its
        // health probe fast-fails.
        orchestrator
            .check_availability(&AvailabilityRequest::new("prod1", "GPX-1000"), None)
            .await;

        let health = orchestrator.get_health_status(None).await;
        assert_eq!(health.len(), 3);

        assert!(health["good"].healthy);
        assert_eq!(health["good"].breaker.state, CircuitState::Closed);

        assert!(!health["bad"].healthy);
        assert!(health["bad"].message.is_some());
        assert_eq!(health["bad"].breaker.state, CircuitState::Open);

        assert!(!health["off"].active);
        assert_eq!(health["off"].message.as_deref(), Some("backend disabled"));
    }
}
