use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::backends::{
    AffiliateApiAdapter, BackendAdapter, DirectApiAdapter, ScrapedAdapter,
};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};
use crate::metrics::BackendMetricsCollector;
use crate::models::{BackendConfig, IntegrationKind, RateLimitBudget};
use crate::utils::error::{AppError, Result};

/// One registered backend: its config, adapter, breaker and rate budget,
/// always created together and torn down together.
pub struct RegisteredBackend {
    config: BackendConfig,
    kind: IntegrationKind,
    active: AtomicBool,
    adapter: Arc<dyn BackendAdapter>,
    breaker: Arc<CircuitBreaker>,
    rate_window: Mutex<RateWindow>,
}

impl RegisteredBackend {
    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn kind(&self) -> IntegrationKind {
        self.kind
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn adapter(&self) -> &Arc<dyn BackendAdapter> {
        &self.adapter
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn breaker_snapshot(&self) -> CircuitBreakerSnapshot {
        self.breaker.snapshot()
    }

    /// Consumes one request from the rolling rate budget, or reports
    /// exhaustion without touching the network.
    pub fn acquire_slot(&self) -> Result<()> {
        let mut window = self
            .rate_window
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if window.try_consume(Instant::now()) {
            Ok(())
        } else {
            Err(AppError::RateLimited {
                backend: self.config.id.clone(),
            })
        }
    }
}

/// Rolling minute and hour request counters.
#[derive(Debug)]
struct RateWindow {
    budget: RateLimitBudget,
    minute_started: Instant,
    minute_count: u32,
    hour_started: Instant,
    hour_count: u32,
}

impl RateWindow {
    fn new(budget: RateLimitBudget) -> Self {
        let now = Instant::now();
        Self {
            budget,
            minute_started: now,
            minute_count: 0,
            hour_started: now,
            hour_count: 0,
        }
    }

    fn try_consume(&mut self, now: Instant) -> bool {
        if now.duration_since(self.minute_started).as_secs() >= 60 {
            self.minute_started = now;
            self.minute_count = 0;
        }
        if now.duration_since(self.hour_started).as_secs() >= 3600 {
            self.hour_started = now;
            self.hour_count = 0;
        }
        if self.minute_count >= self.budget.requests_per_minute
            || self.hour_count >= self.budget.requests_per_hour
        {
            return false;
        }
        self.minute_count += 1;
        self.hour_count += 1;
        true
    }
}

/// Owns every configured backend and the 1:1:1 pairing of config, adapter
/// and breaker. Registration failures are isolated per backend: a bad entry
/// is logged and skipped, the rest come up normally.
pub struct BackendRegistry {
    backends: HashMap<String, Arc<RegisteredBackend>>,
    // Configuration order, for deterministic fan-out and listings.
    order: Vec<String>,
    metrics: Arc<BackendMetricsCollector>,
}

impl BackendRegistry {
    pub fn from_configs(
        configs: Vec<BackendConfig>,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        let mut backends = HashMap::new();
        let mut order = Vec::new();

        for config in configs {
            match Self::register_one(config, &breaker_config) {
                Ok(backend) => {
                    tracing::info!(
                        backend = %backend.id(),
                        kind = %backend.kind(),
                        active = backend.is_active(),
                        "backend registered"
                    );
                    order.push(backend.id().to_string());
                    backends.insert(backend.id().to_string(), Arc::new(backend));
                }
                Err(e) => {
                    tracing::error!(error = %e, "skipping backend, registration failed");
                }
            }
        }

        Self {
            backends,
            order,
            metrics: Arc::new(BackendMetricsCollector::new()),
        }
    }

    fn register_one(
        config: BackendConfig,
        breaker_config: &CircuitBreakerConfig,
    ) -> Result<RegisteredBackend> {
        let kind: IntegrationKind = config.kind.parse()?;
        let adapter: Arc<dyn BackendAdapter> = match kind {
            IntegrationKind::DirectApi => Arc::new(DirectApiAdapter::new(config.clone())?),
            IntegrationKind::AffiliateApi => Arc::new(AffiliateApiAdapter::new(config.clone())?),
            IntegrationKind::Scraped => Arc::new(ScrapedAdapter::new(config.clone())?),
        };
        let breaker = Arc::new(CircuitBreaker::new(&config.id, breaker_config.clone()));
        Ok(RegisteredBackend {
            active: AtomicBool::new(config.active),
            rate_window: Mutex::new(RateWindow::new(config.rate_limit)),
            kind,
            adapter,
            breaker,
            config,
        })
    }

    pub fn get(&self, backend_id: &str) -> Option<Arc<RegisteredBackend>> {
        self.backends.get(backend_id).cloned()
    }

    fn get_or_not_found(&self, backend_id: &str) -> Result<Arc<RegisteredBackend>> {
        self.get(backend_id).ok_or_else(|| AppError::NotFound {
            resource: format!("backend {}", backend_id),
        })
    }

    /// All registered backends in configuration order.
    pub fn all(&self) -> Vec<Arc<RegisteredBackend>> {
        self.order
            .iter()
            .filter_map(|id| self.backends.get(id).cloned())
            .collect()
    }

    /// Backends currently eligible for calls, in configuration order.
    pub fn active(&self) -> Vec<Arc<RegisteredBackend>> {
        self.all().into_iter().filter(|b| b.is_active()).collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Toggles a backend. Re-activation resets the breaker so a previously
    /// failing backend gets a clean slate instead of an instant fast-fail.
    pub fn set_active(&self, backend_id: &str, active: bool) -> Result<()> {
        let backend = self.get_or_not_found(backend_id)?;
        let was_active = backend.active.swap(active, Ordering::SeqCst);
        if active && !was_active {
            backend.breaker.reset();
        }
        tracing::info!(backend = %backend_id, active, "backend toggled");
        Ok(())
    }

    /// Operator override: force a backend's circuit closed.
    pub fn reset_breaker(&self, backend_id: &str) -> Result<()> {
        let backend = self.get_or_not_found(backend_id)?;
        backend.breaker.reset();
        Ok(())
    }

    pub fn metrics(&self) -> Arc<BackendMetricsCollector> {
        Arc::clone(&self.metrics)
    }
}
