use ::metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

/// Per-backend request counters, owned by the registry and updated by the
/// orchestrator on every call regardless of outcome.
///
/// Counters also flow through the `metrics` facade so the optional Prometheus
/// exporter picks them up; the in-process copy is what the registry exposes to
/// operators and what tests assert against.
#[derive(Default)]
pub struct BackendMetricsCollector {
    backends: RwLock<HashMap<String, BackendCounters>>,
}

#[derive(Debug, Clone, Default)]
struct BackendCounters {
    total_requests: u64,
    succeeded: u64,
    failed: u64,
    rate_limit_hits: u64,
    breaker_fast_fails: u64,
    total_latency_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BackendMetricsSnapshot {
    pub total_requests: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub rate_limit_hits: u64,
    pub breaker_fast_fails: u64,
    pub average_latency_ms: f64,
}

impl BackendMetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, backend_id: &str, latency: Duration) {
        let latency_ms = latency.as_millis() as u64;
        self.update(backend_id, |c| {
            c.total_requests += 1;
            c.succeeded += 1;
            c.total_latency_ms += latency_ms;
        });
        counter!("dropwatch_backend_requests_total",
            "backend" => backend_id.to_string(), "outcome" => "success")
        .increment(1);
        histogram!("dropwatch_backend_latency_ms", "backend" => backend_id.to_string())
            .record(latency_ms as f64);
    }

    pub fn record_failure(&self, backend_id: &str, latency: Duration) {
        let latency_ms = latency.as_millis() as u64;
        self.update(backend_id, |c| {
            c.total_requests += 1;
            c.failed += 1;
            c.total_latency_ms += latency_ms;
        });
        counter!("dropwatch_backend_requests_total",
            "backend" => backend_id.to_string(), "outcome" => "failure")
        .increment(1);
    }

    /// A call rejected before the network by the breaker's fast-fail.
    pub fn record_fast_fail(&self, backend_id: &str) {
        self.update(backend_id, |c| {
            c.total_requests += 1;
            c.failed += 1;
            c.breaker_fast_fails += 1;
        });
        counter!("dropwatch_backend_requests_total",
            "backend" => backend_id.to_string(), "outcome" => "circuit_open")
        .increment(1);
    }

    /// A call skipped because the backend's rate-limit budget was exhausted.
    pub fn record_rate_limited(&self, backend_id: &str) {
        self.update(backend_id, |c| {
            c.total_requests += 1;
            c.rate_limit_hits += 1;
        });
        counter!("dropwatch_backend_rate_limit_hits_total",
            "backend" => backend_id.to_string())
        .increment(1);
    }

    pub fn snapshot(&self, backend_id: &str) -> BackendMetricsSnapshot {
        let backends = self.read();
        backends
            .get(backend_id)
            .map(BackendCounters::snapshot)
            .unwrap_or_default()
    }

    pub fn all(&self) -> HashMap<String, BackendMetricsSnapshot> {
        let backends = self.read();
        backends
            .iter()
            .map(|(id, counters)| (id.clone(), counters.snapshot()))
            .collect()
    }

    fn update(&self, backend_id: &str, apply: impl FnOnce(&mut BackendCounters)) {
        let mut backends = self
            .backends
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        apply(backends.entry(backend_id.to_string()).or_default());
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, BackendCounters>> {
        self.backends
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl BackendCounters {
    fn snapshot(&self) -> BackendMetricsSnapshot {
        let timed = self.succeeded + self.failed - self.breaker_fast_fails;
        let average_latency_ms = if timed == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / timed as f64
        };
        BackendMetricsSnapshot {
            total_requests: self.total_requests,
            succeeded: self.succeeded,
            failed: self.failed,
            rate_limit_hits: self.rate_limit_hits,
            breaker_fast_fails: self.breaker_fast_fails,
            average_latency_ms,
        }
    }
}
