use ::metrics::counter;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{DropSignal, NewDropSignal};
use crate::storage::{DedupCache, SignalStore};
use crate::utils::error::Result;

pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Published(DropSignal),
    /// Suppressed: an equivalent signal was already published within the
    /// dedup window.
    Duplicate,
}

/// Persists drop signals with a TTL de-duplication window keyed on
/// (product, backend, type, value hash).
///
/// De-duplication is best effort: if the cache errors, the signal is
/// persisted anyway. Losing a duplicate is acceptable, losing a real signal
/// is not. Without a cache the publisher falls back to querying the signal
/// store for a recent equivalent.
pub struct SignalPublisher {
    store: Arc<dyn SignalStore>,
    cache: Option<Arc<dyn DedupCache>>,
    ttl: Duration,
}

impl SignalPublisher {
    pub fn new(store: Arc<dyn SignalStore>, cache: Option<Arc<dyn DedupCache>>) -> Self {
        Self {
            store,
            cache,
            ttl: DEFAULT_DEDUP_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub async fn publish(&self, new_signal: NewDropSignal) -> Result<PublishOutcome> {
        let key = new_signal.dedup_key();
        let signal_type = new_signal.signal_type;

        if !self.first_sighting(&key).await {
            counter!("dropwatch_signals_suppressed_total",
                "type" => signal_type.as_str())
            .increment(1);
            tracing::debug!(dedup_key = %key, "signal suppressed as duplicate");
            return Ok(PublishOutcome::Duplicate);
        }

        let signal = new_signal.into_signal();
        self.store.insert_signal(&signal, &key).await?;
        counter!("dropwatch_signals_published_total",
            "type" => signal_type.as_str())
        .increment(1);
        tracing::info!(
            product = %signal.product_id,
            backend = %signal.backend_id,
            signal_type = signal.signal_type.as_str(),
            confidence = signal.confidence,
            "signal published"
        );
        Ok(PublishOutcome::Published(signal))
    }

    /// Whether this dedup key is new within the TTL window. Cache failures
    /// degrade to "new" so the signal is still persisted.
    async fn first_sighting(&self, key: &str) -> bool {
        let checked = match &self.cache {
            Some(cache) => cache.insert_if_absent(key, self.ttl).await,
            None => self
                .store
                .recent_signal_exists(key, self.ttl)
                .await
                .map(|exists| !exists),
        };
        match checked {
            Ok(absent) => absent,
            Err(e) => {
                tracing::warn!(error = %e, dedup_key = %key, "dedup check failed, publishing anyway");
                true
            }
        }
    }
}
