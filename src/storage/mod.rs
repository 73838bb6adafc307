use async_trait::async_trait;
use std::time::Duration;

use crate::models::{
    DropSignal, NewTrackedProduct, PricePoint, ProductAvailabilitySnapshot, TrackedProduct, Watch,
};
use crate::utils::error::Result;

pub mod memory_cache;
pub mod sqlite;

pub use memory_cache::InMemoryDedupCache;
pub use sqlite::{SqliteDedup, SqliteStore};

/// Tracked-product persistence.
#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn insert_product(&self, new_product: NewTrackedProduct) -> Result<TrackedProduct>;

    async fn get_product(&self, product_id: &str) -> Result<Option<TrackedProduct>>;

    /// Up to `limit` active products, highest popularity first, newest first
    /// within equal popularity. This is the poll-cycle batch query.
    async fn poll_batch(&self, limit: i64) -> Result<Vec<TrackedProduct>>;
}

/// Latest-known availability per (product, backend) pair.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn get_snapshot(
        &self,
        product_id: &str,
        backend_id: &str,
    ) -> Result<Option<ProductAvailabilitySnapshot>>;

    /// Inserts or overwrites the pair's single snapshot row.
    async fn upsert_snapshot(&self, snapshot: &ProductAvailabilitySnapshot) -> Result<()>;
}

/// Append-only price records.
#[async_trait]
pub trait PriceHistoryStore: Send + Sync {
    async fn append_price(&self, point: &PricePoint) -> Result<()>;

    /// Most recent prices first.
    async fn recent_prices(
        &self,
        product_id: &str,
        backend_id: &str,
        limit: i64,
    ) -> Result<Vec<PricePoint>>;
}

/// Persisted drop signals.
#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Persists a signal along with its dedup key so a later
    /// `recent_signal_exists` can find it.
    async fn insert_signal(&self, signal: &DropSignal, dedup_key: &str) -> Result<()>;

    /// Whether an equivalent signal (same product, backend, type and value
    /// hash) was persisted within the window. Dedup fallback for when no
    /// cache is wired in.
    async fn recent_signal_exists(&self, dedup_key: &str, window: Duration) -> Result<bool>;

    async fn signals_for_product(&self, product_id: &str, limit: i64) -> Result<Vec<DropSignal>>;
}

/// Restock-watch subscriptions.
#[async_trait]
pub trait WatchStore: Send + Sync {
    async fn insert_watch(&self, watch: &Watch) -> Result<()>;

    async fn active_watches_for_product(&self, product_id: &str) -> Result<Vec<Watch>>;
}

/// TTL-keyed presence cache used for signal de-duplication.
///
/// A failing cache must not lose signals: callers degrade to persisting
/// unconditionally when these methods error.
#[async_trait]
pub trait DedupCache: Send + Sync {
    /// Marks `key` seen for `ttl` and reports whether it was absent before.
    /// `Ok(true)` means first sighting within the window.
    async fn insert_if_absent(&self, key: &str, ttl: Duration) -> Result<bool>;
}
