use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;
use std::time::Duration;

use crate::models::{
    AvailabilityStatus, DropSignal, NewTrackedProduct, PricePoint,
    ProductAvailabilitySnapshot, SignalType, TrackedProduct, Watch,
};
use crate::storage::{DedupCache, PriceHistoryStore, ProductStore, SignalStore, SnapshotStore, WatchStore};
use crate::utils::error::{AppError, Result};

/// SQLite-backed implementation of every store trait.
///
/// Prices are stored as TEXT and go through `rust_decimal` on the way in and
/// out; list-valued columns are JSON text.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(AppError::Database)?
            .create_if_missing(true);
        // In-memory databases exist per connection; a single-connection pool
        // keeps tests and ephemeral runs on one coherent database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        use sqlx::Executor;
        // Unprepared execution: the schema is several statements in one go.
        self.pool
            .execute(
                r#"
            CREATE TABLE IF NOT EXISTS products (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                sku TEXT,
                query TEXT,
                popularity INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS availability_snapshots (
                product_id TEXT NOT NULL,
                backend_id TEXT NOT NULL,
                in_stock INTEGER NOT NULL,
                status TEXT NOT NULL,
                price TEXT,
                original_price TEXT,
                product_url TEXT,
                cart_url TEXT,
                stock_level INTEGER,
                store_locations TEXT NOT NULL DEFAULT '[]',
                last_checked TEXT NOT NULL,
                PRIMARY KEY (product_id, backend_id)
            );

            CREATE TABLE IF NOT EXISTS price_history (
                id TEXT PRIMARY KEY,
                product_id TEXT NOT NULL,
                backend_id TEXT NOT NULL,
                price TEXT NOT NULL,
                original_price TEXT,
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_price_history_pair
                ON price_history (product_id, backend_id, recorded_at);

            CREATE TABLE IF NOT EXISTS drop_signals (
                id TEXT PRIMARY KEY,
                product_id TEXT NOT NULL,
                backend_id TEXT NOT NULL,
                signal_type TEXT NOT NULL,
                value TEXT NOT NULL,
                source TEXT NOT NULL,
                confidence INTEGER NOT NULL,
                dedup_key TEXT NOT NULL,
                observed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_drop_signals_dedup
                ON drop_signals (dedup_key, observed_at);

            CREATE TABLE IF NOT EXISTS watches (
                id TEXT PRIMARY KEY,
                product_id TEXT NOT NULL,
                backend_ids TEXT NOT NULL DEFAULT '[]',
                webhook_url TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_watches_product
                ON watches (product_id, is_active);
            "#,
            )
            .await?;
        Ok(())
    }
}

#[derive(FromRow)]
struct SnapshotRow {
    product_id: String,
    backend_id: String,
    in_stock: bool,
    status: AvailabilityStatus,
    price: Option<String>,
    original_price: Option<String>,
    product_url: Option<String>,
    cart_url: Option<String>,
    stock_level: Option<i64>,
    store_locations: String,
    last_checked: DateTime<Utc>,
}

impl SnapshotRow {
    fn into_snapshot(self) -> Result<ProductAvailabilitySnapshot> {
        Ok(ProductAvailabilitySnapshot {
            product_id: self.product_id,
            backend_id: self.backend_id,
            in_stock: self.in_stock,
            status: self.status,
            price: parse_price(self.price.as_deref())?,
            original_price: parse_price(self.original_price.as_deref())?,
            product_url: self.product_url,
            cart_url: self.cart_url,
            stock_level: self.stock_level,
            store_locations: serde_json::from_str(&self.store_locations)?,
            last_checked: self.last_checked,
        })
    }
}

#[derive(FromRow)]
struct PriceRow {
    id: String,
    product_id: String,
    backend_id: String,
    price: String,
    original_price: Option<String>,
    recorded_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct SignalRow {
    id: String,
    product_id: String,
    backend_id: String,
    signal_type: SignalType,
    value: String,
    source: String,
    confidence: i64,
    observed_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct WatchRow {
    id: String,
    product_id: String,
    backend_ids: String,
    webhook_url: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

fn parse_price(raw: Option<&str>) -> Result<Option<Decimal>> {
    raw.map(|s| {
        Decimal::from_str(s).map_err(|e| AppError::Parse {
            message: format!("stored price {:?} is not a decimal: {}", s, e),
        })
    })
    .transpose()
}

#[async_trait]
impl ProductStore for SqliteStore {
    async fn insert_product(&self, new_product: NewTrackedProduct) -> Result<TrackedProduct> {
        let product = TrackedProduct::new(new_product);
        sqlx::query(
            r#"
            INSERT INTO products (id, name, sku, query, popularity, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&product.id)
        .bind(&product.name)
        .bind(&product.sku)
        .bind(&product.query)
        .bind(product.popularity)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(product)
    }

    async fn get_product(&self, product_id: &str) -> Result<Option<TrackedProduct>> {
        let product = sqlx::query_as::<_, TrackedProduct>("SELECT * FROM products WHERE id = ?")
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    async fn poll_batch(&self, limit: i64) -> Result<Vec<TrackedProduct>> {
        let products = sqlx::query_as::<_, TrackedProduct>(
            r#"
            SELECT * FROM products
            WHERE is_active = 1
            ORDER BY popularity DESC, created_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(products)
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn get_snapshot(
        &self,
        product_id: &str,
        backend_id: &str,
    ) -> Result<Option<ProductAvailabilitySnapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            "SELECT * FROM availability_snapshots WHERE product_id = ? AND backend_id = ?",
        )
        .bind(product_id)
        .bind(backend_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SnapshotRow::into_snapshot).transpose()
    }

    async fn upsert_snapshot(&self, snapshot: &ProductAvailabilitySnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO availability_snapshots
                (product_id, backend_id, in_stock, status, price, original_price,
                 product_url, cart_url, stock_level, store_locations, last_checked)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (product_id, backend_id) DO UPDATE SET
                in_stock = excluded.in_stock,
                status = excluded.status,
                price = excluded.price,
                original_price = excluded.original_price,
                product_url = excluded.product_url,
                cart_url = excluded.cart_url,
                stock_level = excluded.stock_level,
                store_locations = excluded.store_locations,
                last_checked = excluded.last_checked
            "#,
        )
        .bind(&snapshot.product_id)
        .bind(&snapshot.backend_id)
        .bind(snapshot.in_stock)
        .bind(snapshot.status)
        .bind(snapshot.price.map(|p| p.to_string()))
        .bind(snapshot.original_price.map(|p| p.to_string()))
        .bind(&snapshot.product_url)
        .bind(&snapshot.cart_url)
        .bind(snapshot.stock_level)
        .bind(serde_json::to_string(&snapshot.store_locations)?)
        .bind(snapshot.last_checked)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PriceHistoryStore for SqliteStore {
    async fn append_price(&self, point: &PricePoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO price_history (id, product_id, backend_id, price, original_price, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&point.id)
        .bind(&point.product_id)
        .bind(&point.backend_id)
        .bind(point.price.to_string())
        .bind(point.original_price.map(|p| p.to_string()))
        .bind(point.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_prices(
        &self,
        product_id: &str,
        backend_id: &str,
        limit: i64,
    ) -> Result<Vec<PricePoint>> {
        let rows = sqlx::query_as::<_, PriceRow>(
            r#"
            SELECT * FROM price_history
            WHERE product_id = ? AND backend_id = ?
            ORDER BY recorded_at DESC
            LIMIT ?
            "#,
        )
        .bind(product_id)
        .bind(backend_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(PricePoint {
                    price: parse_price(Some(&row.price))?.unwrap_or_default(),
                    original_price: parse_price(row.original_price.as_deref())?,
                    id: row.id,
                    product_id: row.product_id,
                    backend_id: row.backend_id,
                    recorded_at: row.recorded_at,
                })
            })
            .collect()
    }
}

#[async_trait]
impl SignalStore for SqliteStore {
    async fn insert_signal(&self, signal: &DropSignal, dedup_key: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO drop_signals
                (id, product_id, backend_id, signal_type, value, source, confidence, dedup_key, observed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&signal.id)
        .bind(&signal.product_id)
        .bind(&signal.backend_id)
        .bind(signal.signal_type)
        .bind(signal.value.to_string())
        .bind(&signal.source)
        .bind(signal.confidence as i64)
        .bind(dedup_key)
        .bind(signal.observed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_signal_exists(&self, dedup_key: &str, window: Duration) -> Result<bool> {
        let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or_default();
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM drop_signals WHERE dedup_key = ? AND observed_at >= ?",
        )
        .bind(dedup_key)
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn signals_for_product(&self, product_id: &str, limit: i64) -> Result<Vec<DropSignal>> {
        let rows = sqlx::query_as::<_, SignalRow>(
            r#"
            SELECT id, product_id, backend_id, signal_type, value, source, confidence, observed_at
            FROM drop_signals
            WHERE product_id = ?
            ORDER BY observed_at DESC
            LIMIT ?
            "#,
        )
        .bind(product_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(DropSignal {
                    value: serde_json::from_str(&row.value)?,
                    id: row.id,
                    product_id: row.product_id,
                    backend_id: row.backend_id,
                    signal_type: row.signal_type,
                    source: row.source,
                    confidence: row.confidence as u8,
                    observed_at: row.observed_at,
                })
            })
            .collect()
    }
}

#[async_trait]
impl WatchStore for SqliteStore {
    async fn insert_watch(&self, watch: &Watch) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO watches (id, product_id, backend_ids, webhook_url, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&watch.id)
        .bind(&watch.product_id)
        .bind(serde_json::to_string(&watch.backend_ids)?)
        .bind(&watch.webhook_url)
        .bind(watch.is_active)
        .bind(watch.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_watches_for_product(&self, product_id: &str) -> Result<Vec<Watch>> {
        let rows = sqlx::query_as::<_, WatchRow>(
            "SELECT * FROM watches WHERE product_id = ? AND is_active = 1 ORDER BY created_at",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(Watch {
                    backend_ids: serde_json::from_str(&row.backend_ids)?,
                    id: row.id,
                    product_id: row.product_id,
                    webhook_url: row.webhook_url,
                    is_active: row.is_active,
                    created_at: row.created_at,
                })
            })
            .collect()
    }
}

/// SQLite-backed dedup keyed on the signals table itself: "absent" means no
/// equivalent signal was persisted within the TTL. Lets a deployment run
/// without any separate cache process.
pub struct SqliteDedup {
    store: SqliteStore,
}

impl SqliteDedup {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DedupCache for SqliteDedup {
    async fn insert_if_absent(&self, key: &str, ttl: Duration) -> Result<bool> {
        // The publisher persists the signal (with its dedup key) right after
        // a hit, which is what makes the key "present" for later calls.
        Ok(!self.store.recent_signal_exists(key, ttl).await?)
    }
}
