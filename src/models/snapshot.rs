use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::AvailabilityStatus;

/// One point-in-time availability report from a single backend.
///
/// Adapters produce these; the poller turns them into snapshots and signals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilityObservation {
    pub backend_id: String,
    pub in_stock: bool,
    pub status: AvailabilityStatus,
    pub price: Option<Decimal>,
    pub original_price: Option<Decimal>,
    pub product_url: Option<String>,
    pub cart_url: Option<String>,
    pub stock_level: Option<i64>,
    pub store_locations: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl AvailabilityObservation {
    pub fn unknown(backend_id: &str) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            in_stock: false,
            status: AvailabilityStatus::Unknown,
            price: None,
            original_price: None,
            product_url: None,
            cart_url: None,
            stock_level: None,
            store_locations: Vec::new(),
            checked_at: Utc::now(),
        }
    }
}

/// The latest known availability state for one (product, backend) pair.
///
/// At most one live snapshot exists per pair; new observations overwrite in
/// place. Retention is an external concern, this crate never deletes rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductAvailabilitySnapshot {
    pub product_id: String,
    pub backend_id: String,
    pub in_stock: bool,
    pub status: AvailabilityStatus,
    pub price: Option<Decimal>,
    pub original_price: Option<Decimal>,
    pub product_url: Option<String>,
    pub cart_url: Option<String>,
    pub stock_level: Option<i64>,
    pub store_locations: Vec<String>,
    pub last_checked: DateTime<Utc>,
}

impl ProductAvailabilitySnapshot {
    pub fn from_observation(product_id: &str, obs: &AvailabilityObservation) -> Self {
        Self {
            product_id: product_id.to_string(),
            backend_id: obs.backend_id.clone(),
            in_stock: obs.in_stock,
            status: obs.status,
            price: obs.price,
            original_price: obs.original_price,
            product_url: obs.product_url.clone(),
            cart_url: obs.cart_url.clone(),
            stock_level: obs.stock_level,
            store_locations: obs.store_locations.clone(),
            last_checked: obs.checked_at,
        }
    }

    /// The restock predicate: a new observation counts as "went in stock"
    /// only when it reports in-stock and this prior snapshot did not.
    pub fn went_in_stock(prior: Option<&Self>, new: &AvailabilityObservation) -> bool {
        if !new.in_stock {
            return false;
        }
        match prior {
            None => true,
            Some(prev) => !prev.in_stock || prev.status.is_unavailable(),
        }
    }
}
