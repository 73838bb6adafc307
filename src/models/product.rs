use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::generate_id;

/// A product the poller keeps an eye on across all backends.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct TrackedProduct {
    pub id: String,
    pub name: String,
    /// Retailer-agnostic identifier (SKU/UPC) passed to backend adapters.
    pub sku: Option<String>,
    /// Free-text search query used when a backend has no SKU mapping.
    pub query: Option<String>,
    /// Poll-priority heuristic; higher means polled earlier in a cycle.
    pub popularity: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTrackedProduct {
    pub name: String,
    pub sku: Option<String>,
    pub query: Option<String>,
    pub popularity: Option<i64>,
}

impl TrackedProduct {
    pub fn new(new_product: NewTrackedProduct) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            name: new_product.name,
            sku: new_product.sku,
            query: new_product.query,
            popularity: new_product.popularity.unwrap_or(0),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// The lookup reference handed to adapters: SKU when known, otherwise the
    /// configured query, otherwise the product name.
    pub fn lookup_reference(&self) -> &str {
        self.sku
            .as_deref()
            .or(self.query.as_deref())
            .unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_creation_defaults() {
        let product = TrackedProduct::new(NewTrackedProduct {
            name: "GPU Model X".to_string(),
            sku: Some("GPX-1000".to_string()),
            query: None,
            popularity: None,
        });

        assert_eq!(product.name, "GPU Model X");
        assert_eq!(product.popularity, 0);
        assert!(product.is_active);
        assert_eq!(product.id.len(), 32);
    }

    #[test]
    fn test_lookup_reference_preference() {
        let mut product = TrackedProduct::new(NewTrackedProduct {
            name: "GPU Model X".to_string(),
            sku: Some("GPX-1000".to_string()),
            query: Some("gpu model x".to_string()),
            popularity: Some(7),
        });
        assert_eq!(product.lookup_reference(), "GPX-1000");

        product.sku = None;
        assert_eq!(product.lookup_reference(), "gpu model x");

        product.query = None;
        assert_eq!(product.lookup_reference(), "GPU Model X");
    }
}
