use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::generate_id;

/// A subscription to restock events for one product, optionally restricted to
/// specific backends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Watch {
    pub id: String,
    pub product_id: String,
    /// Empty means "any backend".
    pub backend_ids: Vec<String>,
    /// Webhook target for this watch; a watch without one goes to the
    /// process-wide default notifier.
    pub webhook_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Watch {
    pub fn new(product_id: &str, backend_ids: Vec<String>, webhook_url: Option<String>) -> Self {
        Self {
            id: generate_id(),
            product_id: product_id.to_string(),
            backend_ids,
            webhook_url,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    /// Whether a restock observed on `backend_id` should notify this watch.
    pub fn matches_backend(&self, backend_id: &str) -> bool {
        self.backend_ids.is_empty() || self.backend_ids.iter().any(|b| b == backend_id)
    }
}
