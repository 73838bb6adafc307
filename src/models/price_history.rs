use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::generate_id;

/// One immutable price record for a (product, backend) pair. Appended on
/// every observation that carries a price; never overwritten.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    pub id: String,
    pub product_id: String,
    pub backend_id: String,
    pub price: Decimal,
    pub original_price: Option<Decimal>,
    pub recorded_at: DateTime<Utc>,
}

impl PricePoint {
    pub fn new(
        product_id: &str,
        backend_id: &str,
        price: Decimal,
        original_price: Option<Decimal>,
    ) -> Self {
        Self {
            id: generate_id(),
            product_id: product_id.to_string(),
            backend_id: backend_id.to_string(),
            price,
            original_price,
            recorded_at: Utc::now(),
        }
    }
}
