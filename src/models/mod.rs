use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub mod backend;
pub mod price_history;
pub mod product;
pub mod signal;
pub mod snapshot;
pub mod watch;

// Re-exports for convenience
pub use backend::*;
pub use price_history::*;
pub use product::*;
pub use signal::*;
pub use snapshot::*;
pub use watch::*;

use crate::utils::error::AppError;

/// How a backend is integrated: first-party REST API, affiliate-network API,
/// or a scraped HTML storefront.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationKind {
    DirectApi,
    AffiliateApi,
    Scraped,
}

impl IntegrationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationKind::DirectApi => "direct_api",
            IntegrationKind::AffiliateApi => "affiliate_api",
            IntegrationKind::Scraped => "scraped",
        }
    }
}

impl fmt::Display for IntegrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegrationKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct_api" => Ok(IntegrationKind::DirectApi),
            "affiliate_api" => Ok(IntegrationKind::AffiliateApi),
            "scraped" => Ok(IntegrationKind::Scraped),
            other => Err(AppError::UnknownBackendKind {
                kind: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT")]
pub enum AvailabilityStatus {
    #[sqlx(rename = "in_stock")]
    InStock,
    #[sqlx(rename = "out_of_stock")]
    OutOfStock,
    #[sqlx(rename = "preorder")]
    Preorder,
    #[sqlx(rename = "discontinued")]
    Discontinued,
    #[sqlx(rename = "unknown")]
    Unknown,
}

impl AvailabilityStatus {
    /// Whether the status explicitly means "cannot be bought right now".
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            AvailabilityStatus::OutOfStock | AvailabilityStatus::Discontinued
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT")]
pub enum SignalType {
    #[sqlx(rename = "status_change")]
    StatusChange,
    #[sqlx(rename = "price_present")]
    PricePresent,
    #[sqlx(rename = "url_seen")]
    UrlSeen,
    #[sqlx(rename = "in_stock")]
    InStock,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::StatusChange => "status_change",
            SignalType::PricePresent => "price_present",
            SignalType::UrlSeen => "url_seen",
            SignalType::InStock => "in_stock",
        }
    }

    /// Confidence score attached to signals of this type.
    pub fn confidence(&self) -> u8 {
        match self {
            SignalType::StatusChange => 80,
            SignalType::PricePresent => 70,
            SignalType::UrlSeen => 60,
            SignalType::InStock => 95,
        }
    }
}

// Helper function to generate ids in the format expected by the database
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}
