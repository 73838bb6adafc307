use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::models::{AvailabilityObservation, TrackedProduct, Watch};
use crate::utils::error::{AppError, Result};

/// Everything a notification target needs to render a restock alert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RestockEvent {
    pub product_id: String,
    pub product_name: String,
    pub backend_id: String,
    pub price: Option<Decimal>,
    pub product_url: Option<String>,
    pub cart_url: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl RestockEvent {
    pub fn new(product: &TrackedProduct, obs: &AvailabilityObservation) -> Self {
        Self {
            product_id: product.id.clone(),
            product_name: product.name.clone(),
            backend_id: obs.backend_id.clone(),
            price: obs.price,
            product_url: obs.product_url.clone(),
            cart_url: obs.cart_url.clone(),
            observed_at: obs.checked_at,
        }
    }
}

/// Delivers a restock alert for one watch. One notify call per matching
/// watch; failures are the caller's to isolate.
#[async_trait]
pub trait WatchNotifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(&self, watch: &Watch, event: &RestockEvent) -> Result<()>;
}

/// Posts a Discord-compatible embed to the watch's webhook, falling back to
/// a process-wide default URL when the watch has none configured.
pub struct WebhookNotifier {
    client: reqwest::Client,
    default_url: Option<String>,
}

impl WebhookNotifier {
    pub fn new(default_url: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .user_agent(concat!("dropwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            default_url,
        })
    }

    fn payload(event: &RestockEvent) -> serde_json::Value {
        let mut fields = vec![json!({
            "name": "Backend",
            "value": event.backend_id,
            "inline": true
        })];
        if let Some(price) = event.price {
            fields.push(json!({
                "name": "Price",
                "value": price.to_string(),
                "inline": true
            }));
        }
        if let Some(cart_url) = &event.cart_url {
            fields.push(json!({
                "name": "Cart",
                "value": cart_url,
                "inline": false
            }));
        }
        json!({
            "embeds": [{
                "title": format!("{} is back in stock", event.product_name),
                "url": event.product_url,
                "fields": fields,
                "timestamp": event.observed_at.to_rfc3339(),
            }]
        })
    }
}

#[async_trait]
impl WatchNotifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn notify(&self, watch: &Watch, event: &RestockEvent) -> Result<()> {
        let Some(url) = watch.webhook_url.as_deref().or(self.default_url.as_deref()) else {
            tracing::info!(
                watch = %watch.id,
                product = %event.product_name,
                backend = %event.backend_id,
                "restock (no webhook configured, logged only)"
            );
            return Ok(());
        };

        let response = self
            .client
            .post(url)
            .json(&Self::payload(event))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::Backend {
                backend: event.backend_id.clone(),
                message: format!("webhook returned {}", response.status()),
            });
        }
        tracing::info!(
            watch = %watch.id,
            product = %event.product_name,
            backend = %event.backend_id,
            "restock notification delivered"
        );
        Ok(())
    }
}

/// Log-only notifier for deployments without any webhook target.
pub struct LogNotifier;

#[async_trait]
impl WatchNotifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn notify(&self, watch: &Watch, event: &RestockEvent) -> Result<()> {
        tracing::info!(
            watch = %watch.id,
            product = %event.product_name,
            backend = %event.backend_id,
            price = ?event.price,
            url = ?event.product_url,
            "restock"
        );
        Ok(())
    }
}
