use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use rust_decimal::Decimal;
use scraper::{Html, Selector};
use std::str::FromStr;
use std::sync::OnceLock;
use tokio::time::Instant;
use url::Url;

use crate::backends::{
    build_http_client, with_retry, AvailabilityRequest, BackendAdapter, HealthStatus,
};
use crate::models::{
    AvailabilityObservation, AvailabilityStatus, BackendConfig, ScrapeSelectors,
};
use crate::utils::error::{AppError, Result};

/// Adapter for retailers without any API: fetches product pages and pulls
/// price and stock status out of the HTML with configured CSS selectors.
///
/// `scraper::Html` is not `Send`, so all parsing happens in synchronous
/// helpers between awaits.
pub struct ScrapedAdapter {
    config: BackendConfig,
    selectors: ScrapeSelectors,
    client: reqwest::Client,
}

impl ScrapedAdapter {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let selectors = config.selectors.clone().ok_or_else(|| {
            AppError::Validation(format!(
                "scraped backend {} requires [selectors] with price and availability",
                config.id
            ))
        })?;
        compile(&selectors.price)?;
        compile(&selectors.availability)?;
        let client = build_http_client(&config)?;
        Ok(Self {
            config,
            selectors,
            client,
        })
    }

    fn product_page_url(&self, reference: &str) -> String {
        format!(
            "{}/product/{}",
            self.config.base_url.trim_end_matches('/'),
            reference
        )
    }

    async fn fetch_page(&self, url: &str) -> Result<String> {
        with_retry(&self.config.retry, || async {
            let response = self.client.get(url).send().await?;
            if !response.status().is_success() {
                return Err(AppError::Backend {
                    backend: self.config.id.clone(),
                    message: format!("{} returned {}", url, response.status()),
                });
            }
            response.text().await.map_err(AppError::from)
        })
        .await
    }

    fn parse_product_page(&self, html: &str, page_url: &str) -> Result<AvailabilityObservation> {
        let document = Html::parse_document(html);

        let availability_text = select_text(&document, &self.selectors.availability)?
            .ok_or_else(|| AppError::Parse {
                message: format!(
                    "availability selector {:?} matched nothing on {}",
                    self.selectors.availability, page_url
                ),
            })?;
        let status = status_from_text(&availability_text);

        let price = select_text(&document, &self.selectors.price)?
            .as_deref()
            .and_then(extract_price);

        let cart_url = match &self.selectors.cart_url {
            Some(selector) => select_href(&document, selector, &self.config.base_url)?,
            None => None,
        };

        Ok(AvailabilityObservation {
            backend_id: self.config.id.clone(),
            in_stock: status == AvailabilityStatus::InStock,
            status,
            price,
            original_price: None,
            product_url: Some(page_url.to_string()),
            cart_url,
            stock_level: None,
            store_locations: Vec::new(),
            checked_at: Utc::now(),
        })
    }

    fn parse_search_page(&self, html: &str) -> Result<Vec<AvailabilityObservation>> {
        let document = Html::parse_document(html);
        let selector = self
            .selectors
            .product_url
            .as_deref()
            .unwrap_or("a[href*=\"/product/\"]");
        let parsed = compile(selector)?;

        let mut seen = Vec::new();
        let mut results = Vec::new();
        for element in document.select(&parsed) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            let Some(absolute) = absolutize(&self.config.base_url, href) else {
                continue;
            };
            if seen.contains(&absolute) {
                continue;
            }
            seen.push(absolute.clone());
            // Listing pages don't carry reliable stock info; report the link
            // and let a later availability check fill in the rest.
            let mut obs = AvailabilityObservation::unknown(&self.config.id);
            obs.product_url = Some(absolute);
            results.push(obs);
        }
        Ok(results)
    }
}

#[async_trait]
impl BackendAdapter for ScrapedAdapter {
    fn backend_id(&self) -> &str {
        &self.config.id
    }

    async fn check_availability(
        &self,
        request: &AvailabilityRequest,
    ) -> Result<AvailabilityObservation> {
        let url = self.product_page_url(&request.reference);
        let html = self.fetch_page(&url).await?;
        self.parse_product_page(&html, &url)
    }

    async fn search_products(&self, query: &str) -> Result<Vec<AvailabilityObservation>> {
        let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
        let url = format!(
            "{}/search?q={}",
            self.config.base_url.trim_end_matches('/'),
            encoded
        );
        let html = self.fetch_page(&url).await?;
        self.parse_search_page(&html)
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let url = self.config.base_url.clone();
        let started = Instant::now();
        let response = self.client.get(&url).send().await?;
        let latency_ms = started.elapsed().as_millis() as u64;
        Ok(HealthStatus {
            healthy: response.status().is_success(),
            message: (!response.status().is_success())
                .then(|| format!("front page returned {}", response.status())),
            latency_ms,
        })
    }
}

fn compile(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| AppError::Parse {
        message: format!("invalid CSS selector {:?}: {}", selector, e),
    })
}

fn select_text(document: &Html, selector: &str) -> Result<Option<String>> {
    let parsed = compile(selector)?;
    Ok(document.select(&parsed).next().map(|el| {
        el.text()
            .collect::<Vec<_>>()
            .join(" ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }))
}

fn select_href(document: &Html, selector: &str, base_url: &str) -> Result<Option<String>> {
    let parsed = compile(selector)?;
    Ok(document
        .select(&parsed)
        .next()
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| absolutize(base_url, href)))
}

fn absolutize(base_url: &str, href: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    let base = Url::parse(base_url).ok()?;
    base.join(href).ok().map(String::from)
}

fn price_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+(?:[,.]\d{3})*(?:[.,]\d{2})?").unwrap())
}

/// Pulls the first money-looking token out of a price element's text.
/// Handles "1,299.99", "1299.99" and bare integers; currency symbols and
/// labels around the number are ignored.
fn extract_price(text: &str) -> Option<Decimal> {
    let captured = price_regex().find(text)?.as_str();
    let normalized = if let Some(idx) = captured.rfind(['.', ',']) {
        // The last separator is the decimal point when two digits follow it.
        let (head, tail) = captured.split_at(idx);
        if tail.len() == 3 {
            format!("{}.{}", head.replace([',', '.'], ""), &tail[1..])
        } else {
            captured.replace([',', '.'], "")
        }
    } else {
        captured.to_string()
    };
    Decimal::from_str(&normalized).ok()
}

fn status_from_text(text: &str) -> AvailabilityStatus {
    let lowered = text.to_ascii_lowercase();
    if lowered.contains("pre-order") || lowered.contains("preorder") {
        AvailabilityStatus::Preorder
    } else if lowered.contains("discontinued") || lowered.contains("no longer available") {
        AvailabilityStatus::Discontinued
    } else if lowered.contains("out of stock")
        || lowered.contains("sold out")
        || lowered.contains("unavailable")
        || lowered.contains("notify me")
    {
        AvailabilityStatus::OutOfStock
    } else if lowered.contains("in stock")
        || lowered.contains("add to cart")
        || lowered.contains("available")
    {
        AvailabilityStatus::InStock
    } else {
        AvailabilityStatus::Unknown
    }
}
