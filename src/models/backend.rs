use serde::{Deserialize, Serialize};

/// Static configuration for one external product-data backend.
///
/// Loaded once at process start; immutable afterwards except the active flag,
/// which the registry tracks separately so operators can toggle a backend
/// without a restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    pub id: String,
    pub name: String,
    pub slug: String,
    /// Integration kind as configured ("direct_api", "affiliate_api",
    /// "scraped"). Resolved against the adapter dispatch at registration; an
    /// unrecognized kind aborts that one backend's startup only.
    pub kind: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub rate_limit: RateLimitBudget,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_active")]
    pub active: bool,
    /// CSS selectors for scraped backends; ignored by API kinds.
    #[serde(default)]
    pub selectors: Option<ScrapeSelectors>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitBudget {
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
}

impl Default for RateLimitBudget {
    fn default() -> Self {
        Self {
            requests_per_minute: 30,
            requests_per_hour: 600,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrapeSelectors {
    pub price: String,
    pub availability: String,
    #[serde(default)]
    pub product_url: Option<String>,
    #[serde(default)]
    pub cart_url: Option<String>,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_active() -> bool {
    true
}

impl BackendConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}
