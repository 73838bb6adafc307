use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::models::BackendConfig;
use crate::utils::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub signals: SignalsConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Products polled per cycle, highest priority first.
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    /// Pause between consecutive products within a cycle.
    #[serde(default = "default_item_delay_ms")]
    pub item_delay_ms: u64,
    /// Six-field cron expression driving poll cycles.
    #[serde(default = "default_cron")]
    pub cron: String,
}

impl PollerConfig {
    pub fn item_delay(&self) -> Duration {
        Duration::from_millis(self.item_delay_ms)
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            item_delay_ms: default_item_delay_ms(),
            cron: default_cron(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalsConfig {
    /// De-duplication window in seconds.
    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,
    /// Use the in-process dedup cache; false falls back to store-window
    /// dedup queries.
    #[serde(default = "default_true")]
    pub memory_cache: bool,
}

impl SignalsConfig {
    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            dedup_ttl_secs: default_dedup_ttl_secs(),
            memory_cache: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
    #[serde(default = "default_monitoring_period_secs")]
    pub monitoring_period_secs: u64,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            monitoring_period_secs: default_monitoring_period_secs(),
            success_threshold: default_success_threshold(),
        }
    }
}

impl From<&BreakerConfig> for CircuitBreakerConfig {
    fn from(config: &BreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            recovery_timeout: Duration::from_secs(config.recovery_timeout_secs),
            monitoring_period: Duration::from_secs(config.monitoring_period_secs),
            success_threshold: config.success_threshold,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_addr")]
    pub listen_addr: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Fallback webhook for watches without their own target.
    #[serde(default)]
    pub default_webhook_url: Option<String>,
}

impl AppConfig {
    /// Layered load: config/default.toml, then config/{RUN_MODE}.toml, then
    /// DROPWATCH__* environment variables.
    pub fn from_env() -> Result<Self> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config: AppConfig = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(
                config::Environment::with_prefix("DROPWATCH")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(AppError::Validation("database.url must be set".to_string()));
        }
        if self.poller.batch_size <= 0 {
            return Err(AppError::Validation(
                "poller.batch_size must be positive".to_string(),
            ));
        }
        if self.signals.dedup_ttl_secs == 0 {
            return Err(AppError::Validation(
                "signals.dedup_ttl_secs must be positive".to_string(),
            ));
        }
        if self.breaker.failure_threshold == 0 || self.breaker.success_threshold == 0 {
            return Err(AppError::Validation(
                "breaker thresholds must be positive".to_string(),
            ));
        }
        let mut ids = HashSet::new();
        for backend in &self.backends {
            if backend.id.is_empty() || backend.base_url.is_empty() {
                return Err(AppError::Validation(
                    "backends need an id and a base_url".to_string(),
                ));
            }
            if url::Url::parse(&backend.base_url).is_err() {
                return Err(AppError::Validation(format!(
                    "backend {} base_url is not a valid URL",
                    backend.id
                )));
            }
            if !ids.insert(&backend.id) {
                return Err(AppError::Validation(format!(
                    "duplicate backend id {}",
                    backend.id
                )));
            }
        }
        Ok(())
    }
}

fn default_batch_size() -> i64 {
    25
}

fn default_item_delay_ms() -> u64 {
    250
}

fn default_cron() -> String {
    // Every five minutes.
    "0 */5 * * * *".to_string()
}

fn default_dedup_ttl_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_secs() -> u64 {
    30
}

fn default_monitoring_period_secs() -> u64 {
    60
}

fn default_success_threshold() -> u32 {
    3
}

fn default_metrics_addr() -> String {
    "127.0.0.1:9090".to_string()
}
