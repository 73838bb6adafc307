pub mod backends;
pub mod circuit_breaker;
pub mod config;
pub mod metrics;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod poller;
pub mod registry;
pub mod signals;
pub mod storage;
pub mod utils;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use crate::config::AppConfig;
pub use orchestrator::IntegrationOrchestrator;
pub use poller::{AvailabilityPoller, PollCycleSummary, PollScheduler};
pub use registry::BackendRegistry;
pub use signals::{PublishOutcome, SignalPublisher};
pub use utils::error::{AppError, Result};
