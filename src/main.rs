use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use dropwatch::config::AppConfig;
use dropwatch::notify::WebhookNotifier;
use dropwatch::orchestrator::IntegrationOrchestrator;
use dropwatch::poller::{AvailabilityPoller, PollScheduler};
use dropwatch::registry::BackendRegistry;
use dropwatch::signals::SignalPublisher;
use dropwatch::storage::{DedupCache, InMemoryDedupCache, SqliteStore};

#[derive(Parser)]
#[command(name = "dropwatch", about = "Multi-backend product availability monitor")]
struct Cli {
    /// Run a single poll cycle and exit instead of starting the scheduler.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("failed to load configuration")?;

    if config.metrics.enabled {
        let addr: SocketAddr = config
            .metrics
            .listen_addr
            .parse()
            .context("metrics.listen_addr is not a socket address")?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to start metrics exporter")?;
        tracing::info!(%addr, "metrics exporter listening");
    }

    let store = Arc::new(
        SqliteStore::connect(&config.database.url)
            .await
            .context("failed to open database")?,
    );

    let registry = Arc::new(BackendRegistry::from_configs(
        config.backends.clone(),
        (&config.breaker).into(),
    ));
    if registry.is_empty() {
        tracing::warn!("no backends registered, cycles will observe nothing");
    }
    let orchestrator = Arc::new(IntegrationOrchestrator::new(registry));

    let cache = config
        .signals
        .memory_cache
        .then(|| Arc::new(InMemoryDedupCache::new()) as Arc<dyn DedupCache>);
    let publisher = Arc::new(
        SignalPublisher::new(store.clone(), cache).with_ttl(config.signals.dedup_ttl()),
    );

    let notifier = Arc::new(WebhookNotifier::new(
        config.notifications.default_webhook_url.clone(),
    )?);

    let poller = Arc::new(AvailabilityPoller::new(
        orchestrator,
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        publisher,
        notifier,
        config.poller.clone(),
    ));

    if cli.once {
        let summary = poller.run_cycle().await?;
        tracing::info!(?summary, "single cycle done");
        return Ok(());
    }

    let mut scheduler = PollScheduler::start(Arc::clone(&poller), &config.poller.cron)
        .await
        .context("failed to start scheduler")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutting down");
    scheduler.shutdown().await?;
    Ok(())
}
