use chrono::{DateTime, Utc};
use futures::future::join_all;
use ::metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::backends::AvailabilityRequest;
use crate::config::PollerConfig;
use crate::models::{
    AvailabilityObservation, NewDropSignal, PricePoint, ProductAvailabilitySnapshot, SignalType,
    TrackedProduct,
};
use crate::notify::{RestockEvent, WatchNotifier};
use crate::orchestrator::IntegrationOrchestrator;
use crate::signals::{PublishOutcome, SignalPublisher};
use crate::storage::{PriceHistoryStore, ProductStore, SnapshotStore, WatchStore};
use crate::utils::error::{AppError, Result};

const SIGNAL_SOURCE: &str = "poller";

/// What one poll cycle did, for logs and tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PollCycleSummary {
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub products_polled: usize,
    pub observations: usize,
    pub snapshots_written: usize,
    pub signals_published: usize,
    pub signals_suppressed: usize,
    pub restocks: usize,
    pub notifications_sent: usize,
    pub notification_failures: usize,
}

/// Walks the highest-priority products each cycle, fans each one out across
/// all active backends, and turns observations into snapshots, price points,
/// signals and restock notifications.
///
/// Products are polled sequentially with a configured delay between them;
/// only the per-product backend fan-out is concurrent. Cycles never overlap:
/// a cycle that fires while the previous one is still running is skipped.
pub struct AvailabilityPoller {
    orchestrator: Arc<IntegrationOrchestrator>,
    products: Arc<dyn ProductStore>,
    snapshots: Arc<dyn SnapshotStore>,
    prices: Arc<dyn PriceHistoryStore>,
    watches: Arc<dyn WatchStore>,
    publisher: Arc<SignalPublisher>,
    notifier: Arc<dyn WatchNotifier>,
    config: PollerConfig,
    cycle_guard: tokio::sync::Mutex<()>,
}

impl AvailabilityPoller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orchestrator: Arc<IntegrationOrchestrator>,
        products: Arc<dyn ProductStore>,
        snapshots: Arc<dyn SnapshotStore>,
        prices: Arc<dyn PriceHistoryStore>,
        watches: Arc<dyn WatchStore>,
        publisher: Arc<SignalPublisher>,
        notifier: Arc<dyn WatchNotifier>,
        config: PollerConfig,
    ) -> Self {
        Self {
            orchestrator,
            products,
            snapshots,
            prices,
            watches,
            publisher,
            notifier,
            config,
            cycle_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Runs one poll cycle. Returns `None` when a previous cycle is still
    /// in flight.
    pub async fn run_cycle(&self) -> Result<Option<PollCycleSummary>> {
        let Ok(_guard) = self.cycle_guard.try_lock() else {
            tracing::warn!("poll cycle skipped, previous cycle still running");
            counter!("dropwatch_poll_cycles_skipped_total").increment(1);
            return Ok(None);
        };

        let started_at = Utc::now();
        let started = Instant::now();
        let batch = self.products.poll_batch(self.config.batch_size).await?;
        tracing::info!(products = batch.len(), "poll cycle started");

        let mut summary = PollCycleSummary {
            started_at: Some(started_at),
            products_polled: batch.len(),
            ..Default::default()
        };

        for (index, product) in batch.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.item_delay()).await;
            }
            self.poll_product(product, &mut summary).await;
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        counter!("dropwatch_poll_cycles_total").increment(1);
        histogram!("dropwatch_poll_cycle_duration_ms").record(summary.duration_ms as f64);
        tracing::info!(
            products = summary.products_polled,
            observations = summary.observations,
            signals = summary.signals_published,
            restocks = summary.restocks,
            duration_ms = summary.duration_ms,
            "poll cycle complete"
        );
        Ok(Some(summary))
    }

    async fn poll_product(&self, product: &TrackedProduct, summary: &mut PollCycleSummary) {
        let request = AvailabilityRequest::new(&product.id, product.lookup_reference());
        let observations = self.orchestrator.check_availability(&request, None).await;
        summary.observations += observations.len();

        // Deterministic processing order regardless of fan-out completion.
        let mut entries: Vec<_> = observations.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        for (backend_id, observation) in entries {
            if let Err(e) = self.record_observation(product, &observation, summary).await {
                tracing::warn!(
                    product = %product.id,
                    backend = %backend_id,
                    error = %e,
                    "failed to record observation"
                );
            }
        }
    }

    /// Persists one backend's observation and derives everything from it:
    /// signals, the snapshot upsert, the price point, and (on a restock) the
    /// watch fan-out.
    async fn record_observation(
        &self,
        product: &TrackedProduct,
        obs: &AvailabilityObservation,
        summary: &mut PollCycleSummary,
    ) -> Result<()> {
        let prior = self.snapshots.get_snapshot(&product.id, &obs.backend_id).await?;
        let restocked = ProductAvailabilitySnapshot::went_in_stock(prior.as_ref(), obs);

        if let Some(prev) = &prior {
            if prev.status != obs.status {
                self.publish(
                    product,
                    obs,
                    SignalType::StatusChange,
                    json!({"from": prev.status, "to": obs.status}),
                    summary,
                )
                .await;
            }
        }
        // price_present marks the first time a price shows up for the pair;
        // url_seen fires on the first or a changed product URL. Steady-state
        // repeats stay silent regardless of the dedup window.
        if let Some(price) = obs.price {
            if prior.as_ref().map_or(true, |prev| prev.price.is_none()) {
                self.publish(
                    product,
                    obs,
                    SignalType::PricePresent,
                    json!({"price": price.to_string()}),
                    summary,
                )
                .await;
            }
        }
        if let Some(url) = &obs.product_url {
            if prior
                .as_ref()
                .map_or(true, |prev| prev.product_url.as_ref() != Some(url))
            {
                self.publish(product, obs, SignalType::UrlSeen, json!({"url": url}), summary)
                    .await;
            }
        }
        if restocked {
            self.publish(
                product,
                obs,
                SignalType::InStock,
                json!({
                    "price": obs.price.map(|p| p.to_string()),
                    "url": obs.product_url,
                }),
                summary,
            )
            .await;
        }

        let snapshot = ProductAvailabilitySnapshot::from_observation(&product.id, obs);
        self.snapshots.upsert_snapshot(&snapshot).await?;
        summary.snapshots_written += 1;

        if let Some(price) = obs.price {
            let point = PricePoint::new(&product.id, &obs.backend_id, price, obs.original_price);
            self.prices.append_price(&point).await?;
        }

        if restocked {
            summary.restocks += 1;
            self.fan_out_restock(product, obs, summary).await;
        }
        Ok(())
    }

    async fn publish(
        &self,
        product: &TrackedProduct,
        obs: &AvailabilityObservation,
        signal_type: SignalType,
        value: serde_json::Value,
        summary: &mut PollCycleSummary,
    ) {
        let signal = NewDropSignal::new(
            &product.id,
            &obs.backend_id,
            signal_type,
            value,
            SIGNAL_SOURCE,
        );
        match self.publisher.publish(signal).await {
            Ok(PublishOutcome::Published(_)) => summary.signals_published += 1,
            Ok(PublishOutcome::Duplicate) => summary.signals_suppressed += 1,
            Err(e) => {
                tracing::warn!(
                    product = %product.id,
                    backend = %obs.backend_id,
                    signal_type = signal_type.as_str(),
                    error = %e,
                    "failed to publish signal"
                );
            }
        }
    }

    /// Notifies every active watch that matches the restocked backend.
    /// Failures are isolated per watch; one dead webhook never blocks the
    /// others.
    async fn fan_out_restock(
        &self,
        product: &TrackedProduct,
        obs: &AvailabilityObservation,
        summary: &mut PollCycleSummary,
    ) {
        let watches = match self.watches.active_watches_for_product(&product.id).await {
            Ok(watches) => watches,
            Err(e) => {
                tracing::warn!(product = %product.id, error = %e, "failed to load watches");
                return;
            }
        };

        let event = RestockEvent::new(product, obs);
        let matching: Vec<_> = watches
            .into_iter()
            .filter(|w| w.matches_backend(&obs.backend_id))
            .collect();
        let deliveries = matching.iter().map(|watch| self.notifier.notify(watch, &event));

        for (watch, outcome) in matching.iter().zip(join_all(deliveries).await) {
            match outcome {
                Ok(()) => summary.notifications_sent += 1,
                Err(e) => {
                    summary.notification_failures += 1;
                    tracing::warn!(
                        watch = %watch.id,
                        product = %product.id,
                        error = %e,
                        "restock notification failed"
                    );
                }
            }
        }
    }
}

/// Cron wrapper driving poll cycles.
pub struct PollScheduler {
    scheduler: JobScheduler,
    poller: Arc<AvailabilityPoller>,
}

impl PollScheduler {
    pub async fn start(poller: Arc<AvailabilityPoller>, cron: &str) -> Result<Self> {
        let scheduler = JobScheduler::new().await.map_err(scheduler_error)?;

        let job_poller = Arc::clone(&poller);
        let job = Job::new_async(cron, move |_uuid, _lock| {
            let poller = Arc::clone(&job_poller);
            Box::pin(async move {
                if let Err(e) = poller.run_cycle().await {
                    tracing::error!(error = %e, "poll cycle failed");
                }
            })
        })
        .map_err(scheduler_error)?;

        scheduler.add(job).await.map_err(scheduler_error)?;
        scheduler.start().await.map_err(scheduler_error)?;
        tracing::info!(cron, "poll scheduler started");
        Ok(Self { scheduler, poller })
    }

    /// Kicks off a cycle immediately, outside the cron cadence. Skipped (and
    /// `None`) when a scheduled cycle is already running.
    pub async fn run_now(&self) -> Result<Option<PollCycleSummary>> {
        self.poller.run_cycle().await
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.scheduler.shutdown().await.map_err(scheduler_error)
    }
}

fn scheduler_error(e: tokio_cron_scheduler::JobSchedulerError) -> AppError {
    AppError::Internal(format!("scheduler error: {}", e))
}
