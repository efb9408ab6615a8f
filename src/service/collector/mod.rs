#[cfg(test)]
mod tests;

use crate::service::anypoint::types::{
    ExchangeAttributes, ExchangeStats, QueueAttributes, QueueStats,
};
use crate::service::anypoint::{AnypointClient, ApiError};
use crate::service::discovery::{DiscoveryService, EnvironmentRef, Snapshot};
use crate::service::metrics::ExporterMetrics;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(clap::Args, Clone, Debug)]
pub struct ScrapeConfig {
    /// Interval between scrapes in seconds.
    #[clap(
        long,
        env = "SCRAPE_INTERVAL_SECONDS",
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(10..),
        help_heading = "Scrape options"
    )]
    pub scrape_interval_seconds: u64,

    /// Stats window in seconds (how far back each stats query looks).
    #[clap(
        long,
        env = "SCRAPE_PERIOD_SECONDS",
        default_value_t = 600,
        value_parser = clap::value_parser!(u64).range(300..),
        help_heading = "Scrape options"
    )]
    pub scrape_period_seconds: u64,

    /// Whether metrics collection runs at all.
    #[clap(
        long,
        env = "SCRAPE_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set,
        help_heading = "Scrape options"
    )]
    pub scrape_enabled: bool,

    /// Maximum concurrent stats fetches per destination kind.
    #[clap(
        long,
        env = "SCRAPE_CONCURRENCY",
        default_value_t = 8,
        value_parser = clap::value_parser!(u64).range(1..),
        help_heading = "Scrape options"
    )]
    pub scrape_concurrency: u64,
}

#[cfg(test)]
impl ScrapeConfig {
    pub fn new_test_config() -> Self {
        Self {
            scrape_interval_seconds: 60,
            scrape_period_seconds: 600,
            scrape_enabled: true,
            scrape_concurrency: 4,
        }
    }
}

/// Key into the current-stats map: (queue name, environment name, region).
pub type StatsKey = (String, String, String);

/// The latest stats observed for one queue, handed off to the monitor
/// evaluator.
#[derive(Clone, Debug)]
pub struct QueueSnapshot {
    pub queue: QueueAttributes,
    pub stats: QueueStats,
    pub environment_name: String,
    pub collected_at: OffsetDateTime,
}

/// Scheduled metrics collection over every (environment, region, destination)
/// tuple known to discovery.
pub struct Collector {
    client: Arc<AnypointClient>,
    discovery: Arc<DiscoveryService>,
    metrics: Arc<ExporterMetrics>,
    config: ScrapeConfig,
    regions: Vec<String>,
    current_queue_stats: DashMap<StatsKey, QueueSnapshot>,
}

impl Collector {
    pub fn new(
        client: Arc<AnypointClient>,
        discovery: Arc<DiscoveryService>,
        metrics: Arc<ExporterMetrics>,
        config: ScrapeConfig,
        regions: Vec<String>,
    ) -> Self {
        Self {
            client,
            discovery,
            metrics,
            config,
            regions,
            current_queue_stats: DashMap::new(),
        }
    }

    /// Read-only view of the latest per-queue stats for the evaluator and
    /// the health-score endpoints.
    pub fn current_queue_stats(&self) -> Vec<QueueSnapshot> {
        self.current_queue_stats
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Fixed-delay collection loop: the next cycle starts one interval after
    /// the previous one finished, so slow cycles never overlap themselves.
    pub async fn run(&self, shutdown: CancellationToken) {
        if !self.config.scrape_enabled {
            info!("metrics collection is disabled");
            return;
        }

        let interval = Duration::from_secs(self.config.scrape_interval_seconds);
        loop {
            self.collect_once().await;

            select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// One full collection pass. Always records its duration; only updates
    /// the last-scrape timestamp when at least one (environment, region)
    /// tuple succeeded (or there was nothing to do).
    #[instrument(skip(self))]
    pub async fn collect_once(&self) {
        let started = Instant::now();
        let snapshot = self.discovery.snapshot();

        let pairs: Vec<(&EnvironmentRef, &str)> = snapshot
            .environments
            .iter()
            .flat_map(|env| self.regions.iter().map(move |region| (env, region.as_str())))
            .collect();

        let failed = AtomicUsize::new(0);
        let failed_ref = &failed;
        let snapshot_ref = &snapshot;
        stream::iter(&pairs)
            .for_each_concurrent(4, |&(environment, region)| async move {
                if !self
                    .collect_environment_region(snapshot_ref, environment, region)
                    .await
                {
                    failed_ref.fetch_add(1, Ordering::Relaxed);
                }
            })
            .await;

        self.sweep_stale();

        let failed = failed.load(Ordering::Relaxed);
        self.metrics
            .scrape_duration_seconds
            .observe(started.elapsed().as_secs_f64());

        if pairs.is_empty() || failed < pairs.len() {
            self.metrics
                .last_scrape_timestamp_seconds
                .set(OffsetDateTime::now_utc().unix_timestamp());
            info!(
                environments = snapshot.environments.len(),
                failed_tuples = failed,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "metrics collection completed"
            );
        } else {
            warn!(
                failed_tuples = failed,
                "metrics collection failed for every environment/region tuple"
            );
        }
    }

    /// Collects one (environment, region) tuple; queue and exchange sides run
    /// concurrently. Returns false when the tuple produced nothing but
    /// errors.
    async fn collect_environment_region(
        &self,
        snapshot: &Snapshot,
        environment: &EnvironmentRef,
        region: &str,
    ) -> bool {
        debug!(
            environment = %environment.name,
            region,
            "collecting metrics for environment/region"
        );

        let organization_id = if environment.organization_id.is_empty() {
            snapshot.primary_organization_id.as_deref().unwrap_or_default()
        } else {
            &environment.organization_id
        };

        let (queues, exchanges) = tokio::join!(
            self.collect_queue_metrics(organization_id, environment, region),
            self.collect_exchange_metrics(organization_id, environment, region),
        );

        if queues.is_err() || exchanges.is_err() {
            self.metrics.scrape_error("environment_failed");
            warn!(
                environment = %environment.name,
                region,
                "failed to collect metrics for environment/region"
            );
            return false;
        }
        true
    }

    async fn collect_queue_metrics(
        &self,
        organization_id: &str,
        environment: &EnvironmentRef,
        region: &str,
    ) -> Result<(), ApiError> {
        let queues = match self
            .client
            .list_queues(organization_id, &environment.id, region)
            .await
        {
            Ok(queues) => queues,
            Err(err) => {
                self.metrics.scrape_error("queue_list_failed");
                warn!(
                    environment = %environment.name,
                    region,
                    %err,
                    "failed to list queues"
                );
                return Err(err);
            }
        };

        stream::iter(queues)
            .for_each_concurrent(self.config.scrape_concurrency as usize, |queue| async move {
                match self
                    .client
                    .queue_stats(
                        organization_id,
                        &environment.id,
                        region,
                        &queue.id,
                        self.config.scrape_period_seconds,
                    )
                    .await
                {
                    Ok(stats) => self.publish_queue(queue, stats, &environment.name),
                    Err(ApiError::NotFound) => {
                        self.metrics.scrape_error("queue_stats_failed");
                        debug!(queue = %queue.display_name(), "queue vanished before stats fetch");
                    }
                    Err(err) => {
                        self.metrics.scrape_error("queue_stats_failed");
                        warn!(queue = %queue.display_name(), %err, "failed to collect queue stats");
                    }
                }
            })
            .await;

        Ok(())
    }

    async fn collect_exchange_metrics(
        &self,
        organization_id: &str,
        environment: &EnvironmentRef,
        region: &str,
    ) -> Result<(), ApiError> {
        let exchanges = match self
            .client
            .list_exchanges(organization_id, &environment.id, region)
            .await
        {
            Ok(exchanges) => exchanges,
            Err(err) => {
                self.metrics.scrape_error("exchange_list_failed");
                warn!(
                    environment = %environment.name,
                    region,
                    %err,
                    "failed to list exchanges"
                );
                return Err(err);
            }
        };

        stream::iter(exchanges)
            .for_each_concurrent(self.config.scrape_concurrency as usize, |exchange| async move {
                match self
                    .client
                    .exchange_stats(
                        organization_id,
                        &environment.id,
                        region,
                        &exchange.id,
                        self.config.scrape_period_seconds,
                    )
                    .await
                {
                    Ok(stats) => self.publish_exchange(&exchange, &stats, &environment.name),
                    Err(ApiError::NotFound) => {
                        self.metrics.scrape_error("exchange_stats_failed");
                        debug!(
                            exchange = %exchange.display_name(),
                            "exchange vanished before stats fetch"
                        );
                    }
                    Err(err) => {
                        self.metrics.scrape_error("exchange_stats_failed");
                        warn!(
                            exchange = %exchange.display_name(),
                            %err,
                            "failed to collect exchange stats"
                        );
                    }
                }
            })
            .await;

        Ok(())
    }

    fn publish_queue(&self, queue: QueueAttributes, stats: QueueStats, environment_name: &str) {
        let queue_name = queue.sanitized_name();
        let labels = [queue_name.as_str(), environment_name, &queue.region];

        self.metrics
            .queue_messages_in_queue
            .with_label_values(&labels)
            .set(stats.messages_in_queue);
        self.metrics
            .queue_messages_in_flight
            .with_label_values(&labels)
            .set(stats.messages_in_flight);
        self.metrics
            .queue_messages_sent
            .with_label_values(&labels)
            .set(stats.messages_sent);
        self.metrics
            .queue_messages_received
            .with_label_values(&labels)
            .set(stats.messages_received);
        self.metrics
            .queue_messages_acked
            .with_label_values(&labels)
            .set(stats.messages_acked);

        if let Some(queue_size) = stats.queue_size {
            self.metrics
                .queue_size_bytes
                .with_label_values(&labels)
                .set(queue_size);
        }

        self.metrics
            .queue_info
            .with_label_values(&[
                &queue_name,
                environment_name,
                &queue.region,
                &queue.fifo.to_string(),
                &queue.is_dead_letter_queue().to_string(),
                &queue.max_deliveries.unwrap_or(0).to_string(),
                &queue.default_ttl.unwrap_or(0).to_string(),
            ])
            .set(1);

        debug!(
            queue = %queue_name,
            in_queue = stats.messages_in_queue,
            in_flight = stats.messages_in_flight,
            sent = stats.messages_sent,
            received = stats.messages_received,
            acked = stats.messages_acked,
            has_dlq = queue.has_dead_letter_queue(),
            "updated queue metrics"
        );

        let key = (
            queue_name,
            environment_name.to_owned(),
            queue.region.clone(),
        );
        self.current_queue_stats.insert(
            key,
            QueueSnapshot {
                queue,
                stats,
                environment_name: environment_name.to_owned(),
                collected_at: OffsetDateTime::now_utc(),
            },
        );
    }

    fn publish_exchange(
        &self,
        exchange: &ExchangeAttributes,
        stats: &ExchangeStats,
        environment_name: &str,
    ) {
        let exchange_name = exchange.sanitized_name();
        let labels = [exchange_name.as_str(), environment_name, &exchange.region];

        self.metrics
            .exchange_messages_published
            .with_label_values(&labels)
            .set(stats.messages_published);
        self.metrics
            .exchange_messages_delivered
            .with_label_values(&labels)
            .set(stats.messages_delivered);

        debug!(
            exchange = %exchange_name,
            published = stats.messages_published,
            delivered = stats.messages_delivered,
            "updated exchange metrics"
        );
    }

    #[cfg(test)]
    pub fn insert_snapshot(&self, key: StatsKey, snapshot: QueueSnapshot) {
        self.current_queue_stats.insert(key, snapshot);
    }

    #[cfg(test)]
    pub fn sweep_stale_now(&self) {
        self.sweep_stale();
    }

    /// Drops stats entries not refreshed for more than three scrape
    /// intervals. Destinations deleted upstream therefore stop feeding the
    /// monitors after a bounded delay.
    fn sweep_stale(&self) {
        let cutoff = OffsetDateTime::now_utc()
            - Duration::from_secs(3 * self.config.scrape_interval_seconds);
        self.current_queue_stats
            .retain(|_, snapshot| snapshot.collected_at >= cutoff);
    }
}
