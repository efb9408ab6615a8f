use super::evaluator::{MonitorEvaluator, MonitorResult};
use super::{MonitorDefinition, MonitorRunnerConfig, MonitorsFile};
use crate::service::collector::Collector;
use crate::service::license::LicenseService;
use crate::service::metrics::ExporterMetrics;
use crate::service::notify::NotificationDispatcher;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Scheduled monitor runner: evaluates every enabled definition against the
/// collector's latest stats, publishes monitor metrics and pushes triggered
/// results through the cooldown gate into the dispatcher.
pub struct MonitorRunner {
    config: MonitorRunnerConfig,
    monitors: MonitorsFile,
    evaluator: MonitorEvaluator,
    dispatcher: Arc<NotificationDispatcher>,
    license: Arc<LicenseService>,
    collector: Arc<Collector>,
    metrics: Arc<ExporterMetrics>,
    latest_results: RwLock<HashMap<String, MonitorResult>>,
}

impl MonitorRunner {
    pub fn new(
        config: MonitorRunnerConfig,
        monitors: MonitorsFile,
        dispatcher: Arc<NotificationDispatcher>,
        license: Arc<LicenseService>,
        collector: Arc<Collector>,
        metrics: Arc<ExporterMetrics>,
    ) -> Self {
        info!(
            definitions = monitors.definitions.len(),
            "monitor runner initialized"
        );
        Self {
            config,
            monitors,
            evaluator: MonitorEvaluator::new(),
            dispatcher,
            license,
            collector,
            metrics,
            latest_results: RwLock::new(HashMap::new()),
        }
    }

    pub fn definitions(&self) -> &[MonitorDefinition] {
        &self.monitors.definitions
    }

    pub fn find_definition(&self, name: &str) -> Option<&MonitorDefinition> {
        self.monitors.find_definition(name)
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    pub fn evaluation_interval_seconds(&self) -> u64 {
        self.config.monitors_evaluation_interval_seconds
    }

    /// Latest evaluation results keyed by `monitor:queue:environment:region`.
    pub fn current_status(&self) -> HashMap<String, MonitorResult> {
        self.latest_results.read().clone()
    }

    /// Fixed-delay evaluation loop.
    pub async fn run(&self, shutdown: CancellationToken) {
        let interval = Duration::from_secs(self.config.monitors_evaluation_interval_seconds);
        loop {
            self.evaluate_all().await;

            select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn evaluate_all(&self) {
        if !self.license.monitors_enabled() {
            debug!("no valid license for the monitors feature, skipping evaluation");
            return;
        }

        let snapshots = self.collector.current_queue_stats();
        let now = OffsetDateTime::now_utc();

        let mut evaluated = 0usize;
        let mut triggered = 0usize;
        let mut notifications_sent = 0usize;

        for definition in self.monitors.enabled_definitions() {
            for snapshot in snapshots
                .iter()
                .filter(|snapshot| definition.matches_queue(&snapshot.queue.sanitized_name()))
            {
                let result = self.evaluator.evaluate(definition, snapshot, now);
                evaluated += 1;
                self.metrics.monitor_evaluations_total.inc();
                self.update_monitor_metrics(&result, now);

                if result.triggered {
                    triggered += 1;

                    let key = result.state_key();
                    if self
                        .evaluator
                        .should_notify(&key, definition.cooldown_minutes(), now)
                    {
                        let outcome = self
                            .dispatcher
                            .dispatch(&definition.notifications, &result)
                            .await;
                        // A dispatch that reached no channel at all still
                        // closes the cooldown window, as does any delivery.
                        if outcome.attempted == 0 || outcome.delivered > 0 {
                            self.evaluator.mark_notified(&key, now);
                        }
                        if outcome.delivered > 0 {
                            notifications_sent += 1;
                        }
                    } else {
                        debug!(
                            monitor = %result.monitor_name,
                            queue = %result.queue_name,
                            "suppressing notification during cooldown"
                        );
                    }
                }

                let status_key = format!(
                    "{}:{}:{}:{}",
                    result.monitor_name, result.queue_name, result.environment_name, result.region
                );
                self.latest_results.write().insert(status_key, result);
            }
        }

        info!(
            evaluated,
            triggered, notifications_sent, "monitor evaluation completed"
        );
    }

    fn update_monitor_metrics(&self, result: &MonitorResult, now: OffsetDateTime) {
        let severity = result
            .severity
            .map(|severity| severity.to_string())
            .unwrap_or_else(|| "UNKNOWN".to_owned());

        self.metrics
            .monitor_triggered
            .with_label_values(&[
                &result.monitor_name,
                &result.queue_name,
                &result.environment_name,
                &result.region,
                &severity,
            ])
            .set(i64::from(result.triggered));

        if result.triggered {
            self.metrics
                .monitor_last_triggered_timestamp
                .with_label_values(&[&result.monitor_name])
                .set(now.unix_timestamp());
        }

        // Health scores are exposed in the 0-1 range.
        if let Some(score) = result
            .metadata
            .get("healthScore")
            .and_then(serde_json::Value::as_f64)
        {
            self.metrics
                .queue_health_score
                .with_label_values(&[
                    &result.queue_name,
                    &result.environment_name,
                    &result.region,
                ])
                .set(score / 100.0);
        }
    }
}
