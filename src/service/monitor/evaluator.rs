use super::state::MonitorState;
use super::{MonitorDefinition, MonitorSeverity, MonitorType};
use crate::service::collector::QueueSnapshot;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use time::OffsetDateTime;
use tracing::warn;

/// Identity of one evaluation state:
/// (monitor name, queue name, environment name, region).
pub type StateKey = (String, String, String, String);

/// Outcome of evaluating one monitor against one queue.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorResult {
    pub monitor_name: String,
    pub queue_name: String,
    pub environment_name: String,
    pub region: String,
    pub triggered: bool,
    pub current_value: f64,
    pub threshold_value: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<MonitorSeverity>,

    #[serde(with = "time::serde::rfc3339")]
    pub evaluated_at: OffsetDateTime,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl MonitorResult {
    #[allow(clippy::too_many_arguments)]
    pub fn triggered(
        monitor: &MonitorDefinition,
        queue_name: &str,
        environment_name: &str,
        region: &str,
        current_value: f64,
        message: String,
        evaluated_at: OffsetDateTime,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            monitor_name: monitor.name.clone(),
            queue_name: queue_name.to_owned(),
            environment_name: environment_name.to_owned(),
            region: region.to_owned(),
            triggered: true,
            current_value,
            threshold_value: monitor.threshold,
            message: Some(message),
            severity: Some(monitor.severity),
            evaluated_at,
            metadata,
        }
    }

    pub fn not_triggered(
        monitor: &MonitorDefinition,
        queue_name: &str,
        environment_name: &str,
        region: &str,
        current_value: f64,
        evaluated_at: OffsetDateTime,
    ) -> Self {
        Self {
            monitor_name: monitor.name.clone(),
            queue_name: queue_name.to_owned(),
            environment_name: environment_name.to_owned(),
            region: region.to_owned(),
            triggered: false,
            current_value,
            threshold_value: monitor.threshold,
            message: None,
            severity: Some(monitor.severity),
            evaluated_at,
            metadata: BTreeMap::new(),
        }
    }

    pub fn state_key(&self) -> StateKey {
        (
            self.monitor_name.clone(),
            self.queue_name.clone(),
            self.environment_name.clone(),
            self.region.clone(),
        )
    }
}

/// Core evaluation engine: matches monitor definitions against queue stats
/// and tracks per-queue state windows.
#[derive(Default)]
pub struct MonitorEvaluator {
    states: Mutex<HashMap<StateKey, MonitorState>>,
}

impl MonitorEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(
        &self,
        monitor: &MonitorDefinition,
        snapshot: &QueueSnapshot,
        now: OffsetDateTime,
    ) -> MonitorResult {
        let queue_name = snapshot.queue.sanitized_name();
        let key = (
            monitor.name.clone(),
            queue_name.clone(),
            snapshot.environment_name.clone(),
            snapshot.queue.region.clone(),
        );

        let mut states = self.states.lock();
        let state = states.entry(key).or_insert_with(MonitorState::new);

        match monitor.monitor_type {
            MonitorType::QueueDepth => evaluate_queue_depth(monitor, snapshot, &queue_name, state, now),
            MonitorType::DlqAlert => evaluate_dlq_alert(monitor, snapshot, &queue_name, state, now),
            MonitorType::ThroughputDrop => {
                evaluate_throughput_trend(monitor, snapshot, &queue_name, state, now, Trend::Drop)
            }
            MonitorType::ThroughputSpike => {
                evaluate_throughput_trend(monitor, snapshot, &queue_name, state, now, Trend::Spike)
            }
            MonitorType::QueueHealth => {
                evaluate_queue_health(monitor, snapshot, &queue_name, state, now)
            }
            MonitorType::Custom => {
                warn!(monitor = %monitor.name, "custom monitor type not implemented");
                MonitorResult::not_triggered(
                    monitor,
                    &queue_name,
                    &snapshot.environment_name,
                    &snapshot.queue.region,
                    0.0,
                    now,
                )
            }
        }
    }

    /// Cooldown gate: passes when the state has never notified or the
    /// cooldown has elapsed.
    pub fn should_notify(&self, key: &StateKey, cooldown_minutes: u32, now: OffsetDateTime) -> bool {
        let states = self.states.lock();
        match states.get(key) {
            Some(state) => !state.in_cooldown(cooldown_minutes, now),
            None => true,
        }
    }

    pub fn mark_notified(&self, key: &StateKey, now: OffsetDateTime) {
        let mut states = self.states.lock();
        if let Some(state) = states.get_mut(key) {
            state.mark_notified(now);
        }
    }

    pub fn clear_states(&self) {
        self.states.lock().clear();
    }

    #[cfg(test)]
    pub fn state(&self, key: &StateKey) -> Option<MonitorState> {
        self.states.lock().get(key).cloned()
    }
}

enum Trend {
    Drop,
    Spike,
}

fn evaluate_queue_depth(
    monitor: &MonitorDefinition,
    snapshot: &QueueSnapshot,
    queue_name: &str,
    state: &mut MonitorState,
    now: OffsetDateTime,
) -> MonitorResult {
    let current_depth = snapshot.stats.messages_in_queue;
    state.push_value(current_depth as f64);

    if monitor.condition.evaluate(current_depth as f64, monitor.threshold) {
        state.mark_triggered(now);
        let message = format!(
            "Queue depth {} {} threshold {:.0}",
            current_depth,
            monitor.condition.describe(),
            monitor.threshold
        );
        let metadata = BTreeMap::from([
            ("messagesInFlight".to_owned(), json!(snapshot.stats.messages_in_flight)),
            ("messagesSent".to_owned(), json!(snapshot.stats.messages_sent)),
            ("messagesReceived".to_owned(), json!(snapshot.stats.messages_received)),
        ]);
        MonitorResult::triggered(
            monitor,
            queue_name,
            &snapshot.environment_name,
            &snapshot.queue.region,
            current_depth as f64,
            message,
            now,
            metadata,
        )
    } else {
        state.reset_consecutive_triggers();
        MonitorResult::not_triggered(
            monitor,
            queue_name,
            &snapshot.environment_name,
            &snapshot.queue.region,
            current_depth as f64,
            now,
        )
    }
}

fn evaluate_dlq_alert(
    monitor: &MonitorDefinition,
    snapshot: &QueueSnapshot,
    queue_name: &str,
    state: &mut MonitorState,
    now: OffsetDateTime,
) -> MonitorResult {
    // Only meaningful for queues the heuristic classifies as DLQs.
    if !snapshot.queue.is_dead_letter_queue() {
        return MonitorResult::not_triggered(
            monitor,
            queue_name,
            &snapshot.environment_name,
            &snapshot.queue.region,
            0.0,
            now,
        );
    }

    let messages_in_dlq = snapshot.stats.messages_in_queue;
    state.push_value(messages_in_dlq as f64);

    if monitor.condition.evaluate(messages_in_dlq as f64, monitor.threshold) {
        state.mark_triggered(now);
        let message = format!("Dead letter queue has {messages_in_dlq} messages");
        let metadata = BTreeMap::from([
            ("isDlq".to_owned(), json!(true)),
            ("maxDeliveries".to_owned(), json!(snapshot.queue.max_deliveries)),
            ("totalMessages".to_owned(), json!(snapshot.stats.total_messages())),
        ]);
        MonitorResult::triggered(
            monitor,
            queue_name,
            &snapshot.environment_name,
            &snapshot.queue.region,
            messages_in_dlq as f64,
            message,
            now,
            metadata,
        )
    } else {
        state.reset_consecutive_triggers();
        MonitorResult::not_triggered(
            monitor,
            queue_name,
            &snapshot.environment_name,
            &snapshot.queue.region,
            messages_in_dlq as f64,
            now,
        )
    }
}

fn evaluate_throughput_trend(
    monitor: &MonitorDefinition,
    snapshot: &QueueSnapshot,
    queue_name: &str,
    state: &mut MonitorState,
    now: OffsetDateTime,
    trend: Trend,
) -> MonitorResult {
    let current_throughput = snapshot.stats.messages_received as f64;
    state.push_value(current_throughput);

    // Trend analysis needs history.
    if state.len() < 2 {
        return MonitorResult::not_triggered(
            monitor,
            queue_name,
            &snapshot.environment_name,
            &snapshot.queue.region,
            current_throughput,
            now,
        );
    }

    let window = monitor.evaluation_window_minutes.max(1) as usize;
    let trend_inputs = state.recent_average(window).and_then(|recent_avg| {
        let baseline_avg = state.baseline_avg()?;
        let percent_change = state.percent_change_from_baseline(recent_avg)?;
        Some((recent_avg, baseline_avg, percent_change))
    });
    let Some((recent_avg, baseline_avg, percent_change)) = trend_inputs else {
        return MonitorResult::not_triggered(
            monitor,
            queue_name,
            &snapshot.environment_name,
            &snapshot.queue.region,
            current_throughput,
            now,
        );
    };
    let triggered = match trend {
        // Negative thresholds for drops, positive for spikes.
        Trend::Drop => percent_change <= monitor.threshold,
        Trend::Spike => percent_change >= monitor.threshold,
    };

    if triggered {
        state.mark_triggered(now);
        let message = match trend {
            Trend::Drop => format!(
                "Throughput dropped by {:.1}% (current: {:.1}, baseline: {:.1})",
                percent_change.abs(),
                recent_avg,
                baseline_avg
            ),
            Trend::Spike => format!(
                "Throughput spiked by {:.1}% (current: {:.1}, baseline: {:.1})",
                percent_change, recent_avg, baseline_avg
            ),
        };
        let metadata = BTreeMap::from([
            ("percentChange".to_owned(), json!(percent_change)),
            ("recentAverage".to_owned(), json!(recent_avg)),
            ("baselineAverage".to_owned(), json!(baseline_avg)),
        ]);
        MonitorResult::triggered(
            monitor,
            queue_name,
            &snapshot.environment_name,
            &snapshot.queue.region,
            percent_change,
            message,
            now,
            metadata,
        )
    } else {
        state.reset_consecutive_triggers();
        MonitorResult::not_triggered(
            monitor,
            queue_name,
            &snapshot.environment_name,
            &snapshot.queue.region,
            percent_change,
            now,
        )
    }
}

fn evaluate_queue_health(
    monitor: &MonitorDefinition,
    snapshot: &QueueSnapshot,
    queue_name: &str,
    state: &mut MonitorState,
    now: OffsetDateTime,
) -> MonitorResult {
    let health_score = calculate_health_score(snapshot, state);
    state.push_value(health_score);

    if monitor.condition.evaluate(health_score, monitor.threshold) {
        state.mark_triggered(now);
        let message = format!(
            "Queue health score {:.1} {} threshold {:.1}",
            health_score,
            monitor.condition.describe(),
            monitor.threshold
        );
        let metadata = BTreeMap::from([
            ("healthScore".to_owned(), json!(health_score)),
            ("messagesInQueue".to_owned(), json!(snapshot.stats.messages_in_queue)),
            ("messagesInFlight".to_owned(), json!(snapshot.stats.messages_in_flight)),
            ("isDlq".to_owned(), json!(snapshot.queue.is_dead_letter_queue())),
        ]);
        MonitorResult::triggered(
            monitor,
            queue_name,
            &snapshot.environment_name,
            &snapshot.queue.region,
            health_score,
            message,
            now,
            metadata,
        )
    } else {
        state.reset_consecutive_triggers();
        let mut result = MonitorResult::not_triggered(
            monitor,
            queue_name,
            &snapshot.environment_name,
            &snapshot.queue.region,
            health_score,
            now,
        );
        // Health scores are surfaced through the API even when nothing
        // triggers.
        result
            .metadata
            .insert("healthScore".to_owned(), json!(health_score));
        result
    }
}

/// Composite health score in [0, 100], starting at 100 and penalizing depth,
/// DLQ backlog, consumer lag and throughput instability.
pub(super) fn calculate_health_score(snapshot: &QueueSnapshot, state: &MonitorState) -> f64 {
    let mut score = 100.0;

    let messages_in_queue = snapshot.stats.messages_in_queue;
    let messages_in_flight = snapshot.stats.messages_in_flight;
    let messages_received = snapshot.stats.messages_received;

    if messages_in_queue > 0 {
        let depth_penalty = ((messages_in_queue as f64 + 1.0).log10() * 5.0).min(20.0);
        score -= depth_penalty;
    }

    if snapshot.queue.is_dead_letter_queue() && messages_in_queue > 0 {
        score -= 30.0;
    }

    if messages_received > 0 {
        let lag_ratio = messages_in_flight as f64 / messages_received as f64;
        if lag_ratio > 0.1 {
            score -= (lag_ratio * 50.0).min(25.0);
        }
    }

    if let (Some(avg), Some(std_dev)) = (state.baseline_avg(), state.baseline_std_dev()) {
        if avg > 0.0 {
            let coefficient_of_variation = std_dev / avg;
            if coefficient_of_variation > 0.5 {
                score -= (coefficient_of_variation * 20.0).min(15.0);
            }
        }
    }

    score.clamp(0.0, 100.0)
}
