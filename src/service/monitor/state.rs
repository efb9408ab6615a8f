use std::collections::VecDeque;
use time::ext::NumericalDuration;
use time::OffsetDateTime;

/// Maximum number of observations kept per (monitor, queue) state.
const MAX_PREVIOUS_VALUES: usize = 100;

/// Per-(monitor, queue, environment, region) evaluation state: trigger and
/// notification bookkeeping plus a bounded window of observed values with
/// cached baseline statistics.
#[derive(Clone, Debug, Default)]
pub struct MonitorState {
    last_triggered_at: Option<OffsetDateTime>,
    last_notified_at: Option<OffsetDateTime>,
    consecutive_triggered: u32,
    values: VecDeque<f64>,
    baseline_avg: Option<f64>,
    baseline_std_dev: Option<f64>,
}

impl MonitorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an observation, evicting the oldest once the window is full,
    /// and recomputes the baseline statistics.
    pub fn push_value(&mut self, value: f64) {
        self.values.push_back(value);
        while self.values.len() > MAX_PREVIOUS_VALUES {
            self.values.pop_front();
        }
        self.recalculate_baseline();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Mean over the full window, defined iff the window is non-empty.
    pub fn baseline_avg(&self) -> Option<f64> {
        self.baseline_avg
    }

    /// Population standard deviation over the full window.
    pub fn baseline_std_dev(&self) -> Option<f64> {
        self.baseline_std_dev
    }

    /// Mean of the most recent `window` observations.
    pub fn recent_average(&self, window: usize) -> Option<f64> {
        if self.values.is_empty() || window == 0 {
            return None;
        }
        let start = self.values.len().saturating_sub(window);
        let slice: Vec<f64> = self.values.iter().skip(start).copied().collect();
        Some(slice.iter().sum::<f64>() / slice.len() as f64)
    }

    pub fn percent_change_from_baseline(&self, current: f64) -> Option<f64> {
        let baseline = self.baseline_avg?;
        if baseline == 0.0 {
            return None;
        }
        Some((current - baseline) / baseline * 100.0)
    }

    /// Whether `current` deviates from the baseline by more than
    /// `sigma_threshold` standard deviations.
    pub fn is_outlier(&self, current: f64, sigma_threshold: f64) -> bool {
        match (self.baseline_avg, self.baseline_std_dev) {
            (Some(avg), Some(std_dev)) if std_dev > 0.0 => {
                ((current - avg) / std_dev).abs() > sigma_threshold
            }
            _ => false,
        }
    }

    pub fn mark_triggered(&mut self, now: OffsetDateTime) {
        self.last_triggered_at = Some(now);
        self.consecutive_triggered += 1;
    }

    pub fn reset_consecutive_triggers(&mut self) {
        self.consecutive_triggered = 0;
    }

    pub fn consecutive_triggered(&self) -> u32 {
        self.consecutive_triggered
    }

    pub fn last_triggered_at(&self) -> Option<OffsetDateTime> {
        self.last_triggered_at
    }

    pub fn mark_notified(&mut self, now: OffsetDateTime) {
        self.last_notified_at = Some(now);
    }

    pub fn last_notified_at(&self) -> Option<OffsetDateTime> {
        self.last_notified_at
    }

    /// Whether notifications are still suppressed at `now`.
    pub fn in_cooldown(&self, cooldown_minutes: u32, now: OffsetDateTime) -> bool {
        match self.last_notified_at {
            Some(notified_at) => now < notified_at + i64::from(cooldown_minutes).minutes(),
            None => false,
        }
    }

    fn recalculate_baseline(&mut self) {
        if self.values.is_empty() {
            self.baseline_avg = None;
            self.baseline_std_dev = None;
            return;
        }

        let count = self.values.len() as f64;
        let avg = self.values.iter().sum::<f64>() / count;
        let variance = self
            .values
            .iter()
            .map(|value| (value - avg).powi(2))
            .sum::<f64>()
            / count;

        self.baseline_avg = Some(avg);
        self.baseline_std_dev = Some(variance.sqrt());
    }
}
