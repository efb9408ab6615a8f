mod email;
mod errors;
mod pagerduty;
mod slack;
mod teams;
mod webhook;

#[cfg(test)]
mod tests;

pub use errors::ChannelError;

use crate::service::metrics::ExporterMetrics;
use crate::service::monitor::{MonitorResult, MonitorSeverity};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

/// Configuration of one notification channel, from the monitors config file.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    pub name: String,

    #[serde(rename = "type")]
    pub channel_type: ChannelType,

    /// Incoming webhook URL for Slack and Teams channels.
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// PagerDuty Events API routing key.
    #[serde(default)]
    pub routing_key: Option<String>,

    /// Email recipient.
    #[serde(default)]
    pub to: Option<String>,

    /// Email sender.
    #[serde(default)]
    pub from: Option<String>,

    #[serde(default)]
    pub smtp_host: Option<String>,

    #[serde(default)]
    pub smtp_port: Option<u16>,

    /// Target URL for generic webhook channels.
    #[serde(default)]
    pub url: Option<String>,

    /// Extra headers for generic webhook channels.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Slack,
    Pagerduty,
    Email,
    Teams,
    Webhook,
}

/// Alert payload handed to notification channels, derived from a triggered
/// monitor result.
#[derive(Clone, Debug)]
pub struct MonitorAlert {
    pub monitor_name: String,
    pub severity: MonitorSeverity,
    pub message: String,
    pub queue_name: String,
    pub environment_name: String,
    pub region: String,
    pub current_value: f64,
    pub threshold_value: f64,
    pub triggered_at: OffsetDateTime,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl MonitorAlert {
    pub fn from_result(result: &MonitorResult) -> Self {
        Self {
            monitor_name: result.monitor_name.clone(),
            severity: result.severity.unwrap_or(MonitorSeverity::Warning),
            message: result.message.clone().unwrap_or_default(),
            queue_name: result.queue_name.clone(),
            environment_name: result.environment_name.clone(),
            region: result.region.clone(),
            current_value: result.current_value,
            threshold_value: result.threshold_value,
            triggered_at: result.evaluated_at,
            metadata: result.metadata.clone(),
        }
    }

    pub fn severity_color(&self) -> &'static str {
        match self.severity {
            MonitorSeverity::Info => "#36a64f",
            MonitorSeverity::Warning => "#ff9500",
            MonitorSeverity::Critical => "#ff0000",
        }
    }

    pub fn severity_emoji(&self) -> &'static str {
        match self.severity {
            MonitorSeverity::Info => "ℹ️",
            MonitorSeverity::Warning => "⚠️",
            MonitorSeverity::Critical => "🚨",
        }
    }

    pub fn title(&self) -> String {
        format!(
            "{} {} Alert: {}",
            self.severity_emoji(),
            self.severity,
            self.monitor_name
        )
    }

    pub fn summary(&self) -> String {
        format!(
            "[{}] {} in {}/{}: {}",
            self.severity, self.queue_name, self.environment_name, self.region, self.message
        )
    }

    pub fn timestamp(&self) -> String {
        self.triggered_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.triggered_at.to_string())
    }
}

/// Common behavior of every notification channel. The dispatcher depends
/// only on this trait.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    fn channel_type(&self) -> &'static str;

    /// Whether the channel's mandatory settings are present.
    fn is_configured(&self) -> bool;

    async fn send(&self, alert: &MonitorAlert) -> Result<(), ChannelError>;
}

/// Builds channel instances from configuration, skipping disabled and
/// misconfigured entries with a warning.
pub fn build_channels(
    configs: &[ChannelConfig],
    http: reqwest::Client,
) -> HashMap<String, Box<dyn NotificationChannel>> {
    let mut channels: HashMap<String, Box<dyn NotificationChannel>> = HashMap::new();

    for config in configs {
        if !config.enabled {
            debug!(channel = %config.name, "skipping disabled notification channel");
            continue;
        }

        let channel: Option<Box<dyn NotificationChannel>> = match config.channel_type {
            ChannelType::Slack => slack::SlackChannel::from_config(config, http.clone())
                .map(|channel| Box::new(channel) as Box<dyn NotificationChannel>),
            ChannelType::Teams => teams::TeamsChannel::from_config(config, http.clone())
                .map(|channel| Box::new(channel) as Box<dyn NotificationChannel>),
            ChannelType::Pagerduty => pagerduty::PagerDutyChannel::from_config(config, http.clone())
                .map(|channel| Box::new(channel) as Box<dyn NotificationChannel>),
            ChannelType::Webhook => webhook::WebhookChannel::from_config(config, http.clone())
                .map(|channel| Box::new(channel) as Box<dyn NotificationChannel>),
            ChannelType::Email => email::EmailChannel::from_config(config)
                .map(|channel| Box::new(channel) as Box<dyn NotificationChannel>),
        };

        match channel {
            Some(channel) => {
                info!(
                    channel = %config.name,
                    channel_type = channel.channel_type(),
                    "created notification channel"
                );
                channels.insert(config.name.clone(), channel);
            }
            None => {
                warn!(
                    channel = %config.name,
                    "notification channel is missing mandatory settings, excluded"
                );
            }
        }
    }

    info!(count = channels.len(), "initialized notification channels");
    channels
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DispatchOutcome {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Routes triggered monitor results to their configured channels. One
/// channel's failure never prevents delivery to its siblings.
pub struct NotificationDispatcher {
    channels: HashMap<String, Box<dyn NotificationChannel>>,
    metrics: Arc<ExporterMetrics>,
}

impl NotificationDispatcher {
    pub fn new(
        channels: HashMap<String, Box<dyn NotificationChannel>>,
        metrics: Arc<ExporterMetrics>,
    ) -> Self {
        Self { channels, metrics }
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    pub async fn dispatch(
        &self,
        channel_names: &[String],
        result: &MonitorResult,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        if !result.triggered {
            debug!(monitor = %result.monitor_name, "skipping notification for non-triggered result");
            return outcome;
        }
        if channel_names.is_empty() {
            debug!(monitor = %result.monitor_name, "no notification channels configured");
            return outcome;
        }

        let alert = MonitorAlert::from_result(result);

        for channel_name in channel_names {
            outcome.attempted += 1;

            let Some(channel) = self.channels.get(channel_name) else {
                warn!(
                    channel = %channel_name,
                    monitor = %result.monitor_name,
                    "notification channel not found"
                );
                outcome.failed += 1;
                self.record_failure(result, channel_name, "unknown", "channel_not_found");
                continue;
            };

            if !channel.is_configured() {
                warn!(channel = %channel_name, "notification channel is not properly configured");
                outcome.failed += 1;
                self.record_failure(
                    result,
                    channel_name,
                    channel.channel_type(),
                    ChannelError::NotConfigured.class(),
                );
                continue;
            }

            match channel.send(&alert).await {
                Ok(()) => {
                    outcome.delivered += 1;
                    self.metrics
                        .notifications_total
                        .with_label_values(&[
                            &result.monitor_name,
                            channel_name,
                            channel.channel_type(),
                            "success",
                        ])
                        .inc();
                    debug!(
                        monitor = %result.monitor_name,
                        channel = %channel_name,
                        "sent notification"
                    );
                }
                Err(err) => {
                    outcome.failed += 1;
                    self.record_failure(result, channel_name, channel.channel_type(), err.class());
                    error!(
                        monitor = %result.monitor_name,
                        channel = %channel_name,
                        %err,
                        "failed to send notification"
                    );
                }
            }
        }

        info!(
            monitor = %result.monitor_name,
            delivered = outcome.delivered,
            failed = outcome.failed,
            "notification dispatch completed"
        );
        outcome
    }

    fn record_failure(
        &self,
        result: &MonitorResult,
        channel_name: &str,
        channel_type: &str,
        error_class: &str,
    ) {
        self.metrics
            .notifications_total
            .with_label_values(&[&result.monitor_name, channel_name, channel_type, "fail"])
            .inc();
        self.metrics
            .notifications_failed_total
            .with_label_values(&[&result.monitor_name, channel_name, channel_type, error_class])
            .inc();
    }
}
