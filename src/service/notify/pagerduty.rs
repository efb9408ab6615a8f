use super::{ChannelConfig, ChannelError, MonitorAlert, NotificationChannel};
use crate::service::monitor::MonitorSeverity;
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

const PAGERDUTY_EVENTS_URL: &str = "https://events.pagerduty.com/v2/enqueue";

/// Sends alerts to the PagerDuty Events API v2 with incident deduplication.
pub struct PagerDutyChannel {
    name: String,
    routing_key: String,
    http: reqwest::Client,
}

impl PagerDutyChannel {
    pub fn from_config(config: &ChannelConfig, http: reqwest::Client) -> Option<Self> {
        let routing_key = config.routing_key.as_deref()?.trim().to_owned();
        if routing_key.is_empty() {
            return None;
        }
        Some(Self {
            name: config.name.clone(),
            routing_key,
            http,
        })
    }
}

#[async_trait]
impl NotificationChannel for PagerDutyChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel_type(&self) -> &'static str {
        "pagerduty"
    }

    fn is_configured(&self) -> bool {
        !self.routing_key.is_empty()
    }

    async fn send(&self, alert: &MonitorAlert) -> Result<(), ChannelError> {
        let payload = build_pagerduty_payload(&self.routing_key, alert);

        let response = self
            .http
            .post(PAGERDUTY_EVENTS_URL)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChannelError::Rejected(status.as_u16()));
        }

        debug!(monitor = %alert.monitor_name, channel = %self.name, "sent PagerDuty notification");
        Ok(())
    }
}

pub(super) fn build_pagerduty_payload(routing_key: &str, alert: &MonitorAlert) -> serde_json::Value {
    // Group related alerts into one incident per (monitor, queue, env).
    let dedup_key = format!(
        "amq-monitor-{}-{}-{}",
        alert.monitor_name, alert.queue_name, alert.environment_name
    );

    let mut custom_details = json!({
        "monitor_name": alert.monitor_name,
        "queue_name": alert.queue_name,
        "environment": alert.environment_name,
        "region": alert.region,
        "current_value": alert.current_value,
        "threshold_value": alert.threshold_value,
        "message": alert.message,
    });
    if let Some(details) = custom_details.as_object_mut() {
        for (key, value) in &alert.metadata {
            details.insert(key.clone(), value.clone());
        }
    }

    json!({
        "routing_key": routing_key,
        "event_action": "trigger",
        "dedup_key": dedup_key,
        "payload": {
            "summary": alert.summary(),
            "source": "anypoint-mq-exporter",
            "severity": pagerduty_severity(alert.severity),
            "timestamp": alert.timestamp(),
            "component": "anypoint-mq",
            "group": alert.environment_name,
            "class": "queue-monitor",
            "custom_details": custom_details,
        },
    })
}

fn pagerduty_severity(severity: MonitorSeverity) -> &'static str {
    match severity {
        MonitorSeverity::Info => "info",
        MonitorSeverity::Warning => "warning",
        MonitorSeverity::Critical => "critical",
    }
}
