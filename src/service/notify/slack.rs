use super::{ChannelConfig, ChannelError, MonitorAlert, NotificationChannel};
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

/// Posts alerts to a Slack incoming webhook with a color-coded attachment.
pub struct SlackChannel {
    name: String,
    webhook_url: String,
    http: reqwest::Client,
}

impl SlackChannel {
    pub fn from_config(config: &ChannelConfig, http: reqwest::Client) -> Option<Self> {
        let webhook_url = config.webhook_url.as_deref()?.trim().to_owned();
        if webhook_url.is_empty() {
            return None;
        }
        Some(Self {
            name: config.name.clone(),
            webhook_url,
            http,
        })
    }
}

#[async_trait]
impl NotificationChannel for SlackChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel_type(&self) -> &'static str {
        "slack"
    }

    fn is_configured(&self) -> bool {
        !self.webhook_url.is_empty()
    }

    async fn send(&self, alert: &MonitorAlert) -> Result<(), ChannelError> {
        let payload = build_slack_payload(alert);

        let response = self
            .http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChannelError::Rejected(status.as_u16()));
        }

        debug!(monitor = %alert.monitor_name, channel = %self.name, "sent Slack notification");
        Ok(())
    }
}

pub(super) fn build_slack_payload(alert: &MonitorAlert) -> serde_json::Value {
    json!({
        "text": alert.title(),
        "attachments": [{
            "color": alert.severity_color(),
            "title": format!("Queue: {}", alert.queue_name),
            "text": alert.message,
            "fields": [
                { "title": "Environment", "value": alert.environment_name, "short": true },
                { "title": "Region", "value": alert.region, "short": true },
                { "title": "Current Value", "value": format!("{:.1}", alert.current_value), "short": true },
                { "title": "Threshold", "value": format!("{:.1}", alert.threshold_value), "short": true },
                { "title": "Triggered At", "value": alert.timestamp(), "short": false },
            ],
            "footer": "Anypoint MQ Monitor",
            "ts": alert.triggered_at.unix_timestamp(),
        }],
    })
}
