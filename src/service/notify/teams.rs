use super::{ChannelConfig, ChannelError, MonitorAlert, NotificationChannel};
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

/// Posts alerts to a Microsoft Teams incoming webhook as a MessageCard.
pub struct TeamsChannel {
    name: String,
    webhook_url: String,
    http: reqwest::Client,
}

impl TeamsChannel {
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
impl NotificationChannel for TeamsChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel_type(&self) -> &'static str {
        "teams"
    }

    fn is_configured(&self) -> bool {
        !self.webhook_url.is_empty()
    }

    async fn send(&self, alert: &MonitorAlert) -> Result<(), ChannelError> {
        let payload = build_teams_payload(alert);

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

        debug!(monitor = %alert.monitor_name, channel = %self.name, "sent Teams notification");
        Ok(())
    }
}

pub(super) fn build_teams_payload(alert: &MonitorAlert) -> serde_json::Value {
    // MessageCard theme colors carry no leading '#'.
    let theme_color = alert.severity_color().trim_start_matches('#');

    json!({
        "@type": "MessageCard",
        "@context": "http://schema.org/extensions",
        "themeColor": theme_color,
        "summary": alert.summary(),
        "title": alert.title(),
        "text": alert.message,
        "sections": [{
            "activityTitle": "Queue Monitor Alert",
            "activitySubtitle": format!(
                "Environment: {} | Region: {}",
                alert.environment_name, alert.region
            ),
            "facts": [
                { "name": "Queue Name", "value": alert.queue_name },
                { "name": "Monitor", "value": alert.monitor_name },
                { "name": "Severity", "value": alert.severity.to_string() },
                { "name": "Current Value", "value": format!("{:.1}", alert.current_value) },
                { "name": "Threshold", "value": format!("{:.1}", alert.threshold_value) },
                { "name": "Triggered At", "value": alert.timestamp() },
            ],
        }],
    })
}
