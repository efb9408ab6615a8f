use super::{ChannelConfig, ChannelError, MonitorAlert, NotificationChannel};
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

/// Generic webhook channel: HTTP POST of a JSON alert body with optional
/// custom headers.
pub struct WebhookChannel {
    name: String,
    url: String,
    headers: BTreeMap<String, String>,
    http: reqwest::Client,
}

impl WebhookChannel {
    pub fn from_config(config: &ChannelConfig, http: reqwest::Client) -> Option<Self> {
        // `url` is the canonical field; `webhookUrl` is accepted as an alias.
        let url = config
            .url
            .as_deref()
            .or(config.webhook_url.as_deref())?
            .trim()
            .to_owned();
        if url.is_empty() {
            return None;
        }
        Some(Self {
            name: config.name.clone(),
            url,
            headers: config.headers.clone(),
            http,
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel_type(&self) -> &'static str {
        "webhook"
    }

    fn is_configured(&self) -> bool {
        !self.url.is_empty()
    }

    async fn send(&self, alert: &MonitorAlert) -> Result<(), ChannelError> {
        let payload = build_webhook_payload(alert);

        let mut request = self.http.post(&self.url).json(&payload);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChannelError::Rejected(status.as_u16()));
        }

        debug!(monitor = %alert.monitor_name, channel = %self.name, "sent webhook notification");
        Ok(())
    }
}

pub(super) fn build_webhook_payload(alert: &MonitorAlert) -> serde_json::Value {
    let mut payload = json!({
        "alert_type": "anypoint_mq_monitor",
        "timestamp": alert.timestamp(),
        "source": "anypoint-mq-exporter",
        "monitor_name": alert.monitor_name,
        "severity": alert.severity.to_string(),
        "message": alert.message,
        "queue_name": alert.queue_name,
        "environment": alert.environment_name,
        "region": alert.region,
        "metrics": {
            "current_value": alert.current_value,
            "threshold_value": alert.threshold_value,
        },
    });

    if !alert.metadata.is_empty() {
        if let Some(body) = payload.as_object_mut() {
            body.insert("metadata".to_owned(), json!(alert.metadata));
        }
    }

    payload
}
