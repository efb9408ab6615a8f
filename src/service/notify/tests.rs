use super::pagerduty::build_pagerduty_payload;
use super::slack::build_slack_payload;
use super::teams::build_teams_payload;
use super::webhook::build_webhook_payload;
use super::*;
use crate::service::monitor::MonitorResult;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use time::macros::datetime;

fn triggered_result(severity: MonitorSeverity) -> MonitorResult {
    MonitorResult {
        monitor_name: "orders-depth".to_owned(),
        queue_name: "orders".to_owned(),
        environment_name: "Prod".to_owned(),
        region: "us-east-1".to_owned(),
        triggered: true,
        current_value: 1500.0,
        threshold_value: 1000.0,
        message: Some("Queue depth 1500 exceeds threshold 1000".to_owned()),
        severity: Some(severity),
        evaluated_at: datetime!(2025-06-01 12:00:00 UTC),
        metadata: BTreeMap::from([("messagesInFlight".to_owned(), json!(12))]),
    }
}

#[test]
fn alert_title_and_summary_include_identity() {
    let alert = MonitorAlert::from_result(&triggered_result(MonitorSeverity::Critical));

    assert_eq!(alert.title(), "🚨 CRITICAL Alert: orders-depth");
    assert_eq!(
        alert.summary(),
        "[CRITICAL] orders in Prod/us-east-1: Queue depth 1500 exceeds threshold 1000"
    );
    assert_eq!(alert.severity_color(), "#ff0000");
    assert_eq!(alert.timestamp(), "2025-06-01T12:00:00Z");
}

#[test]
fn slack_payload_has_color_coded_attachment_with_fields() {
    let alert = MonitorAlert::from_result(&triggered_result(MonitorSeverity::Warning));

    let payload = build_slack_payload(&alert);

    assert_eq!(payload["text"], "⚠️ WARNING Alert: orders-depth");
    let attachment = &payload["attachments"][0];
    assert_eq!(attachment["color"], "#ff9500");
    assert_eq!(attachment["title"], "Queue: orders");
    let fields = attachment["fields"].as_array().unwrap();
    assert_eq!(fields.len(), 5);
    assert_eq!(fields[0]["title"], "Environment");
    assert_eq!(fields[0]["value"], "Prod");
    assert_eq!(fields[1]["value"], "us-east-1");
    assert_eq!(fields[2]["value"], "1500.0");
    assert_eq!(fields[3]["value"], "1000.0");
}

#[test]
fn teams_payload_is_a_message_card_without_hash_color() {
    let alert = MonitorAlert::from_result(&triggered_result(MonitorSeverity::Info));

    let payload = build_teams_payload(&alert);

    assert_eq!(payload["@type"], "MessageCard");
    assert_eq!(payload["themeColor"], "36a64f");
    let facts = payload["sections"][0]["facts"].as_array().unwrap();
    assert_eq!(facts[0]["name"], "Queue Name");
    assert_eq!(facts[0]["value"], "orders");
    assert_eq!(facts[2]["value"], "INFO");
}

#[test]
fn pagerduty_payload_carries_dedup_key_and_mapped_severity() {
    let alert = MonitorAlert::from_result(&triggered_result(MonitorSeverity::Critical));

    let payload = build_pagerduty_payload("routing-key-1", &alert);

    assert_eq!(payload["routing_key"], "routing-key-1");
    assert_eq!(payload["event_action"], "trigger");
    assert_eq!(payload["dedup_key"], "amq-monitor-orders-depth-orders-Prod");
    assert_eq!(payload["payload"]["severity"], "critical");
    assert_eq!(payload["payload"]["group"], "Prod");
    // result metadata flows into custom details
    assert_eq!(
        payload["payload"]["custom_details"]["messagesInFlight"],
        json!(12)
    );
}

#[test]
fn webhook_payload_includes_metrics_and_metadata() {
    let alert = MonitorAlert::from_result(&triggered_result(MonitorSeverity::Warning));

    let payload = build_webhook_payload(&alert);

    assert_eq!(payload["alert_type"], "anypoint_mq_monitor");
    assert_eq!(payload["queue_name"], "orders");
    assert_eq!(payload["metrics"]["current_value"], 1500.0);
    assert_eq!(payload["metadata"]["messagesInFlight"], json!(12));
}

#[test]
fn misconfigured_channels_are_excluded_at_startup() {
    // arrange: a Slack channel without URL, a disabled one, and a good one
    let configs = vec![
        ChannelConfig {
            name: "broken".to_owned(),
            channel_type: ChannelType::Slack,
            webhook_url: Some("  ".to_owned()),
            routing_key: None,
            to: None,
            from: None,
            smtp_host: None,
            smtp_port: None,
            url: None,
            headers: BTreeMap::new(),
            enabled: true,
        },
        ChannelConfig {
            name: "disabled".to_owned(),
            channel_type: ChannelType::Webhook,
            webhook_url: None,
            routing_key: None,
            to: None,
            from: None,
            smtp_host: None,
            smtp_port: None,
            url: Some("http://example.com/hook".to_owned()),
            headers: BTreeMap::new(),
            enabled: false,
        },
        ChannelConfig {
            name: "good".to_owned(),
            channel_type: ChannelType::Pagerduty,
            webhook_url: None,
            routing_key: Some("rk".to_owned()),
            to: None,
            from: None,
            smtp_host: None,
            smtp_port: None,
            url: None,
            headers: BTreeMap::new(),
            enabled: true,
        },
    ];

    // act
    let channels = build_channels(&configs, reqwest::Client::new());

    // assert
    assert_eq!(channels.len(), 1);
    assert!(channels.contains_key("good"));
}

struct RecordingChannel {
    name: String,
    fail: bool,
    sent: AtomicUsize,
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel_type(&self) -> &'static str {
        "recording"
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn send(&self, _alert: &MonitorAlert) -> Result<(), ChannelError> {
        self.sent.fetch_add(1, Ordering::Relaxed);
        if self.fail {
            Err(ChannelError::Rejected(500))
        } else {
            Ok(())
        }
    }
}

fn recording(name: &str, fail: bool) -> Box<dyn NotificationChannel> {
    Box::new(RecordingChannel {
        name: name.to_owned(),
        fail,
        sent: AtomicUsize::new(0),
    })
}

#[tokio::test]
async fn one_failing_channel_does_not_block_its_siblings() {
    // arrange
    let metrics = Arc::new(crate::service::metrics::ExporterMetrics::new().unwrap());
    let channels = HashMap::from([
        ("failing".to_owned(), recording("failing", true)),
        ("working".to_owned(), recording("working", false)),
    ]);
    let dispatcher = NotificationDispatcher::new(channels, metrics.clone());
    let result = triggered_result(MonitorSeverity::Warning);

    // act
    let outcome = dispatcher
        .dispatch(
            &["failing".to_owned(), "working".to_owned(), "missing".to_owned()],
            &result,
        )
        .await;

    // assert
    assert_eq!(outcome.attempted, 3);
    assert_eq!(outcome.delivered, 1);
    assert_eq!(outcome.failed, 2);
    assert_eq!(
        metrics
            .notifications_total
            .with_label_values(&["orders-depth", "working", "recording", "success"])
            .get(),
        1
    );
    assert_eq!(
        metrics
            .notifications_failed_total
            .with_label_values(&["orders-depth", "failing", "recording", "rejected"])
            .get(),
        1
    );
    assert_eq!(
        metrics
            .notifications_failed_total
            .with_label_values(&["orders-depth", "missing", "unknown", "channel_not_found"])
            .get(),
        1
    );
}

#[tokio::test]
async fn non_triggered_results_are_not_dispatched() {
    // arrange
    let metrics = Arc::new(crate::service::metrics::ExporterMetrics::new().unwrap());
    let channels = HashMap::from([("working".to_owned(), recording("working", false))]);
    let dispatcher = NotificationDispatcher::new(channels, metrics);
    let mut result = triggered_result(MonitorSeverity::Warning);
    result.triggered = false;

    // act
    let outcome = dispatcher.dispatch(&["working".to_owned()], &result).await;

    // assert
    assert_eq!(outcome.attempted, 0);
    assert_eq!(outcome.delivered, 0);
}
