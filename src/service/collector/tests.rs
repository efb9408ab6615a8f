use super::*;
use crate::service::anypoint::types::QueueAttributes;
use crate::service::anypoint::{AnypointClient, AnypointConfig, HttpClientConfig, ManualEnvironment};
use crate::service::auth::AuthClient;
use serde_json::json;
use std::sync::Arc;
use time::ext::NumericalDuration;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mock_token_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/accounts/api/v2/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok",
            "token_type": "Bearer",
            "expires_in": 3600,
        })))
        .mount(server)
        .await;
}

/// Collector wired against a mock server, with manual environments so no
/// discovery calls happen.
fn collector_for(server: &MockServer, environments: Vec<ManualEnvironment>) -> Collector {
    let http = reqwest::Client::new();
    let mut config = AnypointConfig::new_test_config(Url::parse(&server.uri()).unwrap());
    config.auto_discovery = false;
    config.environments = environments;
    let regions = config.regions.clone();
    let config = Arc::new(config);
    let http_config = HttpClientConfig::new_test_config();
    let auth = Arc::new(AuthClient::new(
        http.clone(),
        config.clone(),
        http_config.clone(),
    ));
    let client = Arc::new(AnypointClient::new(
        http,
        config.clone(),
        http_config,
        auth,
    ));
    let discovery = Arc::new(crate::service::discovery::DiscoveryService::new(
        client.clone(),
        config,
    ));
    let metrics = Arc::new(crate::service::metrics::ExporterMetrics::new().unwrap());

    Collector::new(
        client,
        discovery,
        metrics,
        ScrapeConfig::new_test_config(),
        regions,
    )
}

fn env(id: &str, name: &str) -> ManualEnvironment {
    ManualEnvironment {
        id: id.to_owned(),
        name: name.to_owned(),
    }
}

fn destinations_path(env_id: &str) -> String {
    format!("/mq/admin/api/v1/organizations/org-1/environments/{env_id}/regions/us-east-1/destinations")
}

#[tokio::test]
async fn one_cycle_publishes_queue_gauges_and_the_stats_snapshot() {
    // arrange: one environment, one region, one queue with traffic
    let server = MockServer::start().await;
    mock_token_endpoint(&server).await;
    Mock::given(method("GET"))
        .and(path(destinations_path("e1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "queueId": "q1",
            "queueName": "orders",
            "type": "queue",
            "fifo": false,
            "maxDeliveries": 5,
            "defaultTtl": 60000,
        }])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(
            "/mq/stats/api/v1/organizations/org-1/environments/e1/regions/us-east-1/queues/q1",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messagesInQueue": [0, 0, 7],
            "messagesInFlight": [1],
            "messagesSent": [12],
            "messagesReceived": [10],
            "messagesAcked": [9],
        })))
        .mount(&server)
        .await;
    let collector = collector_for(&server, vec![env("e1", "Prod")]);

    // act
    collector.collect_once().await;

    // assert: gauges carry the decoded last samples
    let metrics = &collector.metrics;
    let labels = ["orders", "Prod", "us-east-1"];
    assert_eq!(
        metrics.queue_messages_in_queue.with_label_values(&labels).get(),
        7
    );
    assert_eq!(
        metrics.queue_messages_in_flight.with_label_values(&labels).get(),
        1
    );
    assert_eq!(
        metrics.queue_messages_sent.with_label_values(&labels).get(),
        12
    );
    assert_eq!(
        metrics.queue_messages_received.with_label_values(&labels).get(),
        10
    );
    assert_eq!(
        metrics.queue_messages_acked.with_label_values(&labels).get(),
        9
    );
    assert_eq!(
        metrics
            .queue_info
            .with_label_values(&["orders", "Prod", "us-east-1", "false", "false", "5", "60000"])
            .get(),
        1
    );
    assert!(metrics.last_scrape_timestamp_seconds.get() > 0);

    // ... and the snapshot handoff has the entry for the evaluator
    let snapshots = collector.current_queue_stats();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].stats.messages_in_queue, 7);
    assert_eq!(snapshots[0].environment_name, "Prod");

    // the rendered exposition carries the metric
    let rendered = metrics.render().unwrap();
    let in_queue_line = rendered
        .lines()
        .find(|line| line.starts_with("anypoint_mq_queue_messages_in_queue{"))
        .expect("gauge should be rendered");
    assert!(in_queue_line.contains("queue_name=\"orders\""));
    assert!(in_queue_line.contains("environment=\"Prod\""));
    assert!(in_queue_line.ends_with(" 7"));
}

#[tokio::test]
async fn a_failing_environment_does_not_stop_the_others() {
    // arrange: the middle environment's destination listing always fails
    let server = MockServer::start().await;
    mock_token_endpoint(&server).await;
    for env_id in ["e1", "e3"] {
        Mock::given(method("GET"))
            .and(path(destinations_path(env_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "queueId": format!("q-{env_id}"),
                "queueName": format!("queue-{env_id}"),
                "type": "queue",
            }])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!(
                "/mq/stats/api/v1/organizations/org-1/environments/{env_id}/regions/us-east-1/queues/q-{env_id}"
            )))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messagesInQueue": 1,
            })))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path(destinations_path("e2")))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let collector = collector_for(
        &server,
        vec![env("e1", "One"), env("e2", "Two"), env("e3", "Three")],
    );

    // act
    collector.collect_once().await;

    // assert: healthy environments published, the failing one is counted
    let metrics = &collector.metrics;
    assert_eq!(
        metrics
            .queue_messages_in_queue
            .with_label_values(&["queue-e1", "One", "us-east-1"])
            .get(),
        1
    );
    assert_eq!(
        metrics
            .queue_messages_in_queue
            .with_label_values(&["queue-e3", "Three", "us-east-1"])
            .get(),
        1
    );
    assert_eq!(
        metrics
            .scrape_errors_total
            .with_label_values(&["environment_failed"])
            .get(),
        1
    );
    assert!(metrics.last_scrape_timestamp_seconds.get() > 0);
}

#[tokio::test]
async fn stale_snapshot_entries_are_swept() {
    // arrange
    let server = MockServer::start().await;
    let collector = collector_for(&server, vec![env("e1", "Prod")]);
    let queue = QueueAttributes {
        id: "q1".to_owned(),
        name: Some("orders".to_owned()),
        fifo: false,
        default_ttl: None,
        default_lock_ttl: None,
        max_deliveries: None,
        dead_letter_queue_id: None,
        encrypted: false,
        environment_id: "e1".to_owned(),
        region: "us-east-1".to_owned(),
    };

    let fresh = QueueSnapshot {
        queue: queue.clone(),
        stats: Default::default(),
        environment_name: "Prod".to_owned(),
        collected_at: OffsetDateTime::now_utc(),
    };
    let stale = QueueSnapshot {
        collected_at: OffsetDateTime::now_utc() - 10.minutes(),
        ..fresh.clone()
    };

    collector.insert_snapshot(
        ("orders".to_owned(), "Prod".to_owned(), "us-east-1".to_owned()),
        fresh,
    );
    collector.insert_snapshot(
        ("old".to_owned(), "Prod".to_owned(), "us-east-1".to_owned()),
        stale,
    );

    // act: 10 minutes is past 3 * 60s scrape intervals
    collector.sweep_stale_now();

    // assert
    let remaining = collector.current_queue_stats();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].queue.sanitized_name(), "orders");
}
