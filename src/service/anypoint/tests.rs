use super::types::*;
use super::*;
use crate::service::auth::AuthClient;
use serde_json::json;
use std::sync::Arc;
use time::macros::datetime;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn parse_queue_stats(value: serde_json::Value) -> QueueStats {
    serde_json::from_value(value).expect("queue stats should deserialize")
}

#[test]
fn queue_stats_array_values_reduce_to_last_element() {
    // arrange
    let value = json!({
        "messagesInQueue": [0, 0, 7],
        "messagesInFlight": [1],
        "messagesSent": [12],
        "messagesReceived": [10],
        "messagesAcked": [9],
    });

    // act
    let stats = parse_queue_stats(value);

    // assert
    assert_eq!(stats.messages_in_queue, 7);
    assert_eq!(stats.messages_in_flight, 1);
    assert_eq!(stats.messages_sent, 12);
    assert_eq!(stats.messages_received, 10);
    assert_eq!(stats.messages_acked, 9);
}

#[test]
fn queue_stats_scalar_values_are_accepted() {
    let stats = parse_queue_stats(json!({ "messagesInQueue": 7 }));

    assert_eq!(stats.messages_in_queue, 7);
}

#[test]
fn queue_stats_empty_null_and_missing_default_to_zero() {
    let stats = parse_queue_stats(json!({
        "messagesInQueue": [],
        "messagesInFlight": null,
    }));

    assert_eq!(stats.messages_in_queue, 0);
    assert_eq!(stats.messages_in_flight, 0);
    assert_eq!(stats.messages_sent, 0);
}

#[test]
fn queue_size_stays_absent_when_not_reported() {
    let stats = parse_queue_stats(json!({ "queueSize": [] }));

    assert_eq!(stats.queue_size, None);

    let stats = parse_queue_stats(json!({ "queueSize": [128.0, 256.0] }));

    assert_eq!(stats.queue_size, Some(256.0));
}

#[test]
fn exchange_stats_mixed_shapes_decode() {
    // First sibling: array + scalar. Second: empty array + null.
    let first: ExchangeStats =
        serde_json::from_value(json!({ "messagesPublished": [5, 9], "messagesDelivered": 9 }))
            .expect("exchange stats should deserialize");
    let second: ExchangeStats =
        serde_json::from_value(json!({ "messagesPublished": [], "messagesDelivered": null }))
            .expect("exchange stats should deserialize");

    assert_eq!(first.messages_published, 9);
    assert_eq!(first.messages_delivered, 9);
    assert_eq!(second.messages_published, 0);
    assert_eq!(second.messages_delivered, 0);
}

#[test]
fn sanitize_label_replaces_and_is_idempotent() {
    assert_eq!(sanitize_label("orders.v2/main"), "orders_v2_main");
    assert_eq!(
        sanitize_label(&sanitize_label("orders.v2/main")),
        "orders_v2_main"
    );
    assert_eq!(sanitize_label("already_fine-123"), "already_fine-123");
    assert_eq!(sanitize_label(""), "unknown");
}

fn queue_named(name: &str) -> QueueAttributes {
    QueueAttributes {
        id: "q1".to_owned(),
        name: Some(name.to_owned()),
        fifo: false,
        default_ttl: None,
        default_lock_ttl: None,
        max_deliveries: None,
        dead_letter_queue_id: None,
        encrypted: false,
        environment_id: "e1".to_owned(),
        region: "us-east-1".to_owned(),
    }
}

#[test]
fn dlq_heuristic_matches_known_name_shapes() {
    assert!(queue_named("orders-dlq").is_dead_letter_queue());
    assert!(queue_named("ORDERS-DLQ").is_dead_letter_queue());
    assert!(queue_named("orders-dead-letter").is_dead_letter_queue());
    assert!(queue_named("ordersdeadletter").is_dead_letter_queue());
    assert!(queue_named("orders-dead").is_dead_letter_queue());
    assert!(queue_named("orders-dl").is_dead_letter_queue());

    assert!(!queue_named("orders").is_dead_letter_queue());
    assert!(!queue_named("deadline-queue").is_dead_letter_queue());
}

#[test]
fn dlq_pointer_does_not_classify() {
    let mut queue = queue_named("orders");
    queue.dead_letter_queue_id = Some("orders-dlq-id".to_owned());

    assert!(queue.has_dead_letter_queue());
    assert!(!queue.is_dead_letter_queue());
}

#[test]
fn queue_name_falls_back_to_id() {
    let mut queue = queue_named("orders");
    queue.name = None;

    assert_eq!(queue.sanitized_name(), "q1");
}

#[test]
fn destination_records_partition_by_kind() {
    // arrange
    let records: Vec<DestinationRecord> = serde_json::from_value(json!([
        { "queueId": "q1", "queueName": "orders", "type": "queue", "fifo": true },
        { "exchangeId": "x1", "exchangeName": "events", "type": "exchange" },
        { "type": "queue" },
    ]))
    .expect("records should deserialize");

    // act
    let destinations: Vec<Destination> = records
        .into_iter()
        .filter_map(|record| record.into_destination("e1", "us-east-1"))
        .collect();

    // assert
    assert_eq!(destinations.len(), 2);
    match &destinations[0] {
        Destination::Queue(queue) => {
            assert_eq!(queue.id, "q1");
            assert!(queue.fifo);
            assert_eq!(queue.environment_id, "e1");
            assert_eq!(queue.region, "us-east-1");
        }
        Destination::Exchange(_) => panic!("expected a queue"),
    }
    match &destinations[1] {
        Destination::Exchange(exchange) => assert_eq!(exchange.id, "x1"),
        Destination::Queue(_) => panic!("expected an exchange"),
    }
}

#[test]
fn stats_dates_use_millisecond_utc_format() {
    let formatted = format_stats_date(datetime!(2025-01-01 00:00:00 UTC))
        .expect("timestamp should format");

    assert_eq!(formatted, "2025-01-01T00:00:00.000Z");
}

#[test]
fn retryability_follows_status_classes() {
    assert!(ApiError::Transport("timed out".to_owned()).is_retryable());
    assert!(ApiError::Upstream { status: 500, operation: "x" }.is_retryable());
    assert!(ApiError::Upstream { status: 429, operation: "x" }.is_retryable());

    assert!(!ApiError::Upstream { status: 400, operation: "x" }.is_retryable());
    assert!(!ApiError::AuthFailed { status: 401 }.is_retryable());
    assert!(!ApiError::NotFound.is_retryable());
}

async fn mock_token_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/accounts/api/v2/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-token",
            "token_type": "Bearer",
            "expires_in": 3600,
        })))
        .mount(server)
        .await;
}

fn client_for(server: &MockServer) -> AnypointClient {
    let http = reqwest::Client::new();
    let config = Arc::new(AnypointConfig::new_test_config(
        url::Url::parse(&server.uri()).unwrap(),
    ));
    let http_config = HttpClientConfig::new_test_config();
    let auth = Arc::new(AuthClient::new(
        http.clone(),
        config.clone(),
        http_config.clone(),
    ));
    AnypointClient::new(http, config, http_config, auth)
}

#[tokio::test]
async fn list_destinations_attaches_environment_and_region() {
    // arrange
    let server = MockServer::start().await;
    mock_token_endpoint(&server).await;
    Mock::given(method("GET"))
        .and(path(
            "/mq/admin/api/v1/organizations/org-1/environments/e1/regions/us-east-1/destinations",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "queueId": "q1", "queueName": "orders", "type": "queue" },
            { "exchangeId": "x1", "exchangeName": "events", "type": "exchange" },
        ])))
        .mount(&server)
        .await;
    let client = client_for(&server);

    // act
    let queues = client.list_queues("org-1", "e1", "us-east-1").await.unwrap();
    let exchanges = client
        .list_exchanges("org-1", "e1", "us-east-1")
        .await
        .unwrap();

    // assert
    assert_eq!(queues.len(), 1);
    assert_eq!(queues[0].id, "q1");
    assert_eq!(queues[0].environment_id, "e1");
    assert_eq!(queues[0].region, "us-east-1");
    assert_eq!(exchanges.len(), 1);
    assert_eq!(exchanges[0].id, "x1");
}

#[tokio::test]
async fn transient_errors_are_retried_until_success() {
    // arrange
    let server = MockServer::start().await;
    mock_token_endpoint(&server).await;
    Mock::given(method("GET"))
        .and(path(
            "/mq/admin/api/v1/organizations/org-1/environments/e1/regions/us-east-1/destinations",
        ))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(
            "/mq/admin/api/v1/organizations/org-1/environments/e1/regions/us-east-1/destinations",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    let client = client_for(&server);

    // act
    let queues = client.list_queues("org-1", "e1", "us-east-1").await;

    // assert
    assert!(queues.unwrap().is_empty());
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    // arrange
    let server = MockServer::start().await;
    mock_token_endpoint(&server).await;
    Mock::given(method("GET"))
        .and(path(
            "/mq/admin/api/v1/organizations/org-1/environments/e1/regions/us-east-1/destinations",
        ))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;
    let client = client_for(&server);

    // act
    let result = client.list_queues("org-1", "e1", "us-east-1").await;

    // assert
    assert!(matches!(
        result,
        Err(ApiError::Upstream { status: 400, .. })
    ));
}

#[tokio::test]
async fn vanished_destination_yields_not_found() {
    // arrange
    let server = MockServer::start().await;
    mock_token_endpoint(&server).await;
    Mock::given(method("GET"))
        .and(path(
            "/mq/stats/api/v1/organizations/org-1/environments/e1/regions/us-east-1/queues/q1",
        ))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let client = client_for(&server);

    // act
    let result = client
        .queue_stats("org-1", "e1", "us-east-1", "q1", 600)
        .await;

    // assert
    assert!(matches!(result, Err(ApiError::NotFound)));
}
