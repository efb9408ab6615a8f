use super::evaluator::calculate_health_score;
use super::*;
use crate::service::anypoint::types::{QueueAttributes, QueueStats};
use crate::service::collector::QueueSnapshot;
use time::ext::NumericalDuration;
use time::macros::datetime;
use time::OffsetDateTime;

fn queue(name: &str) -> QueueAttributes {
    QueueAttributes {
        id: "q1".to_owned(),
        name: Some(name.to_owned()),
        fifo: false,
        default_ttl: None,
        default_lock_ttl: None,
        max_deliveries: Some(5),
        dead_letter_queue_id: None,
        encrypted: false,
        environment_id: "e1".to_owned(),
        region: "us-east-1".to_owned(),
    }
}

fn snapshot_with(name: &str, stats: QueueStats) -> QueueSnapshot {
    QueueSnapshot {
        queue: queue(name),
        stats,
        environment_name: "Prod".to_owned(),
        collected_at: OffsetDateTime::now_utc(),
    }
}

fn depth_stats(messages_in_queue: i64) -> QueueStats {
    QueueStats {
        messages_in_queue,
        ..Default::default()
    }
}

#[test]
fn glob_targets_match_whole_names() {
    let monitor = MonitorDefinition::new_test_definition(
        "m",
        MonitorType::QueueDepth,
        "order-*",
        ThresholdCondition::Gt,
        0.0,
    );

    assert!(monitor.matches_queue("order-123"));
    assert!(monitor.matches_queue("order-"));
    assert!(!monitor.matches_queue("orders"));
    assert!(!monitor.matches_queue("prefix-order-123"));
}

#[test]
fn glob_dot_is_literal_and_question_mark_matches_one_char() {
    let dotted = MonitorDefinition::new_test_definition(
        "m",
        MonitorType::QueueDepth,
        "a.b",
        ThresholdCondition::Gt,
        0.0,
    );
    assert!(dotted.matches_queue("a.b"));
    assert!(!dotted.matches_queue("axb"));

    let single = MonitorDefinition::new_test_definition(
        "m",
        MonitorType::QueueDepth,
        "queue-?",
        ThresholdCondition::Gt,
        0.0,
    );
    assert!(single.matches_queue("queue-1"));
    assert!(!single.matches_queue("queue-12"));
}

#[test]
fn threshold_conditions_evaluate() {
    assert!(ThresholdCondition::Gt.evaluate(2.0, 1.0));
    assert!(!ThresholdCondition::Gt.evaluate(1.0, 1.0));
    assert!(ThresholdCondition::Gte.evaluate(1.0, 1.0));
    assert!(ThresholdCondition::Lt.evaluate(0.5, 1.0));
    assert!(ThresholdCondition::Lte.evaluate(1.0, 1.0));
    assert!(ThresholdCondition::Eq.evaluate(1.0004, 1.0));
    assert!(!ThresholdCondition::Eq.evaluate(1.01, 1.0));
    assert!(!ThresholdCondition::PctChange.evaluate(100.0, 1.0));
}

#[test]
fn monitor_definitions_deserialize_from_config_shape() {
    let json = r#"{
        "name": "orders-depth",
        "type": "QUEUE_DEPTH",
        "target": "order-*",
        "condition": "GT",
        "threshold": 1000,
        "severity": "CRITICAL",
        "notifications": ["ops-slack"]
    }"#;

    let definition: MonitorDefinition = serde_json::from_str(json).unwrap();

    assert_eq!(definition.monitor_type, MonitorType::QueueDepth);
    assert_eq!(definition.condition, ThresholdCondition::Gt);
    assert_eq!(definition.severity, MonitorSeverity::Critical);
    assert!(definition.enabled);
    assert_eq!(definition.cooldown_minutes, None);
}

#[test]
fn file_defaults_merge_into_definitions() {
    let json = r#"{
        "defaults": { "cooldownMinutes": 30, "evaluationWindowMinutes": 10 },
        "definitions": [
            { "name": "a", "type": "QUEUE_DEPTH", "target": "*", "condition": "GT" },
            {
                "name": "b", "type": "QUEUE_DEPTH", "target": "*", "condition": "GT",
                "cooldownMinutes": 5, "evaluationWindowMinutes": 2
            }
        ]
    }"#;

    let mut file: MonitorsFile = serde_json::from_str(json).unwrap();
    file.apply_defaults();

    assert_eq!(file.definitions[0].cooldown_minutes, Some(30));
    assert_eq!(file.definitions[0].evaluation_window_minutes, 10);
    assert_eq!(file.definitions[1].cooldown_minutes, Some(5));
    assert_eq!(file.definitions[1].evaluation_window_minutes, 2);
}

#[test]
fn state_baseline_matches_mean_and_population_stddev() {
    // arrange
    let mut state = MonitorState::new();

    // act
    for value in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
        state.push_value(value);
    }

    // assert: textbook population stddev example, mean 5, stddev 2
    assert_eq!(state.baseline_avg(), Some(5.0));
    assert!((state.baseline_std_dev().unwrap() - 2.0).abs() < 1e-9);
}

#[test]
fn state_window_is_bounded_to_the_last_hundred_values() {
    let mut state = MonitorState::new();

    for value in 0..150 {
        state.push_value(value as f64);
    }

    // values 50..149 remain, mean = 99.5
    assert_eq!(state.len(), 100);
    assert_eq!(state.baseline_avg(), Some(99.5));
    assert_eq!(state.recent_average(2), Some(148.5));
}

#[test]
fn recent_average_uses_the_window_tail() {
    let mut state = MonitorState::new();
    for value in [1.0, 2.0, 3.0, 4.0] {
        state.push_value(value);
    }

    assert_eq!(state.recent_average(2), Some(3.5));
    assert_eq!(state.recent_average(10), Some(2.5));
    assert_eq!(state.recent_average(0), None);
}

#[test]
fn outlier_detection_uses_z_scores() {
    let mut state = MonitorState::new();
    for value in [10.0, 10.0, 10.0, 10.0, 12.0, 8.0] {
        state.push_value(value);
    }

    assert!(state.is_outlier(30.0, 3.0));
    assert!(!state.is_outlier(11.0, 3.0));
}

#[test]
fn cooldown_window_suppresses_and_then_releases() {
    // arrange
    let now = datetime!(2025-06-01 12:00:00 UTC);
    let mut state = MonitorState::new();

    // act
    state.mark_notified(now);

    // assert: S2 timing — suppressed at +5min, clear again at +20min
    assert!(state.in_cooldown(15, now + 5.minutes()));
    assert!(!state.in_cooldown(15, now + 20.minutes()));
    assert!(!state.in_cooldown(0, now));
}

#[test]
fn queue_depth_monitor_triggers_above_threshold() {
    // arrange
    let evaluator = MonitorEvaluator::new();
    let monitor = MonitorDefinition::new_test_definition(
        "depth",
        MonitorType::QueueDepth,
        "orders",
        ThresholdCondition::Gt,
        5.0,
    );
    let now = OffsetDateTime::now_utc();

    // act
    let quiet = evaluator.evaluate(&monitor, &snapshot_with("orders", depth_stats(3)), now);
    let noisy = evaluator.evaluate(&monitor, &snapshot_with("orders", depth_stats(9)), now);

    // assert
    assert!(!quiet.triggered);
    assert!(noisy.triggered);
    assert_eq!(noisy.current_value, 9.0);
    assert_eq!(noisy.threshold_value, 5.0);
    assert!(noisy.message.as_deref().unwrap().contains("exceeds"));
}

#[test]
fn dlq_monitor_ignores_queues_that_are_not_dlqs() {
    // arrange
    let evaluator = MonitorEvaluator::new();
    let monitor = MonitorDefinition::new_test_definition(
        "dlq",
        MonitorType::DlqAlert,
        "*",
        ThresholdCondition::Gt,
        0.0,
    );
    let now = OffsetDateTime::now_utc();

    // act
    let normal = evaluator.evaluate(&monitor, &snapshot_with("orders", depth_stats(3)), now);
    let dlq = evaluator.evaluate(&monitor, &snapshot_with("orders-dlq", depth_stats(3)), now);

    // assert
    assert!(!normal.triggered);
    assert!(dlq.triggered);
    assert_eq!(dlq.metadata.get("isDlq"), Some(&serde_json::json!(true)));
}

#[test]
fn dlq_alert_respects_the_notification_cooldown() {
    // arrange: S2 — trigger, notify, suppressed at +5min, open at +20min
    let evaluator = MonitorEvaluator::new();
    let monitor = MonitorDefinition::new_test_definition(
        "dlq",
        MonitorType::DlqAlert,
        "*-dlq",
        ThresholdCondition::Gt,
        0.0,
    );
    let start = datetime!(2025-06-01 12:00:00 UTC);

    // act + assert: first evaluation triggers and notifies
    let first = evaluator.evaluate(&monitor, &snapshot_with("orders-dlq", depth_stats(3)), start);
    assert!(first.triggered);
    let key = first.state_key();
    assert!(evaluator.should_notify(&key, 15, start));
    evaluator.mark_notified(&key, start);

    // 5 minutes later: still triggering, notification suppressed
    let second = evaluator.evaluate(
        &monitor,
        &snapshot_with("orders-dlq", depth_stats(3)),
        start + 5.minutes(),
    );
    assert!(second.triggered);
    assert!(!evaluator.should_notify(&key, 15, start + 5.minutes()));

    // 20 minutes later: the cooldown has elapsed
    assert!(evaluator.should_notify(&key, 15, start + 20.minutes()));
}

fn received_stats(messages_received: i64) -> QueueStats {
    QueueStats {
        messages_received,
        ..Default::default()
    }
}

#[test]
fn throughput_drop_triggers_on_the_documented_series() {
    // arrange: received counts [100 x5, 40, 40], window 2, threshold -50
    let evaluator = MonitorEvaluator::new();
    let mut monitor = MonitorDefinition::new_test_definition(
        "drop",
        MonitorType::ThroughputDrop,
        "orders",
        ThresholdCondition::PctChange,
        -50.0,
    );
    monitor.evaluation_window_minutes = 2;
    let now = OffsetDateTime::now_utc();

    // act
    let mut last = None;
    for received in [100, 100, 100, 100, 100, 40, 40] {
        last = Some(evaluator.evaluate(
            &monitor,
            &snapshot_with("orders", received_stats(received)),
            now,
        ));
    }
    let result = last.unwrap();

    // assert: recent 40, baseline ~82.857 -> ~-51.7% <= -50
    assert!(result.triggered);
    let percent_change = result
        .metadata
        .get("percentChange")
        .and_then(serde_json::Value::as_f64)
        .unwrap();
    assert!((percent_change - (-51.7)).abs() < 0.1);
    assert!(result.message.as_deref().unwrap().contains("dropped"));
}

#[test]
fn throughput_spike_needs_history_before_triggering() {
    // arrange
    let evaluator = MonitorEvaluator::new();
    let mut monitor = MonitorDefinition::new_test_definition(
        "spike",
        MonitorType::ThroughputSpike,
        "orders",
        ThresholdCondition::PctChange,
        50.0,
    );
    monitor.evaluation_window_minutes = 1;
    let now = OffsetDateTime::now_utc();

    // act: the very first sample can never trigger
    let first = evaluator.evaluate(&monitor, &snapshot_with("orders", received_stats(500)), now);
    let mut last = None;
    for received in [100, 100, 100, 400] {
        last = Some(evaluator.evaluate(
            &monitor,
            &snapshot_with("orders", received_stats(received)),
            now,
        ));
    }

    // assert
    assert!(!first.triggered);
    assert!(last.unwrap().triggered);
}

#[test]
fn health_score_composes_the_documented_penalties() {
    // arrange: S6 — depth 1000, in-flight 300, received 1000, stable history
    let state = MonitorState::new();
    let stats = QueueStats {
        messages_in_queue: 1000,
        messages_in_flight: 300,
        messages_received: 1000,
        ..Default::default()
    };

    // act
    let score = calculate_health_score(&snapshot_with("orders", stats), &state);

    // assert: 100 - ~15.02 (depth) - 15 (lag) ~= 69.98
    assert!((score - 69.98).abs() < 0.05);
}

#[test]
fn health_score_penalizes_dlq_backlog_and_clamps_at_zero() {
    let state = MonitorState::new();
    let stats = QueueStats {
        messages_in_queue: 1_000_000,
        messages_in_flight: 1_000_000,
        messages_received: 1,
        ..Default::default()
    };

    let score = calculate_health_score(&snapshot_with("orders-dlq", stats), &state);

    // depth 20 + dlq 30 + lag 25 stack up, never below zero
    assert!((score - 25.0).abs() < 1e-6);

    let empty = calculate_health_score(&snapshot_with("orders-dlq", depth_stats(0)), &state);
    assert_eq!(empty, 100.0);
}

#[test]
fn queue_health_monitor_carries_the_score_in_metadata() {
    // arrange
    let evaluator = MonitorEvaluator::new();
    let monitor = MonitorDefinition::new_test_definition(
        "health",
        MonitorType::QueueHealth,
        "orders",
        ThresholdCondition::Lt,
        50.0,
    );
    let now = OffsetDateTime::now_utc();

    // act: a healthy queue does not trigger but still reports its score
    let result = evaluator.evaluate(&monitor, &snapshot_with("orders", depth_stats(0)), now);

    // assert
    assert!(!result.triggered);
    assert_eq!(
        result.metadata.get("healthScore"),
        Some(&serde_json::json!(100.0))
    );
}

#[test]
fn custom_monitors_never_trigger() {
    let evaluator = MonitorEvaluator::new();
    let monitor = MonitorDefinition::new_test_definition(
        "custom",
        MonitorType::Custom,
        "*",
        ThresholdCondition::Gt,
        0.0,
    );

    let result = evaluator.evaluate(
        &monitor,
        &snapshot_with("orders", depth_stats(1_000_000)),
        OffsetDateTime::now_utc(),
    );

    assert!(!result.triggered);
}

#[test]
fn clearing_states_drops_all_windows() {
    // arrange
    let evaluator = MonitorEvaluator::new();
    let monitor = MonitorDefinition::new_test_definition(
        "depth",
        MonitorType::QueueDepth,
        "orders",
        ThresholdCondition::Gt,
        5.0,
    );
    let now = OffsetDateTime::now_utc();
    let result = evaluator.evaluate(&monitor, &snapshot_with("orders", depth_stats(9)), now);
    let key = result.state_key();
    assert!(evaluator.state(&key).unwrap().last_triggered_at().is_some());

    // act
    evaluator.clear_states();

    // assert
    assert!(evaluator.state(&key).is_none());
}

#[test]
fn consecutive_trigger_count_resets_on_recovery() {
    // arrange
    let evaluator = MonitorEvaluator::new();
    let monitor = MonitorDefinition::new_test_definition(
        "depth",
        MonitorType::QueueDepth,
        "orders",
        ThresholdCondition::Gt,
        5.0,
    );
    let now = OffsetDateTime::now_utc();

    // act
    let first = evaluator.evaluate(&monitor, &snapshot_with("orders", depth_stats(9)), now);
    evaluator.evaluate(&monitor, &snapshot_with("orders", depth_stats(9)), now);
    let key = first.state_key();
    let streak = evaluator.state(&key).unwrap().consecutive_triggered();
    evaluator.evaluate(&monitor, &snapshot_with("orders", depth_stats(1)), now);
    let after_recovery = evaluator.state(&key).unwrap().consecutive_triggered();

    // assert
    assert_eq!(streak, 2);
    assert_eq!(after_recovery, 0);
}
