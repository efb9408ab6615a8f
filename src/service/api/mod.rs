
use crate::service::monitor::MonitorResult;
use crate::service::Service;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::instrument;

#[derive(Debug, Error, Serialize)]
#[serde(tag = "error", content = "details", rename_all = "snake_case")]
pub enum ApiHandlerError {
    #[error("Discovery failed: {0}")]
    Discovery(String),

    #[error("{0}")]
    LicenseRequired(String),

    #[error("Monitors are not enabled")]
    MonitorsDisabled,

    #[error("Entity not found")]
    NotFound,
}

impl IntoResponse for ApiHandlerError {
    fn into_response(self) -> axum::response::Response {
        let status_code = match self {
            Self::Discovery(_) => StatusCode::BAD_GATEWAY,
            Self::LicenseRequired(_) => StatusCode::PAYMENT_REQUIRED,
            Self::MonitorsDisabled => StatusCode::NOT_FOUND,
            Self::NotFound => StatusCode::NOT_FOUND,
        };

        (status_code, Json(self)).into_response()
    }
}

fn now_timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339).unwrap_or_else(|_| now.to_string())
}

/// Current discovery state and scrape settings.
#[instrument(skip(service))]
pub async fn status_get(State(service): State<Service>) -> Json<serde_json::Value> {
    let snapshot = service.discovery.snapshot();

    Json(json!({
        "autoDiscovery": service.config.auto_discovery,
        "discoveryComplete": snapshot.complete,
        "organizations": snapshot.organizations,
        "environments": snapshot.environments,
        "regions": service.config.regions,
        "scrapeIntervalSeconds": service.scrape.scrape_interval_seconds,
        "statsPeriodSeconds": service.scrape.scrape_period_seconds,
    }))
}

/// Triggers an immediate discovery cycle and reports the new snapshot.
#[instrument(skip(service))]
pub async fn discover_post(
    State(service): State<Service>,
) -> Result<Json<serde_json::Value>, ApiHandlerError> {
    let snapshot = service
        .discovery
        .discover()
        .await
        .map_err(|err| ApiHandlerError::Discovery(err.to_string()))?;

    Ok(Json(json!({
        "status": "ok",
        "organizations": snapshot.organizations.len(),
        "environments": snapshot.environments.len(),
        "details": snapshot.environments,
    })))
}

pub async fn license_get(State(service): State<Service>) -> Json<serde_json::Value> {
    Json(json!(service.license.info()))
}

/// Monitor inventory plus latest evaluation status.
#[instrument(skip(service))]
pub async fn monitors_get(
    State(service): State<Service>,
) -> Result<Json<serde_json::Value>, ApiHandlerError> {
    let runner = service.monitors.as_ref().ok_or(ApiHandlerError::MonitorsDisabled)?;
    if !service.license.rest_api_enabled() {
        return Err(ApiHandlerError::LicenseRequired(
            service.license.upgrade_message().to_owned(),
        ));
    }

    let monitors: Vec<_> = runner
        .definitions()
        .iter()
        .filter(|definition| definition.enabled)
        .collect();

    Ok(Json(json!({
        "monitors": monitors,
        "currentStatus": runner.current_status(),
        "evaluationInterval": runner.evaluation_interval_seconds(),
        "notificationChannels": runner.dispatcher().channel_names(),
        "timestamp": now_timestamp(),
    })))
}

#[instrument(skip(service))]
pub async fn monitor_get(
    State(service): State<Service>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiHandlerError> {
    let runner = service.monitors.as_ref().ok_or(ApiHandlerError::MonitorsDisabled)?;
    if !service.license.rest_api_enabled() {
        return Err(ApiHandlerError::LicenseRequired(
            service.license.upgrade_message().to_owned(),
        ));
    }

    let definition = runner
        .find_definition(&name)
        .ok_or(ApiHandlerError::NotFound)?;

    let prefix = format!("{name}:");
    let current_status: BTreeMap<String, MonitorResult> = runner
        .current_status()
        .into_iter()
        .filter(|(key, _)| key.starts_with(&prefix))
        .collect();

    Ok(Json(json!({
        "definition": definition,
        "currentStatus": current_status,
        "timestamp": now_timestamp(),
    })))
}

/// Fires a synthetic alert through the monitor's configured channels.
#[instrument(skip(service))]
pub async fn monitor_test_post(
    State(service): State<Service>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiHandlerError> {
    let runner = service.monitors.as_ref().ok_or(ApiHandlerError::MonitorsDisabled)?;
    if !service.license.notifications_enabled() {
        return Err(ApiHandlerError::LicenseRequired(
            service.license.upgrade_message().to_owned(),
        ));
    }

    let definition = runner
        .find_definition(&name)
        .ok_or(ApiHandlerError::NotFound)?;

    let result = MonitorResult {
        monitor_name: definition.name.clone(),
        queue_name: "test-queue".to_owned(),
        environment_name: "test-environment".to_owned(),
        region: "test-region".to_owned(),
        triggered: true,
        current_value: 999.0,
        threshold_value: definition.threshold,
        message: Some("This is a test notification from the REST API".to_owned()),
        severity: Some(definition.severity),
        evaluated_at: OffsetDateTime::now_utc(),
        metadata: BTreeMap::from([
            ("test".to_owned(), json!(true)),
            ("triggeredBy".to_owned(), json!("api")),
        ]),
    };

    let outcome = runner
        .dispatcher()
        .dispatch(&definition.notifications, &result)
        .await;

    Ok(Json(json!({
        "success": outcome.failed == 0,
        "monitor": name,
        "message": "Test notification sent",
        "channels": definition.notifications,
        "delivered": outcome.delivered,
        "failed": outcome.failed,
        "timestamp": now_timestamp(),
    })))
}

/// Latest QueueHealth scores across all queues.
#[instrument(skip(service))]
pub async fn health_scores_get(
    State(service): State<Service>,
) -> Result<Json<serde_json::Value>, ApiHandlerError> {
    let runner = service.monitors.as_ref().ok_or(ApiHandlerError::MonitorsDisabled)?;
    if !service.license.health_scores_enabled() {
        return Err(ApiHandlerError::LicenseRequired(
            service.license.upgrade_message().to_owned(),
        ));
    }

    let mut health_scores = BTreeMap::new();
    for result in runner.current_status().into_values() {
        let Some(score) = result.metadata.get("healthScore") else {
            continue;
        };
        let key = format!(
            "{}:{}:{}",
            result.queue_name, result.environment_name, result.region
        );
        health_scores.insert(
            key,
            json!({
                "queueName": result.queue_name,
                "environment": result.environment_name,
                "region": result.region,
                "healthScore": score,
                "lastEvaluated": result.evaluated_at.format(&Rfc3339).ok(),
            }),
        );
    }

    Ok(Json(json!({
        "healthScores": health_scores,
        "timestamp": now_timestamp(),
    })))
}

/// Health score for one queue, broken down per environment and region.
#[instrument(skip(service))]
pub async fn queue_health_score_get(
    State(service): State<Service>,
    Path(queue_name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiHandlerError> {
    let runner = service.monitors.as_ref().ok_or(ApiHandlerError::MonitorsDisabled)?;
    if !service.license.health_scores_enabled() {
        return Err(ApiHandlerError::LicenseRequired(
            service.license.upgrade_message().to_owned(),
        ));
    }

    let mut scores = BTreeMap::new();
    for result in runner.current_status().into_values() {
        if result.queue_name != queue_name {
            continue;
        }
        let Some(score) = result.metadata.get("healthScore") else {
            continue;
        };
        let key = format!("{}:{}", result.environment_name, result.region);
        scores.insert(
            key,
            json!({
                "environment": result.environment_name,
                "region": result.region,
                "healthScore": score,
                "breakdown": {
                    "messagesInQueue": result.metadata.get("messagesInQueue"),
                    "messagesInFlight": result.metadata.get("messagesInFlight"),
                    "isDlq": result.metadata.get("isDlq"),
                    "explanation": "Health score based on queue depth, DLQ presence, consumer lag, and throughput stability",
                },
                "lastEvaluated": result.evaluated_at.format(&Rfc3339).ok(),
            }),
        );
    }

    if scores.is_empty() {
        return Err(ApiHandlerError::NotFound);
    }

    Ok(Json(json!({
        "queueName": queue_name,
        "healthScores": scores,
        "timestamp": now_timestamp(),
    })))
}
