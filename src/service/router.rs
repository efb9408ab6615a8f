use super::api::{
    discover_post, health_scores_get, license_get, monitor_get, monitor_test_post, monitors_get,
    queue_health_score_get, status_get,
};
use super::health::health_get;
use super::metrics::metrics_get;
use crate::service::Service;
use axum::routing::{get, post};
use axum::Router;

pub fn create_router(service: Service) -> Router<()> {
    Router::new()
        .route("/", get(|| async { "Anypoint MQ exporter" }))
        .route("/healthz", get(|| async { "healthy" }))
        .route("/actuator/prometheus", get(metrics_get))
        .route("/actuator/health", get(health_get))
        .route("/api/status", get(status_get))
        .route("/api/discover", post(discover_post))
        .route("/api/license", get(license_get))
        .route("/api/monitors", get(monitors_get))
        .route("/api/monitors/:name", get(monitor_get))
        .route("/api/monitors/:name/test", post(monitor_test_post))
        .route("/api/health-scores", get(health_scores_get))
        .route("/api/health-scores/:queue_name", get(queue_health_score_get))
        .with_state(service)
}
