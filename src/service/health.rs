use crate::service::anypoint::{AnypointConfig, AuthMode};
use crate::service::auth::AuthClient;
use crate::service::collector::ScrapeConfig;
use crate::service::discovery::DiscoveryService;
use crate::service::Service;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

/// Health results are cached this long to keep the endpoint from hammering
/// the auth API.
const HEALTH_CACHE_TTL: Duration = Duration::from_secs(30);

const AUTH_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Down,
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub details: serde_json::Value,
}

struct CachedHealth {
    checked_at: Instant,
    report: HealthReport,
}

/// Connectivity health checks for the platform: configuration validity plus
/// the ability to obtain an access token.
pub struct HealthService {
    auth: Arc<AuthClient>,
    config: Arc<AnypointConfig>,
    scrape: ScrapeConfig,
    discovery: Arc<DiscoveryService>,
    cached: Mutex<Option<CachedHealth>>,
}

impl HealthService {
    pub fn new(
        auth: Arc<AuthClient>,
        config: Arc<AnypointConfig>,
        scrape: ScrapeConfig,
        discovery: Arc<DiscoveryService>,
    ) -> Self {
        Self {
            auth,
            config,
            scrape,
            discovery,
            cached: Mutex::new(None),
        }
    }

    pub async fn check(&self) -> HealthReport {
        let mut cached = self.cached.lock().await;

        if let Some(entry) = cached.as_ref() {
            if entry.checked_at.elapsed() < HEALTH_CACHE_TTL {
                return entry.report.clone();
            }
        }

        let report = self.perform_check().await;
        *cached = Some(CachedHealth {
            checked_at: Instant::now(),
            report: report.clone(),
        });
        report
    }

    async fn perform_check(&self) -> HealthReport {
        let mut details = self.base_details();

        if !self.config.has_valid_auth() {
            merge(
                &mut details,
                json!({
                    "reason": "No valid authentication configuration found",
                    "suggestion": "Configure either username/password or clientId/clientSecret",
                }),
            );
            return HealthReport {
                status: HealthStatus::Down,
                details,
            };
        }

        if !self.scrape.scrape_enabled {
            merge(
                &mut details,
                json!({ "reason": "scraping is disabled" }),
            );
            return HealthReport {
                status: HealthStatus::Up,
                details,
            };
        }

        match tokio::time::timeout(AUTH_PROBE_TIMEOUT, self.auth.access_token()).await {
            Ok(Ok(token)) if token.is_valid() => {
                merge(
                    &mut details,
                    json!({ "authentication": "success", "tokenValid": true }),
                );
                HealthReport {
                    status: HealthStatus::Up,
                    details,
                }
            }
            Ok(Ok(_)) => {
                merge(
                    &mut details,
                    json!({
                        "authentication": "failed",
                        "tokenValid": false,
                        "reason": "Unable to obtain valid access token",
                    }),
                );
                HealthReport {
                    status: HealthStatus::Down,
                    details,
                }
            }
            Ok(Err(err)) => {
                warn!(%err, "authentication test failed");
                merge(
                    &mut details,
                    json!({ "authentication": "error", "error": err.to_string() }),
                );
                HealthReport {
                    status: HealthStatus::Down,
                    details,
                }
            }
            Err(_) => {
                merge(
                    &mut details,
                    json!({ "authentication": "error", "error": "authentication test timed out" }),
                );
                HealthReport {
                    status: HealthStatus::Down,
                    details,
                }
            }
        }
    }

    fn base_details(&self) -> serde_json::Value {
        let snapshot = self.discovery.snapshot();

        json!({
            "baseUrl": self.config.base_url.to_string(),
            "organizationId": mask_identifier(
                self.config.organization_id.as_deref().unwrap_or_default()
            ),
            "authMethod": auth_method_name(&self.config),
            "environmentsCount": snapshot.environments.len(),
            "regionsCount": self.config.regions.len(),
            "scrapeEnabled": self.scrape.scrape_enabled,
            "scrapeIntervalSeconds": self.scrape.scrape_interval_seconds,
            "scrapePeriodSeconds": self.scrape.scrape_period_seconds,
            "regions": self.config.regions,
            "environments": snapshot
                .environments
                .iter()
                .map(|env| json!({ "id": mask_identifier(&env.id), "name": env.name }))
                .collect::<Vec<_>>(),
        })
    }
}

fn auth_method_name(config: &AnypointConfig) -> &'static str {
    match config.auth_mode() {
        Some(AuthMode::ConnectedApp) => "connected_app",
        Some(AuthMode::UsernamePassword) => "username_password",
        None => "none_configured",
    }
}

fn merge(details: &mut serde_json::Value, extra: serde_json::Value) {
    if let (Some(target), Some(source)) = (details.as_object_mut(), extra.as_object()) {
        for (key, value) in source {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Masks sensitive identifiers as `abcd***wxyz`; identifiers shorter than 8
/// characters are fully masked.
pub fn mask_identifier(id: &str) -> String {
    if id.len() < 8 {
        return "***".to_owned();
    }
    format!("{}***{}", &id[..4], &id[id.len() - 4..])
}

pub async fn health_get(State(service): State<Service>) -> impl IntoResponse {
    let report = service.health.check().await;
    let status_code = match report.status {
        HealthStatus::Up => StatusCode::OK,
        HealthStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(report))
}
