pub mod anypoint;
pub mod api;
pub mod auth;
pub mod collector;
pub mod discovery;
pub mod health;
pub mod license;
pub mod metrics;
pub mod monitor;
pub mod notify;
pub mod router;

use anypoint::{AnypointClient, AnypointConfig};
use auth::AuthClient;
use collector::{Collector, ScrapeConfig};
use discovery::DiscoveryService;
use health::HealthService;
use license::LicenseService;
use metrics::ExporterMetrics;
use monitor::MonitorRunner;
use std::sync::Arc;

/// Shared handle to every sub-service, used as the axum router state.
#[derive(Clone)]
pub struct Service {
    pub config: Arc<AnypointConfig>,
    pub scrape: ScrapeConfig,
    pub auth: Arc<AuthClient>,
    pub client: Arc<AnypointClient>,
    pub discovery: Arc<DiscoveryService>,
    pub collector: Arc<Collector>,
    /// `None` when monitors are disabled; the monitor endpoints then 404.
    pub monitors: Option<Arc<MonitorRunner>>,
    pub license: Arc<LicenseService>,
    pub health: Arc<HealthService>,
    pub metrics: Arc<ExporterMetrics>,
}
