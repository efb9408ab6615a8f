mod errors;
#[cfg(test)]
mod tests;
pub mod types;

pub use errors::ApiError;

use crate::service::auth::AuthClient;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{debug, error, warn};
use types::{Destination, EnvironmentData, ExchangeStats, MeResponse, QueueStats};
use url::Url;

// The Stats API requires millisecond precision, e.g. 2025-01-01T00:00:00.000Z.
static STATS_DATE_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z");

#[derive(clap::Args, Debug)]
pub struct AnypointConfig {
    /// Base URL for Anypoint Platform API calls.
    #[clap(
        long,
        env = "ANYPOINT_BASE_URL",
        default_value = "https://anypoint.mulesoft.com",
        help_heading = "Anypoint options"
    )]
    pub base_url: Url,

    /// Client ID for Connected App authentication.
    #[clap(long, env = "ANYPOINT_CLIENT_ID", help_heading = "Anypoint options")]
    pub client_id: Option<String>,

    /// Client secret for Connected App authentication.
    #[clap(long, env = "ANYPOINT_CLIENT_SECRET", help_heading = "Anypoint options")]
    pub client_secret: Option<SecretString>,

    /// Username for username/password authentication.
    #[clap(long, env = "ANYPOINT_USERNAME", help_heading = "Anypoint options")]
    pub username: Option<String>,

    /// Password for username/password authentication.
    #[clap(long, env = "ANYPOINT_PASSWORD", help_heading = "Anypoint options")]
    pub password: Option<SecretString>,

    /// Primary organization ID. Auto-filled from discovery when left empty
    /// and auto-discovery is enabled.
    #[clap(long, env = "ANYPOINT_ORGANIZATION_ID", help_heading = "Anypoint options")]
    pub organization_id: Option<String>,

    /// Discover organizations and environments from the platform instead of
    /// taking them from `--environments`.
    #[clap(
        long,
        env = "ANYPOINT_AUTO_DISCOVERY",
        default_value_t = true,
        action = clap::ArgAction::Set,
        help_heading = "Anypoint options"
    )]
    pub auto_discovery: bool,

    /// Interval between discovery refreshes in milliseconds.
    #[clap(
        long,
        env = "DISCOVERY_REFRESH_INTERVAL_MS",
        default_value_t = 300_000,
        help_heading = "Anypoint options"
    )]
    pub discovery_refresh_interval_ms: u64,

    /// Environments to scrape as comma-separated `id=name` pairs. Only used
    /// when auto-discovery is disabled.
    #[clap(
        long,
        env = "ANYPOINT_ENVIRONMENTS",
        value_delimiter = ',',
        value_parser = parse_manual_environment,
        help_heading = "Anypoint options"
    )]
    pub environments: Vec<ManualEnvironment>,

    /// Regions to scan per environment.
    #[clap(
        long,
        env = "ANYPOINT_REGIONS",
        value_delimiter = ',',
        default_value = "us-east-1",
        help_heading = "Anypoint options"
    )]
    pub regions: Vec<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuthMode {
    ConnectedApp,
    UsernamePassword,
}

impl AnypointConfig {
    /// Connected App credentials win when both methods are configured, as
    /// only one can be in effect.
    pub fn auth_mode(&self) -> Option<AuthMode> {
        if is_set(&self.client_id) && self.client_secret.is_some() {
            Some(AuthMode::ConnectedApp)
        } else if is_set(&self.username) && self.password.is_some() {
            Some(AuthMode::UsernamePassword)
        } else {
            None
        }
    }

    pub fn has_valid_auth(&self) -> bool {
        self.auth_mode().is_some()
    }
}

fn is_set(value: &Option<String>) -> bool {
    value.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false)
}

#[cfg(test)]
impl AnypointConfig {
    pub fn new_test_config(base_url: Url) -> Self {
        Self {
            base_url,
            client_id: Some("test-client".to_owned()),
            client_secret: Some("test-secret".to_owned().into()),
            username: None,
            password: None,
            organization_id: Some("org-1".to_owned()),
            auto_discovery: true,
            discovery_refresh_interval_ms: 300_000,
            environments: Vec::new(),
            regions: vec!["us-east-1".to_owned()],
        }
    }
}

/// A manually configured environment, given as `id=name`.
#[derive(Clone, Debug)]
pub struct ManualEnvironment {
    pub id: String,
    pub name: String,
}

fn parse_manual_environment(value: &str) -> Result<ManualEnvironment, String> {
    let (id, name) = value
        .split_once('=')
        .ok_or_else(|| format!("expected `id=name`, got `{value}`"))?;
    if id.is_empty() {
        return Err(format!("environment id is empty in `{value}`"));
    }
    Ok(ManualEnvironment {
        id: id.to_owned(),
        name: if name.is_empty() { id.to_owned() } else { name.to_owned() },
    })
}

#[derive(clap::Args, Clone, Debug)]
pub struct HttpClientConfig {
    /// Connection timeout in seconds.
    #[clap(
        long,
        env = "HTTP_CONNECT_TIMEOUT_SECONDS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..),
        help_heading = "HTTP client options"
    )]
    pub connect_timeout_seconds: u64,

    /// Response timeout in seconds, applied to every upstream call.
    #[clap(
        long,
        env = "HTTP_READ_TIMEOUT_SECONDS",
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(1..),
        help_heading = "HTTP client options"
    )]
    pub read_timeout_seconds: u64,

    /// Maximum number of retries for failed requests.
    #[clap(
        long,
        env = "HTTP_MAX_RETRIES",
        default_value_t = 3,
        help_heading = "HTTP client options"
    )]
    pub max_retries: u32,

    /// Connection pool size towards the platform.
    #[clap(
        long,
        env = "HTTP_MAX_CONNECTIONS",
        default_value_t = 20,
        help_heading = "HTTP client options"
    )]
    pub max_connections: usize,
}

#[cfg(test)]
impl HttpClientConfig {
    pub fn new_test_config() -> Self {
        Self {
            connect_timeout_seconds: 5,
            read_timeout_seconds: 5,
            max_retries: 2,
            max_connections: 4,
        }
    }
}

/// Retries `call` with exponential backoff (base 1s) as long as the error is
/// retryable and attempts remain. The retried closure re-acquires tokens and
/// recomputes date ranges on every attempt.
pub(crate) async fn retry_with_backoff<T, Fut>(
    max_retries: u32,
    operation: &'static str,
    mut call: impl FnMut() -> Fut,
) -> Result<T, ApiError>
where
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_retries => {
                attempt += 1;
                let delay = Duration::from_secs(1u64 << (attempt - 1).min(5));
                warn!(%err, attempt, operation, "retrying upstream call");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Client for the Anypoint platform, MQ Admin and MQ Stats APIs.
pub struct AnypointClient {
    http: reqwest::Client,
    config: Arc<AnypointConfig>,
    http_config: HttpClientConfig,
    auth: Arc<AuthClient>,
}

impl AnypointClient {
    pub fn new(
        http: reqwest::Client,
        config: Arc<AnypointConfig>,
        http_config: HttpClientConfig,
        auth: Arc<AuthClient>,
    ) -> Self {
        Self {
            http,
            config,
            http_config,
            auth,
        }
    }

    /// Fetches the caller's identity: root organization plus every other
    /// organization visible to the credential.
    pub async fn get_self(&self) -> Result<MeResponse, ApiError> {
        let url = self.endpoint("/accounts/api/me")?;
        retry_with_backoff(self.http_config.max_retries, "get identity", || {
            self.get_json(url.clone(), "get identity")
        })
        .await
    }

    pub async fn list_environments(
        &self,
        organization_id: &str,
    ) -> Result<Vec<EnvironmentData>, ApiError> {
        let url = self.endpoint(&format!(
            "/accounts/api/organizations/{organization_id}/environments"
        ))?;
        let response: types::EnvironmentsResponse =
            retry_with_backoff(self.http_config.max_retries, "list environments", || {
                self.get_json(url.clone(), "list environments")
            })
            .await?;
        Ok(response.data)
    }

    /// Lists every destination of an environment/region, both kinds
    /// interleaved, already converted to domain types.
    pub async fn list_destinations(
        &self,
        organization_id: &str,
        environment_id: &str,
        region: &str,
    ) -> Result<Vec<Destination>, ApiError> {
        let url = self.endpoint(&format!(
            "/mq/admin/api/v1/organizations/{organization_id}/environments/{environment_id}/regions/{region}/destinations"
        ))?;
        let records: Vec<types::DestinationRecord> =
            retry_with_backoff(self.http_config.max_retries, "list destinations", || {
                self.get_json(url.clone(), "list destinations")
            })
            .await?;
        Ok(records
            .into_iter()
            .filter_map(|record| record.into_destination(environment_id, region))
            .collect())
    }

    /// Queue-only view of the destinations listing. The upstream may ignore
    /// a type filter parameter, so filtering happens client-side on the
    /// `kind` attribute.
    pub async fn list_queues(
        &self,
        organization_id: &str,
        environment_id: &str,
        region: &str,
    ) -> Result<Vec<types::QueueAttributes>, ApiError> {
        let destinations = self
            .list_destinations(organization_id, environment_id, region)
            .await?;
        Ok(destinations
            .into_iter()
            .filter_map(|destination| match destination {
                Destination::Queue(queue) => Some(queue),
                Destination::Exchange(_) => None,
            })
            .collect())
    }

    pub async fn list_exchanges(
        &self,
        organization_id: &str,
        environment_id: &str,
        region: &str,
    ) -> Result<Vec<types::ExchangeAttributes>, ApiError> {
        let destinations = self
            .list_destinations(organization_id, environment_id, region)
            .await?;
        Ok(destinations
            .into_iter()
            .filter_map(|destination| match destination {
                Destination::Exchange(exchange) => Some(exchange),
                Destination::Queue(_) => None,
            })
            .collect())
    }

    pub async fn queue_stats(
        &self,
        organization_id: &str,
        environment_id: &str,
        region: &str,
        queue_id: &str,
        period_seconds: u64,
    ) -> Result<QueueStats, ApiError> {
        let path = format!(
            "/mq/stats/api/v1/organizations/{organization_id}/environments/{environment_id}/regions/{region}/queues/{queue_id}"
        );
        let path = path.as_str();
        retry_with_backoff(self.http_config.max_retries, "get queue stats", || async move {
            // The date range is recomputed on every attempt.
            let url = self.stats_url(path, period_seconds)?;
            self.get_json(url, "get queue stats").await
        })
        .await
    }

    pub async fn exchange_stats(
        &self,
        organization_id: &str,
        environment_id: &str,
        region: &str,
        exchange_id: &str,
        period_seconds: u64,
    ) -> Result<ExchangeStats, ApiError> {
        let path = format!(
            "/mq/stats/api/v1/organizations/{organization_id}/environments/{environment_id}/regions/{region}/exchanges/{exchange_id}"
        );
        let path = path.as_str();
        retry_with_backoff(
            self.http_config.max_retries,
            "get exchange stats",
            || async move {
                let url = self.stats_url(path, period_seconds)?;
                self.get_json(url, "get exchange stats").await
            },
        )
        .await
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.config
            .base_url
            .join(path)
            .map_err(|err| ApiError::Transport(format!("cannot build URL for {path}: {err}")))
    }

    /// Stats URL with the `startDate`/`endDate`/`period` range, where
    /// `endDate` is now and `startDate` is `period` seconds earlier, both in
    /// UTC with millisecond precision.
    fn stats_url(&self, path: &str, period_seconds: u64) -> Result<Url, ApiError> {
        let end = OffsetDateTime::now_utc();
        let start = end - Duration::from_secs(period_seconds);

        let mut url = self.endpoint(path)?;
        url.query_pairs_mut()
            .append_pair("startDate", &format_stats_date(start)?)
            .append_pair("endDate", &format_stats_date(end)?)
            .append_pair("period", &period_seconds.to_string());
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        operation: &'static str,
    ) -> Result<T, ApiError> {
        let token = self.auth.access_token().await?;

        debug!(%url, operation, "calling upstream API");
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, token.authorization_header())
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, operation, body, "upstream API error");
            return Err(ApiError::Upstream {
                status: status.as_u16(),
                operation,
            });
        }

        Ok(response.json().await?)
    }
}

fn format_stats_date(timestamp: OffsetDateTime) -> Result<String, ApiError> {
    timestamp
        .format(&STATS_DATE_FORMAT)
        .map_err(|err| ApiError::Decode(format!("cannot format stats date: {err}")))
}
