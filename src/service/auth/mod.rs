
use crate::service::anypoint::{retry_with_backoff, AnypointConfig, ApiError, AuthMode, HttpClientConfig};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;
use time::ext::NumericalDuration;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Tokens are refreshed this long before their actual expiry.
const EXPIRY_SAFETY_MARGIN_MINUTES: i64 = 5;

/// Wire shape of both token endpoints.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,

    #[serde(default = "default_token_type")]
    token_type: String,

    #[serde(default)]
    expires_in: Option<i64>,

    #[serde(default)]
    scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_owned()
}

/// An OAuth2 access token for the Anypoint platform.
#[derive(Clone, Debug)]
pub struct AccessToken {
    bearer: SecretString,
    token_type: String,
    expires_in: i64,
    obtained_at: OffsetDateTime,
}

impl AccessToken {
    fn issued(response: TokenResponse, obtained_at: OffsetDateTime) -> Self {
        Self {
            bearer: response.access_token.into(),
            token_type: response.token_type,
            expires_in: response.expires_in.unwrap_or(0),
            obtained_at,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(OffsetDateTime::now_utc())
    }

    /// A token counts as invalid once `now` plus the safety margin reaches
    /// its expiry, so in-flight requests never race token expiration.
    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        if self.bearer.expose_secret().is_empty() {
            return false;
        }
        now + EXPIRY_SAFETY_MARGIN_MINUTES.minutes()
            < self.obtained_at + self.expires_in.seconds()
    }

    pub fn seconds_until_expiry(&self) -> i64 {
        let expires_at = self.obtained_at + self.expires_in.seconds();
        (expires_at - OffsetDateTime::now_utc()).whole_seconds()
    }

    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.bearer.expose_secret())
    }
}

/// Acquires and caches platform access tokens.
///
/// The single slot is guarded by a mutex held across the refresh, so
/// concurrent callers during a cache miss observe exactly one upstream
/// authentication call.
pub struct AuthClient {
    http: reqwest::Client,
    config: Arc<AnypointConfig>,
    http_config: HttpClientConfig,
    cached: Mutex<Option<AccessToken>>,
}

impl AuthClient {
    pub fn new(
        http: reqwest::Client,
        config: Arc<AnypointConfig>,
        http_config: HttpClientConfig,
    ) -> Self {
        match config.auth_mode() {
            Some(AuthMode::ConnectedApp) => info!("configured for Connected App authentication"),
            Some(AuthMode::UsernamePassword) => {
                info!("configured for username/password authentication")
            }
            None => warn!("no authentication method configured"),
        }

        Self {
            http,
            config,
            http_config,
            cached: Mutex::new(None),
        }
    }

    /// Returns a valid token, refreshing the cached one when necessary.
    pub async fn access_token(&self) -> Result<AccessToken, ApiError> {
        let mut slot = self.cached.lock().await;

        if let Some(token) = slot.as_ref() {
            if token.is_valid() {
                debug!(
                    expires_in = token.seconds_until_expiry(),
                    "using cached access token"
                );
                return Ok(token.clone());
            }
        }

        info!("requesting new access token");
        match self.authenticate().await {
            Ok(token) => {
                info!(
                    expires_in = token.seconds_until_expiry(),
                    "obtained access token"
                );
                *slot = Some(token.clone());
                Ok(token)
            }
            Err(err) => {
                if matches!(err, ApiError::AuthFailed { .. }) {
                    *slot = None;
                }
                Err(err)
            }
        }
    }

    pub async fn has_valid_token(&self) -> bool {
        self.cached
            .lock()
            .await
            .as_ref()
            .map(AccessToken::is_valid)
            .unwrap_or(false)
    }

    /// Forces re-authentication on the next request.
    pub async fn clear_token(&self) {
        *self.cached.lock().await = None;
    }

    async fn authenticate(&self) -> Result<AccessToken, ApiError> {
        match self.config.auth_mode() {
            Some(AuthMode::ConnectedApp) => {
                retry_with_backoff(self.http_config.max_retries, "authenticate", || {
                    self.authenticate_connected_app()
                })
                .await
            }
            Some(AuthMode::UsernamePassword) => {
                retry_with_backoff(self.http_config.max_retries, "login", || {
                    self.authenticate_with_login()
                })
                .await
            }
            None => Err(ApiError::NotConfigured),
        }
    }

    async fn authenticate_connected_app(&self) -> Result<AccessToken, ApiError> {
        let url = self
            .config
            .base_url
            .join("/accounts/api/v2/oauth2/token")
            .map_err(|err| ApiError::Transport(err.to_string()))?;

        let client_id = self.config.client_id.as_deref().unwrap_or_default();
        let client_secret = self
            .config
            .client_secret
            .as_ref()
            .map(|secret| secret.expose_secret().as_str())
            .unwrap_or_default();

        let response = self
            .http
            .post(url)
            .form(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;

        Self::token_from_response(response).await
    }

    async fn authenticate_with_login(&self) -> Result<AccessToken, ApiError> {
        let url = self
            .config
            .base_url
            .join("/accounts/login")
            .map_err(|err| ApiError::Transport(err.to_string()))?;

        let username = self.config.username.as_deref().unwrap_or_default();
        let password = self
            .config
            .password
            .as_ref()
            .map(|secret| secret.expose_secret().as_str())
            .unwrap_or_default();

        let response = self
            .http
            .post(url)
            .json(&serde_json::json!({
                "username": username,
                "password": password,
            }))
            .send()
            .await?;

        Self::token_from_response(response).await
    }

    async fn token_from_response(response: reqwest::Response) -> Result<AccessToken, ApiError> {
        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, body, "authentication rejected");
            return Err(ApiError::AuthFailed {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(ApiError::Upstream {
                status: status.as_u16(),
                operation: "authenticate",
            });
        }

        let token: TokenResponse = response.json().await?;
        Ok(AccessToken::issued(token, OffsetDateTime::now_utc()))
    }
}

#[cfg(test)]
impl AccessToken {
    pub fn new_test_token(bearer: &str, expires_in: i64, obtained_at: OffsetDateTime) -> Self {
        Self {
            bearer: bearer.to_owned().into(),
            token_type: "Bearer".to_owned(),
            expires_in,
            obtained_at,
        }
    }
}
