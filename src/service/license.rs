use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

const SHARED_SECRET: &str = "anypoint-mq-exporter-pro-2024";

#[derive(clap::Args, Debug)]
pub struct LicenseConfig {
    /// License key unlocking the PRO tier features.
    #[clap(long, env = "LICENSE_KEY", help_heading = "License options")]
    pub license_key: Option<SecretString>,
}

#[cfg(test)]
impl LicenseConfig {
    pub fn new_test_config(license_key: Option<String>) -> Self {
        Self {
            license_key: license_key.map(Into::into),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LicenseTier {
    Free,
    Pro,
}

/// License validation gating the advanced monitoring features. The FREE
/// tier exports raw metrics only.
pub struct LicenseService {
    tier: LicenseTier,
}

impl LicenseService {
    pub fn new(config: &LicenseConfig) -> Self {
        let tier = match config.license_key.as_ref() {
            Some(key) if key.expose_secret() == &pro_license_key() => LicenseTier::Pro,
            Some(_) => {
                warn!("invalid license key provided, running in FREE tier");
                LicenseTier::Free
            }
            None => LicenseTier::Free,
        };

        match tier {
            LicenseTier::Pro => info!("valid PRO license detected, advanced features enabled"),
            LicenseTier::Free => {
                warn!("no valid license found, running in FREE tier (raw metrics only)")
            }
        }

        Self { tier }
    }

    pub fn tier(&self) -> LicenseTier {
        self.tier
    }

    pub fn has_valid_license(&self) -> bool {
        self.tier == LicenseTier::Pro
    }

    pub fn monitors_enabled(&self) -> bool {
        self.tier == LicenseTier::Pro
    }

    pub fn notifications_enabled(&self) -> bool {
        self.tier == LicenseTier::Pro
    }

    pub fn health_scores_enabled(&self) -> bool {
        self.tier == LicenseTier::Pro
    }

    pub fn rest_api_enabled(&self) -> bool {
        self.tier == LicenseTier::Pro
    }

    pub fn upgrade_message(&self) -> &'static str {
        "This feature requires a PRO license."
    }

    pub fn info(&self) -> LicenseInfo {
        LicenseInfo {
            tier: self.tier,
            valid: self.has_valid_license(),
            monitors_enabled: self.monitors_enabled(),
            notifications_enabled: self.notifications_enabled(),
            health_scores_enabled: self.health_scores_enabled(),
            rest_api_enabled: self.rest_api_enabled(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseInfo {
    pub tier: LicenseTier,
    pub valid: bool,
    pub monitors_enabled: bool,
    pub notifications_enabled: bool,
    pub health_scores_enabled: bool,
    pub rest_api_enabled: bool,
}

/// The expected PRO key: a hex SHA-256 digest over the shared secret and
/// tier.
pub fn pro_license_key() -> String {
    let digest = Sha256::digest(format!("{SHARED_SECRET}:PRO:2024").as_bytes());
    hex::encode(digest)
}
