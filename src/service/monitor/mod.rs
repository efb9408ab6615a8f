mod evaluator;
mod state;

pub mod scheduler;

#[cfg(test)]
mod tests;

pub use evaluator::{MonitorEvaluator, MonitorResult};
pub use scheduler::MonitorRunner;
pub use state::MonitorState;

use crate::service::notify::ChannelConfig;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(clap::Args, Clone, Debug)]
pub struct MonitorRunnerConfig {
    /// Enable monitor evaluation and the monitor API endpoints.
    #[clap(
        long,
        env = "MONITORS_ENABLED",
        default_value_t = false,
        action = clap::ArgAction::Set,
        help_heading = "Monitor options"
    )]
    pub monitors_enabled: bool,

    /// Interval between monitor evaluations in seconds.
    #[clap(
        long,
        env = "MONITORS_EVALUATION_INTERVAL_SECONDS",
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(10..),
        help_heading = "Monitor options"
    )]
    pub monitors_evaluation_interval_seconds: u64,

    /// Path to the JSON document holding monitor definitions, defaults and
    /// notification channels.
    #[clap(long, env = "MONITORS_CONFIG", help_heading = "Monitor options")]
    pub monitors_config: Option<PathBuf>,
}

#[cfg(test)]
impl MonitorRunnerConfig {
    pub fn new_test_config() -> Self {
        Self {
            monitors_enabled: true,
            monitors_evaluation_interval_seconds: 60,
            monitors_config: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorType {
    QueueDepth,
    DlqAlert,
    ThroughputDrop,
    ThroughputSpike,
    QueueHealth,
    Custom,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThresholdCondition {
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    PctChange,
}

impl ThresholdCondition {
    /// Human-readable operator wording for alert messages.
    pub fn describe(self) -> &'static str {
        match self {
            ThresholdCondition::Gt => "exceeds",
            ThresholdCondition::Lt => "below",
            ThresholdCondition::Gte => "at or above",
            ThresholdCondition::Lte => "at or below",
            ThresholdCondition::Eq => "equals",
            ThresholdCondition::PctChange => "changed by",
        }
    }

    /// Evaluates the condition. `PctChange` is handled by the throughput
    /// monitor types and never triggers here.
    pub fn evaluate(self, current: f64, threshold: f64) -> bool {
        match self {
            ThresholdCondition::Gt => current > threshold,
            ThresholdCondition::Lt => current < threshold,
            ThresholdCondition::Gte => current >= threshold,
            ThresholdCondition::Lte => current <= threshold,
            ThresholdCondition::Eq => (current - threshold).abs() < 1e-3,
            ThresholdCondition::PctChange => false,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorSeverity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for MonitorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorSeverity::Info => write!(f, "INFO"),
            MonitorSeverity::Warning => write!(f, "WARNING"),
            MonitorSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_severity() -> MonitorSeverity {
    MonitorSeverity::Warning
}

/// A configured monitor: what to watch, how to compare, whom to tell.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(rename = "type")]
    pub monitor_type: MonitorType,

    /// Queue name pattern, glob-style (`order-*`, `?queue`).
    pub target: String,

    pub condition: ThresholdCondition,

    #[serde(default)]
    pub threshold: f64,

    /// How many recent samples form the "recent" window for trend analysis.
    /// Zero means "take the configured default".
    #[serde(default)]
    pub evaluation_window_minutes: u32,

    /// Minimum minutes between notifications for the same queue. `None`
    /// means "take the configured default".
    #[serde(default)]
    pub cooldown_minutes: Option<u32>,

    #[serde(default = "default_severity")]
    pub severity: MonitorSeverity,

    /// Names of the notification channels to alert.
    #[serde(default)]
    pub notifications: Vec<String>,

    #[serde(skip)]
    compiled_target: OnceCell<Option<Regex>>,
}

impl MonitorDefinition {
    /// Whole-string glob match against a sanitized queue name. `*` matches
    /// any run of characters, `?` a single character, everything else is
    /// literal.
    pub fn matches_queue(&self, queue_name: &str) -> bool {
        let regex = self.compiled_target.get_or_init(|| {
            let mut pattern = String::with_capacity(self.target.len() + 2);
            pattern.push('^');
            for ch in self.target.chars() {
                match ch {
                    '*' => pattern.push_str(".*"),
                    '?' => pattern.push('.'),
                    ch => {
                        let mut buffer = [0u8; 4];
                        pattern.push_str(&regex::escape(ch.encode_utf8(&mut buffer)));
                    }
                }
            }
            pattern.push('$');

            match Regex::new(&pattern) {
                Ok(regex) => Some(regex),
                Err(err) => {
                    warn!(target = %self.target, %err, "invalid monitor target pattern");
                    None
                }
            }
        });

        regex
            .as_ref()
            .map(|regex| regex.is_match(queue_name))
            .unwrap_or(false)
    }

    pub fn cooldown_minutes(&self) -> u32 {
        self.cooldown_minutes.unwrap_or(0)
    }
}

#[cfg(test)]
impl MonitorDefinition {
    pub fn new_test_definition(
        name: &str,
        monitor_type: MonitorType,
        target: &str,
        condition: ThresholdCondition,
        threshold: f64,
    ) -> Self {
        Self {
            name: name.to_owned(),
            description: None,
            enabled: true,
            monitor_type,
            target: target.to_owned(),
            condition,
            threshold,
            evaluation_window_minutes: 5,
            cooldown_minutes: Some(15),
            severity: MonitorSeverity::Warning,
            notifications: Vec::new(),
            compiled_target: OnceCell::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorDefaults {
    #[serde(default = "MonitorDefaults::default_cooldown")]
    pub cooldown_minutes: u32,

    #[serde(default = "MonitorDefaults::default_window")]
    pub evaluation_window_minutes: u32,
}

impl MonitorDefaults {
    fn default_cooldown() -> u32 {
        15
    }

    fn default_window() -> u32 {
        5
    }
}

impl Default for MonitorDefaults {
    fn default() -> Self {
        Self {
            cooldown_minutes: Self::default_cooldown(),
            evaluation_window_minutes: Self::default_window(),
        }
    }
}

/// Contents of the `--monitors-config` document.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorsFile {
    #[serde(default)]
    pub defaults: MonitorDefaults,

    #[serde(default)]
    pub definitions: Vec<MonitorDefinition>,

    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Error)]
pub enum MonitorConfigError {
    #[error("cannot read monitors config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot parse monitors config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

impl MonitorsFile {
    pub fn load(path: &Path) -> Result<Self, MonitorConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| MonitorConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut file: MonitorsFile =
            serde_json::from_str(&contents).map_err(|source| MonitorConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        file.apply_defaults();
        Ok(file)
    }

    /// Merges the defaults into definitions that did not set their own
    /// cooldown or evaluation window.
    pub fn apply_defaults(&mut self) {
        for definition in &mut self.definitions {
            if definition.cooldown_minutes.is_none() {
                definition.cooldown_minutes = Some(self.defaults.cooldown_minutes);
            }
            if definition.evaluation_window_minutes == 0 {
                definition.evaluation_window_minutes = self.defaults.evaluation_window_minutes;
            }
        }
    }

    pub fn enabled_definitions(&self) -> impl Iterator<Item = &MonitorDefinition> {
        self.definitions.iter().filter(|definition| definition.enabled)
    }

    pub fn find_definition(&self, name: &str) -> Option<&MonitorDefinition> {
        self.definitions.iter().find(|definition| definition.name == name)
    }
}
