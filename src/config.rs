use crate::errors::ConfigError;
use anyhow::Result;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// Full application configuration: one monitored symbol plus notification
/// channel enablement. Loaded once at startup; a missing or malformed file
/// falls back to the documented default (console notifications only).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Parameters of one monitor run. Immutable while the loop is running; a
/// change requires stop and restart, since re-deriving the bands with new
/// parameters mid-run would retroactively redefine prior indicator values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_period")]
    pub period: usize,
    #[serde(default = "default_std_dev_multiplier")]
    pub std_dev_multiplier: f64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default = "default_api_key")]
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotificationConfig {
    #[serde(default)]
    pub console: ConsoleConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub sound: SoundConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_smtp_server")]
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub sender_email: String,
    #[serde(default)]
    pub sender_password: String,
    #[serde(default)]
    pub recipient_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SoundConfig {
    #[serde(default)]
    pub enabled: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            period: default_period(),
            std_dev_multiplier: default_std_dev_multiplier(),
            poll_interval_secs: default_poll_interval_secs(),
            lookback_days: default_lookback_days(),
            api_key: default_api_key(),
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

fn default_symbol() -> String {
    "USO".to_string()
}
fn default_period() -> usize {
    20
}
fn default_std_dev_multiplier() -> f64 {
    2.0
}
fn default_poll_interval_secs() -> u64 {
    30
}
fn default_lookback_days() -> u32 {
    60
}
fn default_api_key() -> String {
    "demo".to_string()
}
fn default_smtp_server() -> String {
    "smtp.gmail.com".to_string()
}
fn default_smtp_port() -> u16 {
    587
}
fn default_true() -> bool {
    true
}

impl MonitorConfig {
    /// Reject invalid parameters before the loop leaves `Idle`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.period < 2 {
            return Err(ConfigError::PeriodTooShort(self.period));
        }
        if self.std_dev_multiplier <= 0.0 {
            return Err(ConfigError::NonPositiveMultiplier(self.std_dev_multiplier));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::NonPositiveInterval);
        }
        if (self.lookback_days as usize) < self.period {
            return Err(ConfigError::LookbackTooShort {
                lookback_days: self.lookback_days,
                period: self.period,
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl AppConfig {
    /// Load the configuration document, falling back to the default when the
    /// file is missing or malformed.
    pub fn load_from_file(path: &str) -> Self {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("could not read config {}: {}; using defaults", path, e);
                return Self::default();
            }
        };
        match serde_json::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                warn!("malformed config {}: {}; using defaults", path, e);
                Self::default()
            }
        }
    }

    /// Persist the document, pretty-printed. Only called on explicit user
    /// edits; the monitor never writes configuration.
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
