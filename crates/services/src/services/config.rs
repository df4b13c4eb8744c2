//! Runtime configuration, read from a TOML file with environment overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub const CONFIG_PATH_ENV: &str = "REFERRAL_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "referral.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default)]
    pub schedule: ScheduleJobOptions,
    #[serde(default)]
    pub claim: ClaimOptions,
}

/// Background sweep settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleJobOptions {
    pub poll_interval_seconds: u64,
    /// Wall-clock budget for one sweep, checked between batches
    pub max_execution_minutes: i64,
    pub link_usage_expiration_batch_size: i64,
    pub program_expiration_batch_size: i64,
    /// Admins hear about programs ending within this many days
    pub program_expiration_notification_interval_days: i64,
    pub program_health_batch_size: i64,
    pub program_health_grace_period_days: i64,
    pub program_health_notification_days: i64,
    pub program_deletion_batch_size: i64,
    pub program_deletion_interval_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimOptions {
    /// A referee may only claim within this many minutes of finishing onboarding
    pub onboarding_window_minutes: i64,
}

fn default_database_url() -> String {
    "sqlite://referrals.db?mode=rwc".to_string()
}

fn default_bind_address() -> String {
    "127.0.0.1:3030".to_string()
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            bind_address: default_bind_address(),
            schedule: ScheduleJobOptions::default(),
            claim: ClaimOptions::default(),
        }
    }
}

impl Default for ScheduleJobOptions {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 60,
            max_execution_minutes: 30,
            link_usage_expiration_batch_size: 500,
            program_expiration_batch_size: 100,
            program_expiration_notification_interval_days: 7,
            program_health_batch_size: 100,
            program_health_grace_period_days: 14,
            program_health_notification_days: 3,
            program_deletion_batch_size: 100,
            program_deletion_interval_days: 90,
        }
    }
}

impl Default for ClaimOptions {
    fn default() -> Self {
        Self {
            onboarding_window_minutes: 10,
        }
    }
}

impl ReferralConfig {
    /// Parse a config file; a missing file yields the defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load `.env`, then the file named by `REFERRAL_CONFIG`, then apply
    /// `DATABASE_URL` and `BIND_ADDRESS` overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::load(&path)?;

        if let Ok(database_url) = std::env::var("DATABASE_URL") {
            config.database_url = database_url;
        }
        if let Ok(bind_address) = std::env::var("BIND_ADDRESS") {
            config.bind_address = bind_address;
        }
        Ok(config)
    }
}
