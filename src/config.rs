//! Configuration loading from TOML with environment overrides.
//!
//! Reads `faabook.toml` (or the file named by `FAABOOK_CONFIG`) into
//! strongly-typed structs. Every section has defaults, so an empty file is
//! a valid configuration. `DATABASE_URL` overrides `storage.database_url`.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::odds::projection::ProjectionConfig;
use crate::storage::retry::RetryPolicy;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub book: BookConfig,
    pub odds: OddsConfig,
    pub schedule: ScheduleConfig,
    pub storage: StorageConfig,
    pub lines: LinesConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BookConfig {
    pub name: String,
    /// FAAB granted to a participant when first synced.
    pub starting_balance: i64,
    /// Week the refresh loop publishes lines for.
    pub current_week: u32,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            name: "FAAB Book".into(),
            starting_balance: 100,
            current_week: 1,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OddsConfig {
    pub league_average: f64,
    pub balance_adjustment: bool,
    pub balance_scale: f64,
    pub balance_cap: f64,
}

impl Default for OddsConfig {
    fn default() -> Self {
        let p = ProjectionConfig::default();
        Self {
            league_average: p.league_average,
            balance_adjustment: p.balance_adjustment,
            balance_scale: p.balance_scale,
            balance_cap: p.balance_cap,
        }
    }
}

impl OddsConfig {
    pub fn projection(&self) -> ProjectionConfig {
        ProjectionConfig {
            league_average: self.league_average,
            balance_adjustment: self.balance_adjustment,
            balance_scale: self.balance_scale,
            balance_cap: self.balance_cap,
            ..ProjectionConfig::default()
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScheduleConfig {
    /// League local time as a fixed offset from UTC.
    pub utc_offset_hours: i32,
    /// Thursday of week 1. Enables per-week locking when set.
    pub season_start: Option<NaiveDate>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: -5,
            season_start: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://faabook.db".into(),
            max_connections: 8,
            busy_timeout_ms: 5_000,
            max_retries: 3,
            base_backoff_ms: 25,
        }
    }
}

impl StorageConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.base_backoff_ms))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LinesConfig {
    /// Directory of `week_<n>.json` projection files. No refresh loop when unset.
    pub source_dir: Option<String>,
    pub refresh_interval_secs: u64,
}

impl Default for LinesConfig {
    fn default() -> Self {
        Self {
            source_dir: None,
            refresh_interval_secs: 900,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { enabled: true, port: 8080 }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file and apply env overrides.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let mut config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        if config.book.starting_balance < 0 {
            anyhow::bail!("book.starting_balance must not be negative");
        }
        if config.storage.max_connections == 0 {
            anyhow::bail!("storage.max_connections must be at least 1");
        }
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                self.storage.database_url = url;
            }
        }
    }
}
