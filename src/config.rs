//! TOML configuration for the cronwarden controller.
//!
//! Controller settings and the cron workflows themselves live in one file.
//! Every workflow is validated on load, so a bad schedule or policy stops the
//! process instead of being silently replaced with a default.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::scheduler::CronScheduleSpec;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "CRONWARDEN_CONFIG";

/// Standard system location checked when `CRONWARDEN_CONFIG` is unset.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/cronwarden/cronwarden.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub cron_workflows: Vec<CronScheduleSpec>,
}

impl Config {
    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from, in order:
    /// 1. The path in `CRONWARDEN_CONFIG`.
    /// 2. `/etc/cronwarden/cronwarden.toml`.
    /// 3. Compiled-in defaults (no workflows).
    ///
    /// A file that exists but fails to load is an error.
    pub fn load_or_default() -> Result<Self> {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            return Self::load(Path::new(&env_path));
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            return Self::load(system_path);
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        if self.controller.poll_interval_secs == 0 {
            anyhow::bail!("controller.pollIntervalSecs must be at least 1");
        }

        let mut seen = HashSet::new();
        for spec in &self.cron_workflows {
            spec.validate()
                .with_context(|| format!("cron workflow '{}' is invalid", spec.name))?;
            if !seen.insert(spec.name.as_str()) {
                anyhow::bail!("duplicate cron workflow name '{}'", spec.name);
            }
        }
        Ok(())
    }

    pub fn workflow(&self, name: &str) -> Option<&CronScheduleSpec> {
        self.cron_workflows.iter().find(|s| s.name == name)
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Upper bound on how long a worker sleeps between evaluations.
    pub poll_interval_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageConfig {
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "data/cronwarden.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiConfig {
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
