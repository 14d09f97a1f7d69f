//! # shield-config
//!
//! Layered settings for the Shield binary.
//!
//! Sources, later ones winning:
//! 1. built-in defaults
//! 2. `shield.toml` in the working directory (optional), or the file named by `SHIELD_CONFIG`
//! 3. `SHIELD__*` environment variables, `__` separating nested keys
//!    (e.g. `SHIELD__SCAN__MODE=inline`)
//!
//! A `.env` file is loaded into the environment first when present.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigBuilder, Environment, File};
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
}

/// When the suspicion scan runs relative to the ban that triggered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Scan before the approve call returns.
    Inline,
    /// Scan on a background task after the ban is committed.
    Detached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectorySettings {
    pub base_url: String,
    pub page_size: u32,
    pub timeout_secs: u64,
}

impl DirectorySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifySettings {
    /// Leave unset to log notifications instead of posting them.
    pub webhook_url: Option<SecretString>,
    pub queue_capacity: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanSettings {
    pub mode: ScanMode,
    pub timeout_secs: u64,
    /// Group harvests in flight at once during a scan.
    pub concurrency: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewerSeed {
    pub name: String,
    pub passcode: SecretString,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub log_format: LogFormat,
    pub directory: DirectorySettings,
    pub notify: NotifySettings,
    pub scan: ScanSettings,
    /// Reviewers ensured present at startup.
    #[serde(default)]
    pub reviewers: Vec<ReviewerSeed>,
    /// Bare passcodes ensured present at startup, named `reviewer-<n>`.
    #[serde(default)]
    pub reviewer_passwords: Vec<SecretString>,
}

fn defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
    Config::builder()
        .set_default("data_dir", "./data")?
        .set_default("log_format", "pretty")?
        .set_default("directory.base_url", "https://groups.roblox.com")?
        .set_default("directory.page_size", 100)?
        .set_default("directory.timeout_secs", 15)?
        .set_default("notify.queue_capacity", 64)?
        .set_default("notify.timeout_secs", 10)?
        .set_default("scan.mode", "inline")?
        .set_default("scan.timeout_secs", 120)?
        .set_default("scan.concurrency", 4)
}

impl Settings {
    /// Loads `.env`, the optional config file, then the environment.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env");
        }
        let file = std::env::var("SHIELD_CONFIG").unwrap_or_else(|_| "shield.toml".to_string());

        let settings = defaults()?
            .add_source(File::with_name(&file).required(false))
            .add_source(
                Environment::with_prefix("SHIELD")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("reviewer_passwords"),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Defaults overlaid with a TOML document.
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let settings = defaults()?
            .add_source(File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
}
