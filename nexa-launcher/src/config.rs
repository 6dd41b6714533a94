//! Launcher configuration file
//!
//! Stored as JSON in the platform config directory and created with defaults
//! on first run. `NEXA_API_URL` and `NEXA_DEBUG_LOGGING` (from the environment
//! or a `.env` file) override the stored values for one run.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use nexa_core::config::{
    ApiConfig, SessionConfig, DEFAULT_API_BASE_URL, KILL_GRACE_SECS,
    MAX_CONSECUTIVE_REPORT_FAILURES, REQUEST_TIMEOUT_SECS, SUPERVISOR_INTERVAL_SECS,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "config.json";

pub const ENV_API_URL: &str = "NEXA_API_URL";
pub const ENV_DEBUG_LOGGING: &str = "NEXA_DEBUG_LOGGING";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Base URL of the store API
    pub api_url: String,

    pub request_timeout_secs: u64,

    pub debug_logging: bool,

    /// Seconds between supervisor ticks of a running game
    pub supervisor_interval_secs: u64,

    pub kill_grace_secs: u64,

    /// `null` keeps a game running through any number of failed reports
    pub max_consecutive_report_failures: Option<u32>,

    /// Where game output logs go (defaults to `<data dir>/logs`)
    pub logs_dir: Option<PathBuf>,

    /// Where installers are downloaded (defaults to `<data dir>/downloads`)
    pub downloads_dir: Option<PathBuf>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            debug_logging: false,
            supervisor_interval_secs: SUPERVISOR_INTERVAL_SECS,
            kill_grace_secs: KILL_GRACE_SECS,
            max_consecutive_report_failures: Some(MAX_CONSECUTIVE_REPORT_FAILURES),
            logs_dir: None,
            downloads_dir: None,
        }
    }
}

pub fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("com", "Nexa", "NexaLauncher")
        .ok_or_else(|| anyhow::anyhow!("Failed to determine user's config directory"))
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join(CONFIG_FILE_NAME))
}

impl LauncherConfig {
    /// Read the config at `path`, writing defaults there if it doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse config file {:?}", path))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let data = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, data).context("Failed to write config file")?;
        Ok(())
    }

    /// Apply environment overrides; `lookup` is `std::env::var` outside tests
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api_url = url;
        }
        if let Some(value) = lookup(ENV_DEBUG_LOGGING) {
            match parse_flag(&value) {
                Some(flag) => self.debug_logging = flag,
                None => log::warn!(
                    "[config] Ignoring {}={:?}: expected true/false",
                    ENV_DEBUG_LOGGING,
                    value
                ),
            }
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            supervisor_interval: Duration::from_secs(self.supervisor_interval_secs.max(1)),
            max_consecutive_report_failures: self.max_consecutive_report_failures,
        }
    }

    /// Grace period handed to the native spawner
    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }

    pub fn api_config(&self) -> Result<ApiConfig> {
        Ok(ApiConfig::new(&self.api_url)?
            .with_timeout(Duration::from_secs(self.request_timeout_secs)))
    }

    pub fn logs_dir(&self) -> Result<PathBuf> {
        match &self.logs_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(project_dirs()?.data_dir().join("logs")),
        }
    }

    pub fn downloads_dir(&self) -> Result<PathBuf> {
        match &self.downloads_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(project_dirs()?.data_dir().join("downloads")),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
