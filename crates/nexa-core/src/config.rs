//! Centralized session and API settings.
//! Static defaults live here; the launcher binary overrides them from its
//! config file.

use anyhow::{Context, Result};
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3000";

pub const REQUEST_TIMEOUT_SECS: u64 = 30;
pub const SUPERVISOR_INTERVAL_SECS: u64 = 60;
/// Time a terminated game gets between SIGTERM and SIGKILL
pub const KILL_GRACE_SECS: u64 = 3;
pub const MAX_CONSECUTIVE_REPORT_FAILURES: u32 = 10;

/// Timing and failure policy for game sessions
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Period of the supervisor loop (liveness, auth re-check, play time report)
    pub supervisor_interval: Duration,

    /// Consecutive transient report failures tolerated before the session is
    /// ended. `None` tolerates any number of failures.
    pub max_consecutive_report_failures: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            supervisor_interval: Duration::from_secs(SUPERVISOR_INTERVAL_SECS),
            max_consecutive_report_failures: Some(MAX_CONSECUTIVE_REPORT_FAILURES),
        }
    }
}

/// Where and how to reach the launcher backend
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: Url,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl ApiConfig {
    /// Build a config for `base_url`. A trailing slash is added so endpoint
    /// paths join below the base instead of replacing its last segment.
    pub fn new(base_url: &str) -> Result<Self> {
        let mut normalized = base_url.trim().to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }

        let base_url = Url::parse(&normalized)
            .with_context(|| format!("Invalid API base URL: {}", base_url))?;

        Ok(Self {
            base_url,
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            user_agent: format!("NexaLauncher/{}", env!("CARGO_PKG_VERSION")),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
