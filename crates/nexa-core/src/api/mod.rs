//! Backend collaborators of the session manager
//!
//! [`SessionAuthority`] and [`PlayTimeReporter`] are the seams the manager
//! depends on; the `Http*` types implement them against the store API.

use crate::config::ApiConfig;
use crate::session::GameId;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use url::Url;

pub mod authority;
pub mod playtime;

pub use authority::HttpSessionAuthority;
pub use playtime::HttpPlayTimeReporter;

/// Short-lived credential authorizing one launch
#[derive(Clone, PartialEq, Eq)]
pub struct LaunchGrant {
    pub temp_key: String,
}

impl std::fmt::Debug for LaunchGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchGrant")
            .field("temp_key", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait SessionAuthority: Send + Sync {
    /// Authorize launching `game_id` with the player's token
    async fn validate_launch(&self, game_id: GameId, token: &str) -> Result<LaunchGrant>;

    /// Whether the login session behind `token` is still the authoritative one
    async fn is_session_valid(&self, token: &str) -> Result<bool>;
}

/// Failure pushing a play time total
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReportError {
    #[error("play time report rejected: session is no longer authorized")]
    Unauthorized,

    #[error("play time report failed: {0}")]
    Transient(String),
}

#[async_trait]
pub trait PlayTimeReporter: Send + Sync {
    /// Minutes recorded for `game_id` before the current session
    async fn fetch_baseline(&self, game_id: GameId, token: &str) -> Result<u64>;

    /// Replace the recorded total for `game_id`
    async fn report_total(
        &self,
        game_id: GameId,
        token: &str,
        minutes: u64,
    ) -> std::result::Result<(), ReportError>;
}

/// Shared HTTP client for the store API
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    /// Resolve an endpoint path (without leading slash) against the base URL
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Invalid endpoint path: {}", path))
    }
}

/// Statuses meaning the token itself was refused
pub(crate) fn is_auth_rejection(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}
