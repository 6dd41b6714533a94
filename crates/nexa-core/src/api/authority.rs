use crate::api::{is_auth_rejection, ApiClient, LaunchGrant, SessionAuthority};
use crate::session::GameId;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct ValidateRequest<'a> {
    game_id: GameId,
    token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateResponse {
    temp_key: Option<String>,
}

/// Launch validation and login-session checks against the store API
#[derive(Debug, Clone)]
pub struct HttpSessionAuthority {
    api: ApiClient,
}

impl HttpSessionAuthority {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl SessionAuthority for HttpSessionAuthority {
    async fn validate_launch(&self, game_id: GameId, token: &str) -> Result<LaunchGrant> {
        let url = self.api.endpoint("v1/validate/")?;
        log::debug!("[api] Validating launch of game {}", game_id);

        let response = self
            .api
            .http()
            .post(url)
            .bearer_auth(token)
            .json(&ValidateRequest { game_id, token })
            .send()
            .await
            .context("Failed to reach launch validation endpoint")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Launch of game {} rejected: HTTP {}", game_id, status);
        }

        let body: ValidateResponse = response
            .json()
            .await
            .context("Failed to parse launch validation response")?;

        match body.temp_key {
            Some(temp_key) if !temp_key.is_empty() => Ok(LaunchGrant { temp_key }),
            _ => anyhow::bail!("Launch validation response did not include a launch key"),
        }
    }

    async fn is_session_valid(&self, token: &str) -> Result<bool> {
        let url = self.api.endpoint("v1/auth/session")?;

        let response = self
            .api
            .http()
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to reach session endpoint")?;

        let status = response.status();
        if status.is_success() {
            Ok(true)
        } else if is_auth_rejection(status) {
            Ok(false)
        } else {
            anyhow::bail!("Session check returned HTTP {}", status)
        }
    }
}
