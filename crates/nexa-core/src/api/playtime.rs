use crate::api::{is_auth_rejection, ApiClient, PlayTimeReporter, ReportError};
use crate::session::GameId;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
struct PlayTimeResponse {
    #[serde(default)]
    play_time: Option<u64>,
}

#[derive(Serialize)]
struct PlayTimeUpdate {
    play_time: u64,
}

/// Play time fetch/report against the store API
#[derive(Debug, Clone)]
pub struct HttpPlayTimeReporter {
    api: ApiClient,
}

impl HttpPlayTimeReporter {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    fn playtime_path(game_id: GameId) -> String {
        format!("v1/games/{}/playtime", game_id)
    }
}

#[async_trait]
impl PlayTimeReporter for HttpPlayTimeReporter {
    async fn fetch_baseline(&self, game_id: GameId, token: &str) -> Result<u64> {
        let url = self.api.endpoint(&Self::playtime_path(game_id))?;

        let response = self
            .api
            .http()
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to fetch play time")?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to fetch play time: HTTP {}", response.status());
        }

        let body: PlayTimeResponse = response
            .json()
            .await
            .context("Failed to parse play time response")?;

        Ok(body.play_time.unwrap_or(0))
    }

    async fn report_total(
        &self,
        game_id: GameId,
        token: &str,
        minutes: u64,
    ) -> std::result::Result<(), ReportError> {
        let url = self
            .api
            .endpoint(&Self::playtime_path(game_id))
            .map_err(|e| ReportError::Transient(format!("{:#}", e)))?;

        let response = self
            .api
            .http()
            .put(url)
            .bearer_auth(token)
            .json(&PlayTimeUpdate { play_time: minutes })
            .send()
            .await
            .map_err(|e| ReportError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if is_auth_rejection(status) {
            Err(ReportError::Unauthorized)
        } else {
            Err(ReportError::Transient(format!("HTTP {}", status)))
        }
    }
}
