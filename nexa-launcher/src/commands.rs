//! Command surface of the launcher
//!
//! Errors are flattened to strings at this boundary, like frontend commands.

use nexa_core::installer::Installer;
use nexa_core::library;
use nexa_core::{GameId, GameSessionManager, LaunchRequest, StopCause};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Result of `launch_game` as the frontend sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

pub async fn launch_game(
    manager: &GameSessionManager,
    game_id: GameId,
    token: String,
    executable_path: PathBuf,
    logs_dir: Option<&Path>,
) -> LaunchResponse {
    log::info!("[launch_game] Launch requested for game {}", game_id);

    let mut request = LaunchRequest::new(game_id, token, executable_path);
    if let Some(dir) = logs_dir {
        request = request.with_log_file(dir.join(format!("game-{}.log", game_id)));
    }

    match manager.launch(request).await {
        Ok(outcome) => LaunchResponse {
            success: true,
            pid: Some(outcome.pid),
            error: None,
            code: None,
        },
        Err(e) => {
            log::error!("[launch_game] Failed to launch game {}: {}", game_id, e);
            LaunchResponse {
                success: false,
                pid: None,
                error: Some(e.to_string()),
                code: Some(e.code()),
            }
        }
    }
}

pub fn is_session_active(manager: &GameSessionManager, game_id: GameId) -> bool {
    manager.is_session_active(game_id)
}

/// Download the installer at `url` and install it into `install_dir`
pub async fn install_game(
    installer: &Installer,
    url: &str,
    downloads_dir: &Path,
    install_dir: &Path,
) -> Result<(), String> {
    let setup = installer
        .download(url, downloads_dir)
        .await
        .map_err(|e| format!("Failed to download installer: {:#}", e))?;

    installer
        .install(&setup, install_dir)
        .await
        .map_err(|e| format!("Failed to install game: {:#}", e))?;

    if let Err(e) = tokio::fs::remove_file(&setup).await {
        log::warn!("[install_game] Could not remove installer {:?}: {}", setup, e);
    }
    Ok(())
}

/// Uninstall a game, ending its session first if it is running
pub async fn uninstall_game(
    manager: &GameSessionManager,
    installer: &Installer,
    game_id: GameId,
    install_dir: &Path,
) -> Result<(), String> {
    if let Some(summary) = manager.stop(StopCause::Uninstall(game_id)).await {
        log::info!(
            "[uninstall_game] Stopped running game {} ({} minutes) before uninstalling",
            game_id,
            summary.final_minutes
        );
    }

    installer
        .uninstall(install_dir)
        .await
        .map_err(|e| format!("Failed to uninstall game: {:#}", e))
}

/// Executables under `dir`, or under `<Documents>/My Games` when not given
pub fn scan_executables(dir: Option<PathBuf>) -> Result<Vec<PathBuf>, String> {
    let dir = match dir.or_else(library::default_search_dir) {
        Some(dir) => dir,
        None => return Err("Failed to determine the documents directory".to_string()),
    };
    library::find_executables(&dir).map_err(|e| format!("Failed to scan {:?}: {:#}", dir, e))
}
