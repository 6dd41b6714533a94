use anyhow::Result;
use clap::{Parser, Subcommand};
use nexa_core::installer::Installer;
use nexa_core::{
    ApiClient, GameSessionManager, HttpPlayTimeReporter, HttpSessionAuthority, NativeSpawner,
    StopCause,
};
use std::path::PathBuf;
use std::sync::Arc;

mod commands;
mod config;
mod logging;
mod notifier;

use config::LauncherConfig;
use notifier::ConsoleNotifier;

/// Nexa game launcher
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (JSON)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch a game and supervise it until it exits
    Play {
        game_id: u64,

        /// Path to the game executable
        executable: PathBuf,

        /// Login token of the player
        #[arg(long, env = "NEXA_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// Download an installer and install the game silently
    Install {
        url: String,

        /// Install directory
        #[arg(long, value_name = "DIR")]
        dir: PathBuf,
    },
    /// Uninstall a game silently
    Uninstall {
        game_id: u64,

        /// Install directory of the game
        #[arg(long, value_name = "DIR")]
        dir: PathBuf,
    },
    /// List game executables (defaults to Documents/My Games)
    Scan { dir: Option<PathBuf> },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let dotenv = dotenvy::dotenv();

    let config_path = match args.config {
        Some(path) => path,
        None => config::default_config_path()?,
    };
    let mut config = LauncherConfig::load_or_create(&config_path)?;
    config.apply_overrides(|key| std::env::var(key).ok());

    logging::init(args.debug || config.debug_logging);
    log::info!(
        "[main] Nexa launcher {} (config: {:?})",
        env!("CARGO_PKG_VERSION"),
        config_path
    );
    if let Ok(path) = dotenv {
        log::debug!("[main] Loaded environment from {:?}", path);
    }

    let api = ApiClient::new(&config.api_config()?)?;
    let manager = GameSessionManager::new(
        Arc::new(HttpSessionAuthority::new(api.clone())),
        Arc::new(HttpPlayTimeReporter::new(api.clone())),
        Arc::new(NativeSpawner::new(config.kill_grace())),
        Arc::new(ConsoleNotifier),
        config.session_config(),
    );
    let installer = Installer::from_api(&api);

    match args.command {
        Command::Play {
            game_id,
            executable,
            token,
        } => {
            let logs_dir = config.logs_dir()?;
            let response =
                commands::launch_game(&manager, game_id, token, executable, Some(&logs_dir)).await;
            println!("{}", serde_json::to_string(&response)?);
            if let Some(error) = response.error {
                anyhow::bail!(error);
            }
            log::debug!(
                "[main] Session active for game {}: {}",
                game_id,
                commands::is_session_active(&manager, game_id)
            );
            supervise(&manager).await?;
        }
        Command::Install { url, dir } => {
            let downloads_dir = config.downloads_dir()?;
            commands::install_game(&installer, &url, &downloads_dir, &dir)
                .await
                .map_err(anyhow::Error::msg)?;
            println!("Installed into {}", dir.display());
        }
        Command::Uninstall { game_id, dir } => {
            commands::uninstall_game(&manager, &installer, game_id, &dir)
                .await
                .map_err(anyhow::Error::msg)?;
            println!("Uninstalled game {}", game_id);
        }
        Command::Scan { dir } => {
            for path in commands::scan_executables(dir).map_err(anyhow::Error::msg)? {
                println!("{}", path.display());
            }
        }
    }

    Ok(())
}

/// Wait for the game to end, or end it when the launcher is told to go away
async fn supervise(manager: &GameSessionManager) -> Result<()> {
    let cause = tokio::select! {
        _ = manager.wait_until_idle() => None,
        cause = shutdown_signal() => Some(cause?),
    };

    if let Some(cause) = cause {
        log::info!("[main] Shutting down ({:?})", cause);
        if let Some(summary) = manager.stop(cause).await {
            log::info!(
                "[main] Game {} stopped after reaching {} minutes",
                summary.game_id,
                summary.final_minutes
            );
        }
    }
    Ok(())
}

/// SIGHUP stands in for the window closing; SIGINT/SIGTERM for quitting
#[cfg(unix)]
async fn shutdown_signal() -> Result<StopCause> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;

    let cause = tokio::select! {
        _ = sigterm.recv() => StopCause::AppQuit,
        _ = sigint.recv() => StopCause::AppQuit,
        _ = sighup.recv() => StopCause::WindowClosed,
    };
    Ok(cause)
}

#[cfg(windows)]
async fn shutdown_signal() -> Result<StopCause> {
    tokio::signal::ctrl_c().await?;
    Ok(StopCause::AppQuit)
}
