//! Game installer capability
//!
//! Games ship as Inno Setup installers. The launcher downloads the installer,
//! runs it silently into the chosen directory and later runs the bundled
//! uninstaller the same way.

use crate::api::ApiClient;
use crate::process::command::BackgroundCommandExt;
use anyhow::{Context, Result};
use futures::{Stream, StreamExt};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs::{create_dir_all, File};
use tokio::io::AsyncWriteExt;
use url::Url;

/// Uninstaller Inno Setup drops into the install directory
pub const UNINSTALLER_NAME: &str = "unins000.exe";

const SILENT_FLAG: &str = "/SILENT";
const FALLBACK_INSTALLER_NAME: &str = "installer.exe";

/// Downloads and runs game installers
#[derive(Debug, Clone)]
pub struct Installer {
    client: Client,
}

impl Installer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Share the store API's HTTP client
    pub fn from_api(api: &ApiClient) -> Self {
        Self::new(api.http().clone())
    }

    /// Download `url` into `dest_dir`, returning the path of the saved file.
    /// The file name is taken from the last URL segment.
    pub async fn download(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
        let file_name = installer_file_name(url)?;
        let path = dest_dir.join(&file_name);
        log::info!("[installer] Downloading {} -> {:?}", url, path);

        create_dir_all(dest_dir)
            .await
            .with_context(|| format!("Failed to create download directory {:?}", dest_dir))?;

        let start = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to request {}", url))?;

        if !response.status().is_success() {
            anyhow::bail!("HTTP error {}: {}", response.status(), url);
        }

        // Partial downloads never sit at the final path
        let tmp_path = path.with_file_name(format!("{}.part", file_name));
        let downloaded = save_stream(response.bytes_stream(), &tmp_path).await?;

        tokio::fs::rename(&tmp_path, &path)
            .await
            .with_context(|| format!("Failed to move download into place: {:?}", path))?;

        log::info!(
            "[installer] Downloaded {} bytes in {:.2}s",
            downloaded,
            start.elapsed().as_secs_f64()
        );
        Ok(path)
    }

    /// Run `installer` silently into `install_dir`
    pub async fn install(&self, installer: &Path, install_dir: &Path) -> Result<()> {
        if !installer.is_file() {
            anyhow::bail!("Installer not found: {:?}", installer);
        }
        create_dir_all(install_dir)
            .await
            .with_context(|| format!("Failed to create install directory {:?}", install_dir))?;

        let mut command = tokio::process::Command::new(installer);
        push_dir_arg(&mut command, install_dir);
        command.arg(SILENT_FLAG);
        command.suppress_console();

        log::info!(
            "[installer] Installing {:?} into {:?}",
            installer,
            install_dir
        );
        run_to_completion(command, "Installer").await
    }

    /// Run the bundled uninstaller of the game in `install_dir`
    pub async fn uninstall(&self, install_dir: &Path) -> Result<()> {
        let uninstaller = uninstaller_path(install_dir);
        if !uninstaller.is_file() {
            anyhow::bail!("No uninstaller found at {:?}", uninstaller);
        }

        let mut command = tokio::process::Command::new(&uninstaller);
        command.arg(SILENT_FLAG);
        command.current_dir(install_dir);
        command.suppress_console();

        log::info!("[installer] Uninstalling game in {:?}", install_dir);
        run_to_completion(command, "Uninstaller").await
    }
}

/// Write `stream` to `path`, removing the file again if anything fails
async fn save_stream<S, B, E>(stream: S, path: &Path) -> Result<u64>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::error::Error + Send + Sync + 'static,
{
    match write_stream(stream, path).await {
        Ok(written) => Ok(written),
        Err(e) => {
            let _ = tokio::fs::remove_file(path).await;
            Err(e)
        }
    }
}

async fn write_stream<S, B, E>(stream: S, path: &Path) -> Result<u64>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut file = File::create(path)
        .await
        .with_context(|| format!("Failed to create {:?}", path))?;
    let mut written: u64 = 0;

    futures::pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Download interrupted")?;
        let bytes = chunk.as_ref();
        file.write_all(bytes)
            .await
            .with_context(|| format!("Failed to write {:?}", path))?;
        written += bytes.len() as u64;
    }
    file.flush().await?;
    file.sync_all()
        .await
        .with_context(|| format!("Failed to sync {:?}", path))?;
    Ok(written)
}

pub fn uninstaller_path(install_dir: &Path) -> PathBuf {
    install_dir.join(UNINSTALLER_NAME)
}

/// Last non-empty path segment of `url`, or a generic name
fn installer_file_name(url: &str) -> Result<String> {
    let parsed = Url::parse(url).with_context(|| format!("Invalid installer URL: {}", url))?;
    let name = parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|s| s.to_string())
        .unwrap_or_else(|| FALLBACK_INSTALLER_NAME.to_string());
    Ok(name)
}

/// Inno Setup reads `/DIR="<path>"` verbatim, so the quotes must survive
/// Windows argument escaping.
#[cfg(windows)]
fn push_dir_arg(command: &mut tokio::process::Command, install_dir: &Path) {
    command.raw_arg(format!("/DIR=\"{}\"", install_dir.display()));
}

#[cfg(not(windows))]
fn push_dir_arg(command: &mut tokio::process::Command, install_dir: &Path) {
    command.arg(format!("/DIR={}", install_dir.display()));
}

async fn run_to_completion(mut command: tokio::process::Command, what: &str) -> Result<()> {
    let status = command
        .status()
        .await
        .with_context(|| format!("Failed to start {}", what.to_lowercase()))?;

    if !status.success() {
        anyhow::bail!("{} exited with {}", what, status);
    }
    log::info!("[installer] {} finished", what);
    Ok(())
}
