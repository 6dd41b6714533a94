//! Local game library discovery

use anyhow::{Context, Result};
use directories::UserDirs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// `<Documents>/My Games`, where installers default to
pub fn default_search_dir() -> Option<PathBuf> {
    UserDirs::new()
        .and_then(|dirs| dirs.document_dir().map(|d| d.join("My Games")))
}

/// Recursively collect `.exe` files under `root`, sorted by path.
/// Entries that cannot be read are skipped.
pub fn find_executables(root: &Path) -> Result<Vec<PathBuf>> {
    let metadata =
        std::fs::metadata(root).with_context(|| format!("Cannot read directory {:?}", root))?;
    if !metadata.is_dir() {
        anyhow::bail!("Not a directory: {:?}", root);
    }

    let mut found: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::debug!("[library] Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_executable_name(entry.path()))
        .map(|entry| entry.into_path())
        .collect();

    found.sort();
    log::info!(
        "[library] Found {} executables under {:?}",
        found.len(),
        root
    );
    Ok(found)
}

fn is_executable_name(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"))
}
