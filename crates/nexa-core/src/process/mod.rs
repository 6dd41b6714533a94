//! Game process capability
//!
//! The session manager only sees [`ProcessSpawner`] and [`ProcessHandle`];
//! [`NativeSpawner`] is the `tokio::process` implementation used by the
//! launcher.

pub mod command;
pub mod native;

pub use native::NativeSpawner;

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Arguments whose values are credentials and must not reach the logs
const SECRET_FLAGS: &[&str] = &["-key", "-token"];

/// A fully built game invocation
#[derive(Clone)]
pub struct GameCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

impl GameCommand {
    /// Human-readable command line with credential values masked
    pub fn display_redacted(&self) -> String {
        let mut parts = vec![quote_arg(&self.program.to_string_lossy())];
        let mut mask_next = false;
        for arg in &self.args {
            if mask_next {
                parts.push("***".to_string());
                mask_next = false;
                continue;
            }
            mask_next = SECRET_FLAGS.contains(&arg.as_str());
            parts.push(quote_arg(arg));
        }
        parts.join(" ")
    }

    /// Directory the game runs in: explicit, else the executable's parent
    pub fn effective_working_dir(&self) -> Option<PathBuf> {
        self.working_dir.clone().or_else(|| {
            self.program
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_path_buf())
        })
    }
}

impl std::fmt::Debug for GameCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display_redacted())
    }
}

/// Quoting helper for logged command lines
pub(crate) fn quote_arg(s: &str) -> String {
    if s.is_empty() {
        return "\"\"".to_string();
    }
    if s.chars().any(|c| c.is_whitespace() || c == '"') {
        let esc = s.replace('\\', "\\\\").replace('"', "\\\"");
        return format!("\"{}\"", esc);
    }
    s.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// Lifetime events of a spawned process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Output { stream: OutputStream, line: String },
    Exited { code: Option<i32> },
    Failed { message: String },
}

/// How a terminate request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    AlreadyExited,
    Graceful,
    Forced,
}

/// Handle to a running process
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    fn pid(&self) -> Option<u32>;

    fn is_alive(&self) -> bool;

    /// Stop the process. With `graceful` the process is asked to exit first
    /// and killed once the grace window passes; without it, it is killed
    /// immediately. Platforms without a polite signal always kill.
    async fn terminate(&self, graceful: bool) -> Result<TerminateOutcome>;
}

/// A started process plus its event stream.
/// Dropping `events` unsubscribes.
pub struct SpawnedProcess {
    pub handle: Arc<dyn ProcessHandle>,
    pub events: mpsc::UnboundedReceiver<ProcessEvent>,
}

#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    async fn spawn(&self, command: &GameCommand) -> Result<SpawnedProcess>;
}
