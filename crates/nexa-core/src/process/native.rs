/// Native game process spawning and termination
use crate::config::KILL_GRACE_SECS;
use crate::process::{
    GameCommand, OutputStream, ProcessEvent, ProcessHandle, ProcessSpawner, SpawnedProcess,
    TerminateOutcome,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead};
use tokio::sync::mpsc;

#[cfg(windows)]
use crate::process::command::BackgroundCommandExt;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

type SharedLog = Arc<Mutex<std::io::BufWriter<std::fs::File>>>;

/// Spawns games with `tokio::process`
#[derive(Debug, Clone)]
pub struct NativeSpawner {
    kill_grace: Duration,
}

impl NativeSpawner {
    pub fn new(kill_grace: Duration) -> Self {
        Self { kill_grace }
    }
}

impl Default for NativeSpawner {
    fn default() -> Self {
        Self::new(Duration::from_secs(KILL_GRACE_SECS))
    }
}

#[async_trait]
impl ProcessSpawner for NativeSpawner {
    async fn spawn(&self, game: &GameCommand) -> Result<SpawnedProcess> {
        if !game.program.exists() && game.program.components().count() > 1 {
            anyhow::bail!("Game executable not found: {:?}", game.program);
        }

        let mut command = tokio::process::Command::new(&game.program);
        command.args(&game.args);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        if let Some(dir) = game.effective_working_dir() {
            if !dir.is_dir() {
                anyhow::bail!("Working directory is not a directory: {:?}", dir);
            }
            command.current_dir(dir);
        }

        let log = match &game.log_file {
            Some(path) => match open_log(path).await {
                Ok(log) => Some(log),
                Err(e) => {
                    log::warn!("[process] Game output will not be saved to {:?}: {:#}", path, e);
                    None
                }
            },
            None => None,
        };

        log::info!("[process] Exec command: {}", game.display_redacted());

        let mut child = command.spawn().context("Failed to spawn game process")?;
        let pid = child
            .id()
            .ok_or_else(|| anyhow::anyhow!("Failed to get process ID"))?;

        log::info!("[process] Game process started with PID: {}", pid);

        let (tx, rx) = mpsc::unbounded_channel();
        let exited = Arc::new(AtomicBool::new(false));

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, OutputStream::Stdout, tx.clone(), log.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, OutputStream::Stderr, tx.clone(), log.clone()));
        }

        let exited_flag = exited.clone();
        tokio::spawn(async move {
            let event = match child.wait().await {
                Ok(status) => {
                    if status.success() {
                        log::info!("[process] Game process (PID {}) exited successfully", pid);
                    } else {
                        log::warn!("[process] Game process (PID {}) exited with: {}", pid, status);
                    }
                    ProcessEvent::Exited {
                        code: status.code(),
                    }
                }
                Err(e) => {
                    log::error!("[process] Failed to wait for game process (PID {}): {}", pid, e);
                    ProcessEvent::Failed {
                        message: e.to_string(),
                    }
                }
            };
            exited_flag.store(true, Ordering::SeqCst);
            let _ = tx.send(event);
        });

        Ok(SpawnedProcess {
            handle: Arc::new(NativeProcess {
                pid,
                exited,
                kill_grace: self.kill_grace,
            }),
            events: rx,
        })
    }
}

async fn open_log(path: &Path) -> Result<SharedLog> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create log directory")?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context("Failed to open game log file")?;
    Ok(Arc::new(Mutex::new(std::io::BufWriter::new(file))))
}

async fn forward_lines<R>(
    reader: R,
    stream: OutputStream,
    tx: mpsc::UnboundedSender<ProcessEvent>,
    log: Option<SharedLog>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = tokio::io::BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(ref log) = log {
            if let Ok(mut f) = log.lock() {
                let _ = writeln!(f, "{}", line);
                let _ = f.flush();
            }
        }
        // Receiver gone means nobody is listening anymore; keep draining the pipe.
        let _ = tx.send(ProcessEvent::Output { stream, line });
    }
}

/// A game process started by [`NativeSpawner`]
pub struct NativeProcess {
    pid: u32,
    exited: Arc<AtomicBool>,
    kill_grace: Duration,
}

impl NativeProcess {
    async fn wait_for_exit(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.is_alive() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
        true
    }
}

#[async_trait]
impl ProcessHandle for NativeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn is_alive(&self) -> bool {
        !self.exited.load(Ordering::SeqCst) && process_exists(self.pid)
    }

    #[cfg(unix)]
    async fn terminate(&self, graceful: bool) -> Result<TerminateOutcome> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if !self.is_alive() {
            return Ok(TerminateOutcome::AlreadyExited);
        }

        let pid = Pid::from_raw(self.pid as i32);

        if graceful {
            match kill(pid, Signal::SIGTERM) {
                Ok(()) => {}
                Err(Errno::ESRCH) => return Ok(TerminateOutcome::AlreadyExited),
                Err(e) => return Err(e).context("Failed to send SIGTERM"),
            }
            if self.wait_for_exit(self.kill_grace).await {
                log::info!("[process] PID {} exited after SIGTERM", self.pid);
                return Ok(TerminateOutcome::Graceful);
            }
            log::warn!(
                "[process] PID {} didn't respond to SIGTERM within {:?}, sending SIGKILL",
                self.pid,
                self.kill_grace
            );
        }

        match kill(pid, Signal::SIGKILL) {
            Ok(()) => {}
            Err(Errno::ESRCH) => return Ok(TerminateOutcome::AlreadyExited),
            Err(e) => return Err(e).context("Failed to send SIGKILL"),
        }
        self.wait_for_exit(self.kill_grace).await;
        Ok(TerminateOutcome::Forced)
    }

    #[cfg(windows)]
    async fn terminate(&self, _graceful: bool) -> Result<TerminateOutcome> {
        if !self.is_alive() {
            return Ok(TerminateOutcome::AlreadyExited);
        }

        let output = tokio::process::Command::new("taskkill")
            .args(["/PID", &self.pid.to_string(), "/T", "/F"])
            .suppress_console()
            .output()
            .await
            .context("Failed to execute taskkill")?;

        if !output.status.success() {
            if !self.is_alive() {
                return Ok(TerminateOutcome::AlreadyExited);
            }
            anyhow::bail!(
                "Failed to kill process: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        self.wait_for_exit(self.kill_grace).await;
        Ok(TerminateOutcome::Forced)
    }
}

#[cfg(unix)]
fn process_exists(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        // Exists but belongs to someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(windows)]
fn process_exists(pid: u32) -> bool {
    use sysinfo::{Pid, ProcessesToUpdate, System};

    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}
