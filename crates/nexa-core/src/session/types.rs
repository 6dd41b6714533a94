/// Core types for game sessions
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tokio::time::Instant;

/// Store-side identifier of a game
pub type GameId = u64;

/// Request to launch an installed game
#[derive(Clone)]
pub struct LaunchRequest {
    /// Game being launched
    pub game_id: GameId,

    /// Login token of the player; authorizes every API call of the session
    pub auth_token: String,

    /// Path to the game executable
    pub executable_path: PathBuf,

    /// Working directory (defaults to the executable's directory)
    pub working_dir: Option<PathBuf>,

    /// File receiving the game's stdout/stderr (optional)
    pub log_file: Option<PathBuf>,
}

impl LaunchRequest {
    pub fn new(
        game_id: GameId,
        auth_token: impl Into<String>,
        executable_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            game_id,
            auth_token: auth_token.into(),
            executable_path: executable_path.into(),
            working_dir: None,
            log_file: None,
        }
    }

    pub fn with_log_file(mut self, log_file: impl Into<PathBuf>) -> Self {
        self.log_file = Some(log_file.into());
        self
    }

    pub fn with_working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(working_dir.into());
        self
    }
}

impl fmt::Debug for LaunchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchRequest")
            .field("game_id", &self.game_id)
            .field("auth_token", &"<redacted>")
            .field("executable_path", &self.executable_path)
            .field("working_dir", &self.working_dir)
            .field("log_file", &self.log_file)
            .finish()
    }
}

/// Successful launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LaunchOutcome {
    pub session_id: u64,
    pub pid: u32,
}

/// Lifecycle state of the session slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Launching,
    Active,
    Terminating,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Launching => "launching",
            SessionState::Active => "active",
            SessionState::Terminating => "terminating",
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminationReason {
    /// The game quit or crashed on its own
    ProcessExited { code: Option<i32> },
    /// The process could not be waited on
    ProcessFailed { message: String },
    /// The player's login session is no longer authoritative
    AuthInvalidated,
    /// Play time could not be reported for too many consecutive ticks
    ReportingUnavailable,
    /// The launcher is quitting
    AppQuit,
    /// The launcher window was closed
    WindowClosed,
    /// The game is being uninstalled
    Uninstalled,
}

impl TerminationReason {
    /// Reasons where the launcher, not the game, decides the session is over.
    /// The process is stopped before the final report for these.
    pub fn forces_stop(&self) -> bool {
        !matches!(
            self,
            TerminationReason::ProcessExited { .. } | TerminationReason::ProcessFailed { .. }
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::ProcessExited { .. } => "process_exited",
            TerminationReason::ProcessFailed { .. } => "process_failed",
            TerminationReason::AuthInvalidated => "auth_invalidated",
            TerminationReason::ReportingUnavailable => "reporting_unavailable",
            TerminationReason::AppQuit => "app_quit",
            TerminationReason::WindowClosed => "window_closed",
            TerminationReason::Uninstalled => "uninstalled",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::ProcessExited { code: Some(code) } => {
                write!(f, "process exited with code {}", code)
            }
            TerminationReason::ProcessExited { code: None } => write!(f, "process exited"),
            TerminationReason::ProcessFailed { message } => write!(f, "process failed: {}", message),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Host-initiated stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    AppQuit,
    WindowClosed,
    /// Only stops the session if it belongs to this game
    Uninstall(GameId),
}

impl StopCause {
    pub(crate) fn reason(&self) -> TerminationReason {
        match self {
            StopCause::AppQuit => TerminationReason::AppQuit,
            StopCause::WindowClosed => TerminationReason::WindowClosed,
            StopCause::Uninstall(_) => TerminationReason::Uninstalled,
        }
    }
}

/// One continuous run of a game process
#[derive(Clone, Serialize)]
pub struct GameSession {
    /// Generation number, unique per manager
    pub session_id: u64,

    pub game_id: GameId,

    /// Process ID of the running game
    pub process_id: Option<u32>,

    #[serde(skip_serializing)]
    pub auth_token: String,

    /// Monotonic anchor for play time
    #[serde(skip_serializing)]
    pub session_start_time: Instant,

    /// Wall-clock launch time
    #[serde(with = "chrono::serde::ts_seconds")]
    pub started_at: DateTime<Utc>,

    /// Minutes the server had recorded before this session
    pub baseline_play_minutes: u64,
}

impl GameSession {
    /// Whole minutes played in this session as of `now`
    pub fn elapsed_minutes(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.session_start_time).as_secs() / 60
    }

    /// Total play time to report: baseline plus this session's minutes
    pub fn total_minutes(&self, now: Instant) -> u64 {
        self.baseline_play_minutes
            .saturating_add(self.elapsed_minutes(now))
    }
}

impl fmt::Debug for GameSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameSession")
            .field("session_id", &self.session_id)
            .field("game_id", &self.game_id)
            .field("process_id", &self.process_id)
            .field("started_at", &self.started_at)
            .field("baseline_play_minutes", &self.baseline_play_minutes)
            .finish_non_exhaustive()
    }
}

/// Outcome of the final play time report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Delivered,
    Unauthorized,
    Failed(String),
}

/// What cleanup did for a finished session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: u64,
    pub game_id: GameId,
    pub pid: Option<u32>,
    pub reason: TerminationReason,
    pub final_minutes: u64,
    pub report: ReportStatus,
}
