/// Game session lifecycle: validation, launch, supervision, accounting and cleanup
pub mod error;
pub mod manager;
mod supervisor;
/// Data types shared by the manager and its callers
pub mod types;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use error::LaunchError;
pub use manager::GameSessionManager;
pub use types::{
    GameId, GameSession, LaunchOutcome, LaunchRequest, ReportStatus, SessionState,
    SessionSummary, StopCause, TerminationReason,
};
