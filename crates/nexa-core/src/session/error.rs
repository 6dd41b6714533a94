/// Errors returned to the caller of `launch`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LaunchError {
    #[error("Another game session is active.")]
    SessionConflict,

    #[error("Launch validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Could not start the game: {reason}")]
    LaunchFailed { reason: String },
}

impl LaunchError {
    /// Stable identifier for the frontend
    pub fn code(&self) -> &'static str {
        match self {
            LaunchError::SessionConflict => "session_conflict",
            LaunchError::ValidationFailed { .. } => "validation_failed",
            LaunchError::LaunchFailed { .. } => "launch_failed",
        }
    }
}
