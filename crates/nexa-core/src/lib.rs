//! Core library for the Nexa launcher.
//!
//! The interesting part lives in [`session`]: a single-slot game session
//! manager that validates a launch, supervises the game process, reports play
//! time while it runs and guarantees cleanup on every exit path. The other
//! modules are the collaborators it is wired to in production.

pub mod api;
pub mod config;
pub mod installer;
pub mod library;
pub mod notify;
pub mod process;
pub mod session;

// Re-export commonly used types
pub use api::{ApiClient, HttpPlayTimeReporter, HttpSessionAuthority, PlayTimeReporter, SessionAuthority};
pub use config::{ApiConfig, SessionConfig};
pub use notify::{SessionEvent, UiNotifier};
pub use process::{NativeSpawner, ProcessSpawner};
pub use session::{
    GameId, GameSessionManager, LaunchError, LaunchOutcome, LaunchRequest, SessionState,
    SessionSummary, StopCause, TerminationReason,
};
