//! Lifecycle events pushed to the UI
//!
//! The session manager emits these synchronously; sinks must not block.

use crate::session::{GameId, TerminationReason};
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SessionEvent {
    GameStarted {
        game_id: GameId,
        pid: u32,
    },
    GameStopped {
        game_id: GameId,
        reason: TerminationReason,
        minutes: u64,
    },
    SessionInvalidated {
        game_id: GameId,
    },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::GameStarted { .. } => "game-started",
            SessionEvent::GameStopped { .. } => "game-stopped",
            SessionEvent::SessionInvalidated { .. } => "session-invalidated",
        }
    }

    pub fn game_id(&self) -> GameId {
        match self {
            SessionEvent::GameStarted { game_id, .. }
            | SessionEvent::GameStopped { game_id, .. }
            | SessionEvent::SessionInvalidated { game_id } => *game_id,
        }
    }
}

/// Sink for session events
pub trait UiNotifier: Send + Sync {
    fn emit(&self, event: SessionEvent);
}

/// Writes events to the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl UiNotifier for LogNotifier {
    fn emit(&self, event: SessionEvent) {
        log::info!("[notify] {} (game {})", event.name(), event.game_id());
    }
}

/// Forwards events to an unbounded channel so the emitter never waits on the consumer
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl UiNotifier for ChannelNotifier {
    fn emit(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            log::debug!("[notify] Event receiver dropped; discarding event");
        }
    }
}
