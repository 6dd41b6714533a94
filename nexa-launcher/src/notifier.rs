//! Console sink for session events
//!
//! Each event is printed as one `core://<event> <json>` line so a frontend
//! wrapping the launcher can pick it up from stdout.

use nexa_core::notify::{SessionEvent, UiNotifier};

#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

pub fn render(event: &SessionEvent) -> String {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    format!("core://{} {}", event.name(), payload)
}

impl UiNotifier for ConsoleNotifier {
    fn emit(&self, event: SessionEvent) {
        log::debug!("[notify] Emitting {} for game {}", event.name(), event.game_id());
        println!("{}", render(&event));
    }
}
