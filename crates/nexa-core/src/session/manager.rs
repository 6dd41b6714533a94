//! Game session manager
//!
//! Owns the launcher's single game session slot. A launch moves the slot from
//! `Idle` through `Launching` to `Active`. Every way a session can end (the
//! game exiting, the supervisor noticing a dead process or a revoked login,
//! the host quitting or uninstalling) funnels into [`Inner::finish`], which
//! performs the final accounting exactly once per session.
//!
//! The slot lives behind a `std::sync::Mutex` that is never held across an
//! `.await`. Code that resumes after a network call re-checks the session id
//! before acting, so a stale session can never be reported or stopped twice.

use crate::api::{LaunchGrant, PlayTimeReporter, ReportError, SessionAuthority};
use crate::config::SessionConfig;
use crate::notify::{SessionEvent, UiNotifier};
use crate::process::{GameCommand, ProcessEvent, ProcessHandle, ProcessSpawner};
use crate::session::error::LaunchError;
use crate::session::supervisor;
use crate::session::types::{
    GameId, GameSession, LaunchOutcome, LaunchRequest, ReportStatus, SessionState,
    SessionSummary, StopCause, TerminationReason,
};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Launches and supervises at most one game at a time
#[derive(Clone)]
pub struct GameSessionManager {
    pub(super) inner: Arc<Inner>,
}

pub(super) struct Inner {
    pub(super) authority: Arc<dyn SessionAuthority>,
    pub(super) reporter: Arc<dyn PlayTimeReporter>,
    spawner: Arc<dyn ProcessSpawner>,
    notifier: Arc<dyn UiNotifier>,
    pub(super) config: SessionConfig,
    slot: Mutex<Slot>,
    state_tx: watch::Sender<SessionState>,
    next_session_id: AtomicU64,
}

#[derive(Default)]
struct Slot {
    /// Game of the launch in flight, if any
    launching: Option<GameId>,
    terminating: bool,
    active: Option<ActiveSession>,
}

impl Slot {
    fn state(&self) -> SessionState {
        if self.terminating {
            SessionState::Terminating
        } else if self.active.is_some() {
            SessionState::Active
        } else if self.launching.is_some() {
            SessionState::Launching
        } else {
            SessionState::Idle
        }
    }
}

struct ActiveSession {
    session: GameSession,
    process: Arc<dyn ProcessHandle>,
    supervisor: Option<SupervisorHandle>,
}

/// Ownership of the supervisor task of one session
struct SupervisorHandle {
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// The supervisor stops at its next suspension point and never starts
    /// another tick. Dropping the sender alone would also stop it.
    fn cancel(self) {
        let _ = self.cancel.send(());
        drop(self.task);
    }
}

/// Clears the launch-in-flight marker unless the launch completed
struct LaunchGuard<'a> {
    inner: &'a Inner,
    armed: bool,
}

impl Drop for LaunchGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut slot = self.inner.slot();
            slot.launching = None;
            self.inner.publish(&slot);
        }
    }
}

impl GameSessionManager {
    pub fn new(
        authority: Arc<dyn SessionAuthority>,
        reporter: Arc<dyn PlayTimeReporter>,
        spawner: Arc<dyn ProcessSpawner>,
        notifier: Arc<dyn UiNotifier>,
        config: SessionConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            inner: Arc::new(Inner {
                authority,
                reporter,
                spawner,
                notifier,
                config,
                slot: Mutex::new(Slot::default()),
                state_tx,
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    /// Validate, spawn and start supervising a game.
    ///
    /// Fails immediately with [`LaunchError::SessionConflict`] unless the
    /// manager is idle; there is no queueing.
    pub async fn launch(&self, request: LaunchRequest) -> Result<LaunchOutcome, LaunchError> {
        let inner = &*self.inner;
        {
            let mut slot = inner.slot();
            let state = slot.state();
            if state != SessionState::Idle {
                log::warn!(
                    "[session] Rejecting launch of game {}: session slot is {}",
                    request.game_id,
                    state.as_str()
                );
                return Err(LaunchError::SessionConflict);
            }
            slot.launching = Some(request.game_id);
            inner.publish(&slot);
        }
        let mut guard = LaunchGuard { inner, armed: true };

        log::info!("[session] Launch requested for game {}", request.game_id);

        let grant = match inner
            .authority
            .validate_launch(request.game_id, &request.auth_token)
            .await
        {
            Ok(grant) => grant,
            Err(e) => {
                log::error!(
                    "[session] Launch validation failed for game {}: {:#}",
                    request.game_id,
                    e
                );
                return Err(LaunchError::ValidationFailed {
                    reason: format!("{:#}", e),
                });
            }
        };

        // Fetched once per session. A failed fetch is not retried: the
        // session counts from zero and the stored total may be under-reported.
        let baseline = match inner
            .reporter
            .fetch_baseline(request.game_id, &request.auth_token)
            .await
        {
            Ok(minutes) => minutes,
            Err(e) => {
                log::warn!(
                    "[session] Could not fetch recorded play time for game {}, counting from 0: {:#}",
                    request.game_id,
                    e
                );
                0
            }
        };

        let command = build_command(&request, &grant);
        let spawned = match inner.spawner.spawn(&command).await {
            Ok(spawned) => spawned,
            Err(e) => {
                log::error!("[session] Failed to start game {}: {:#}", request.game_id, e);
                return Err(LaunchError::LaunchFailed {
                    reason: format!("{:#}", e),
                });
            }
        };

        let Some(pid) = spawned.handle.pid() else {
            log::error!(
                "[session] Game {} started without a process ID",
                request.game_id
            );
            return Err(LaunchError::LaunchFailed {
                reason: "process did not report an ID".to_string(),
            });
        };

        let session = GameSession {
            session_id: inner.next_session_id.fetch_add(1, Ordering::Relaxed),
            game_id: request.game_id,
            process_id: Some(pid),
            auth_token: request.auth_token.clone(),
            session_start_time: Instant::now(),
            started_at: Utc::now(),
            baseline_play_minutes: baseline,
        };
        let session_id = session.session_id;
        let game_id = session.game_id;

        {
            let mut slot = inner.slot();
            slot.active = Some(ActiveSession {
                session,
                process: spawned.handle,
                supervisor: None,
            });
            slot.launching = None;
            guard.armed = false;
            inner.publish(&slot);
            // Under the lock so no game-stopped can overtake it
            inner
                .notifier
                .emit(SessionEvent::GameStarted { game_id, pid });
        }

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(supervisor::run(self.inner.clone(), session_id, cancel_rx));
        let handle = SupervisorHandle {
            cancel: cancel_tx,
            task,
        };
        {
            let mut slot = inner.slot();
            let terminating = slot.terminating;
            match slot.active.as_mut() {
                Some(active) if active.session.session_id == session_id && !terminating => {
                    active.supervisor = Some(handle);
                }
                // A stop request already claimed the session
                _ => handle.cancel(),
            }
        }

        tokio::spawn(watch_process(self.inner.clone(), session_id, spawned.events));

        log::info!(
            "[session] Game {} running as session {} (PID {}, {} minutes recorded)",
            game_id,
            session_id,
            pid,
            baseline
        );

        Ok(LaunchOutcome { session_id, pid })
    }

    /// Whether a session for `game_id` exists
    pub fn is_session_active(&self, game_id: GameId) -> bool {
        self.inner
            .slot()
            .active
            .as_ref()
            .is_some_and(|active| active.session.game_id == game_id)
    }

    pub fn state(&self) -> SessionState {
        self.inner.slot().state()
    }

    /// Snapshot of the current session
    pub fn active_session(&self) -> Option<GameSession> {
        self.inner
            .slot()
            .active
            .as_ref()
            .map(|active| active.session.clone())
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Resolves once the slot is idle
    pub async fn wait_until_idle(&self) {
        let mut rx = self.inner.state_tx.subscribe();
        let _ = rx.wait_for(|state| *state == SessionState::Idle).await;
    }

    /// End the session on behalf of the host and wait for cleanup.
    ///
    /// App quit and window close wait out a launch in flight and then stop
    /// whatever it started; they return only once the slot is idle. An
    /// uninstall only touches a session of the game being removed.
    pub async fn stop(&self, cause: StopCause) -> Option<SessionSummary> {
        let mut state_rx = self.inner.state_tx.subscribe();
        loop {
            let (state, launching, active) = {
                let slot = self.inner.slot();
                (
                    slot.state(),
                    slot.launching,
                    slot.active
                        .as_ref()
                        .map(|a| (a.session.session_id, a.session.game_id)),
                )
            };

            if let StopCause::Uninstall(target) = cause {
                let involved = launching == Some(target)
                    || active.is_some_and(|(_, game_id)| game_id == target);
                if !involved {
                    return None;
                }
            }

            match (state, active) {
                (SessionState::Idle, _) => return None,
                (SessionState::Active, Some((session_id, game_id))) => {
                    log::info!(
                        "[session] Stopping game {} ({:?} requested)",
                        game_id,
                        cause
                    );
                    if let Some(summary) = self.inner.finish(session_id, cause.reason()).await {
                        return Some(summary);
                    }
                }
                _ => {
                    if state_rx.changed().await.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, slot: &Slot) {
        self.state_tx.send_replace(slot.state());
    }

    /// The session and its process, if `session_id` is still current and not
    /// being torn down
    pub(super) fn current(&self, session_id: u64) -> Option<(GameSession, Arc<dyn ProcessHandle>)> {
        let slot = self.slot();
        if slot.terminating {
            return None;
        }
        slot.active
            .as_ref()
            .filter(|active| active.session.session_id == session_id)
            .map(|active| (active.session.clone(), active.process.clone()))
    }

    /// Tear down `session_id`. Only the first call for a session does
    /// anything; later calls return `None`.
    pub(super) async fn finish(
        &self,
        session_id: u64,
        reason: TerminationReason,
    ) -> Option<SessionSummary> {
        let (session, process) = {
            let mut slot = self.slot();
            let current = slot.active.as_ref().map(|a| a.session.session_id);
            if slot.terminating || current != Some(session_id) {
                log::debug!(
                    "[session] Session {} already ended; ignoring {}",
                    session_id,
                    reason
                );
                return None;
            }
            slot.terminating = true;
            self.publish(&slot);

            let active = slot.active.as_mut()?;
            if let Some(supervisor) = active.supervisor.take() {
                supervisor.cancel();
            }
            (active.session.clone(), active.process.clone())
        };

        log::info!(
            "[session] Ending session {} for game {}: {}",
            session.session_id,
            session.game_id,
            reason
        );

        let final_minutes = session.total_minutes(Instant::now());

        if reason.forces_stop() {
            stop_process(process.as_ref(), session.game_id).await;
        }

        let report = match self
            .reporter
            .report_total(session.game_id, &session.auth_token, final_minutes)
            .await
        {
            Ok(()) => {
                log::info!(
                    "[session] Reported {} minutes for game {}",
                    final_minutes,
                    session.game_id
                );
                ReportStatus::Delivered
            }
            Err(ReportError::Unauthorized) => {
                log::warn!(
                    "[session] Final play time for game {} was refused ({} minutes lost)",
                    session.game_id,
                    final_minutes
                );
                ReportStatus::Unauthorized
            }
            Err(ReportError::Transient(message)) => {
                log::warn!(
                    "[session] Final play time for game {} could not be reported: {}",
                    session.game_id,
                    message
                );
                ReportStatus::Failed(message)
            }
        };

        if process.is_alive() {
            stop_process(process.as_ref(), session.game_id).await;
        }

        {
            let mut slot = self.slot();
            slot.active = None;
            slot.launching = None;
            slot.terminating = false;
            if reason == TerminationReason::AuthInvalidated {
                self.notifier.emit(SessionEvent::SessionInvalidated {
                    game_id: session.game_id,
                });
            }
            self.notifier.emit(SessionEvent::GameStopped {
                game_id: session.game_id,
                reason: reason.clone(),
                minutes: final_minutes,
            });
            self.publish(&slot);
        }

        Some(SessionSummary {
            session_id: session.session_id,
            game_id: session.game_id,
            pid: session.process_id,
            reason,
            final_minutes,
            report,
        })
    }
}

/// Game invocation: `-game_id <id> -key <temp key> -token <token>`
fn build_command(request: &LaunchRequest, grant: &LaunchGrant) -> GameCommand {
    GameCommand {
        program: request.executable_path.clone(),
        args: vec![
            "-game_id".to_string(),
            request.game_id.to_string(),
            "-key".to_string(),
            grant.temp_key.clone(),
            "-token".to_string(),
            request.auth_token.clone(),
        ],
        working_dir: request.working_dir.clone(),
        log_file: request.log_file.clone(),
    }
}

/// Translate process events of one session into termination triggers
async fn watch_process(
    inner: Arc<Inner>,
    session_id: u64,
    mut events: mpsc::UnboundedReceiver<ProcessEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ProcessEvent::Output { stream, line } => {
                log::debug!("[game:{}] {}: {}", session_id, stream.as_str(), line);
            }
            ProcessEvent::Exited { code } => {
                inner
                    .finish(session_id, TerminationReason::ProcessExited { code })
                    .await;
                return;
            }
            ProcessEvent::Failed { message } => {
                inner
                    .finish(session_id, TerminationReason::ProcessFailed { message })
                    .await;
                return;
            }
        }
    }
}

async fn stop_process(process: &dyn ProcessHandle, game_id: GameId) {
    if !process.is_alive() {
        return;
    }
    match process.terminate(true).await {
        Ok(outcome) => log::info!("[session] Game {} process stopped ({:?})", game_id, outcome),
        Err(e) => log::warn!("[session] Failed to stop game {} process: {:#}", game_id, e),
    }
}
