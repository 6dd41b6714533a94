use super::*;
use crate::api::{LaunchGrant, PlayTimeReporter, ReportError, SessionAuthority};
use crate::config::SessionConfig;
use crate::notify::{ChannelNotifier, SessionEvent};
use crate::process::{
    GameCommand, ProcessEvent, ProcessHandle, ProcessSpawner, SpawnedProcess, TerminateOutcome,
};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

// ---------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------

struct FakeAuthority {
    validate_result: Mutex<Result<String, String>>,
    session_valid: AtomicBool,
    validations: AtomicUsize,
    session_checks: AtomicUsize,
    /// When set, the next validation waits until the sender fires
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl FakeAuthority {
    fn new() -> Self {
        Self {
            validate_result: Mutex::new(Ok("K1".to_string())),
            session_valid: AtomicBool::new(true),
            validations: AtomicUsize::new(0),
            session_checks: AtomicUsize::new(0),
            gate: Mutex::new(None),
        }
    }

    fn hold_next_validation(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }
}

#[async_trait]
impl SessionAuthority for FakeAuthority {
    async fn validate_launch(&self, _game_id: GameId, _token: &str) -> Result<LaunchGrant> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let result = self.validate_result.lock().unwrap().clone();
        match result {
            Ok(temp_key) => Ok(LaunchGrant { temp_key }),
            Err(message) => Err(anyhow::anyhow!(message)),
        }
    }

    async fn is_session_valid(&self, _token: &str) -> Result<bool> {
        self.session_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.session_valid.load(Ordering::SeqCst))
    }
}

struct FakeReporter {
    baseline: Mutex<Result<u64, String>>,
    /// Scripted report results; `Ok` once exhausted
    results: Mutex<VecDeque<Result<(), ReportError>>>,
    reports: Mutex<Vec<(GameId, String, u64)>>,
}

impl FakeReporter {
    fn new(baseline: u64) -> Self {
        Self {
            baseline: Mutex::new(Ok(baseline)),
            results: Mutex::new(VecDeque::new()),
            reports: Mutex::new(Vec::new()),
        }
    }

    fn script(&self, results: impl IntoIterator<Item = Result<(), ReportError>>) {
        self.results.lock().unwrap().extend(results);
    }

    fn reports(&self) -> Vec<(GameId, String, u64)> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlayTimeReporter for FakeReporter {
    async fn fetch_baseline(&self, _game_id: GameId, _token: &str) -> Result<u64> {
        let baseline = self.baseline.lock().unwrap().clone();
        baseline.map_err(|message| anyhow::anyhow!(message))
    }

    async fn report_total(
        &self,
        game_id: GameId,
        token: &str,
        minutes: u64,
    ) -> std::result::Result<(), ReportError> {
        self.reports
            .lock()
            .unwrap()
            .push((game_id, token.to_string(), minutes));
        self.results.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

struct FakeProcess {
    pid: u32,
    alive: AtomicBool,
    ignores_term: bool,
    signals: Mutex<Vec<&'static str>>,
    events: mpsc::UnboundedSender<ProcessEvent>,
}

impl FakeProcess {
    /// The game quits on its own
    fn exit(&self, code: Option<i32>) {
        self.alive.store(false, Ordering::SeqCst);
        let _ = self.events.send(ProcessEvent::Exited { code });
    }

    fn signals(&self) -> Vec<&'static str> {
        self.signals.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn terminate(&self, graceful: bool) -> Result<TerminateOutcome> {
        if !self.is_alive() {
            return Ok(TerminateOutcome::AlreadyExited);
        }
        let outcome = if graceful && !self.ignores_term {
            self.signals.lock().unwrap().push("terminate");
            TerminateOutcome::Graceful
        } else {
            if graceful {
                self.signals.lock().unwrap().push("terminate");
            }
            self.signals.lock().unwrap().push("kill");
            TerminateOutcome::Forced
        };
        self.alive.store(false, Ordering::SeqCst);
        let _ = self.events.send(ProcessEvent::Exited { code: None });
        Ok(outcome)
    }
}

struct FakeSpawner {
    next_pid: AtomicU32,
    fail: Mutex<Option<String>>,
    ignores_term: AtomicBool,
    commands: Mutex<Vec<GameCommand>>,
    processes: Mutex<Vec<Arc<FakeProcess>>>,
}

impl FakeSpawner {
    fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(4242),
            fail: Mutex::new(None),
            ignores_term: AtomicBool::new(false),
            commands: Mutex::new(Vec::new()),
            processes: Mutex::new(Vec::new()),
        }
    }

    fn spawn_count(&self) -> usize {
        self.commands.lock().unwrap().len()
    }

    fn last_process(&self) -> Arc<FakeProcess> {
        self.processes
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no process spawned")
    }
}

#[async_trait]
impl ProcessSpawner for FakeSpawner {
    async fn spawn(&self, command: &GameCommand) -> Result<SpawnedProcess> {
        self.commands.lock().unwrap().push(command.clone());
        if let Some(message) = self.fail.lock().unwrap().clone() {
            anyhow::bail!(message);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let process = Arc::new(FakeProcess {
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            alive: AtomicBool::new(true),
            ignores_term: self.ignores_term.load(Ordering::SeqCst),
            signals: Mutex::new(Vec::new()),
            events: tx,
        });
        self.processes.lock().unwrap().push(process.clone());

        Ok(SpawnedProcess {
            handle: process,
            events: rx,
        })
    }
}

// ---------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------

struct Harness {
    manager: GameSessionManager,
    authority: Arc<FakeAuthority>,
    reporter: Arc<FakeReporter>,
    spawner: Arc<FakeSpawner>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Harness {
    fn new(config: SessionConfig) -> Self {
        let authority = Arc::new(FakeAuthority::new());
        let reporter = Arc::new(FakeReporter::new(100));
        let spawner = Arc::new(FakeSpawner::new());
        let (notifier, events) = ChannelNotifier::new();
        let manager = GameSessionManager::new(
            authority.clone(),
            reporter.clone(),
            spawner.clone(),
            Arc::new(notifier),
            config,
        );
        Self {
            manager,
            authority,
            reporter,
            spawner,
            events,
        }
    }

    fn events(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

fn config() -> SessionConfig {
    SessionConfig {
        supervisor_interval: Duration::from_secs(60),
        max_consecutive_report_failures: Some(10),
    }
}

/// Interval long enough that no supervisor tick happens during a test
fn quiet_config() -> SessionConfig {
    SessionConfig {
        supervisor_interval: Duration::from_secs(24 * 3600),
        ..config()
    }
}

fn request() -> LaunchRequest {
    LaunchRequest::new(2, "T1", "/games/body-defense/game.exe")
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------
// Launch
// ---------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn launch_validates_spawns_and_reports_periodically() {
    let mut h = Harness::new(config());

    let outcome = h.manager.launch(request()).await.unwrap();
    assert_eq!(outcome.pid, 4242);
    assert_eq!(h.manager.state(), SessionState::Active);
    assert!(h.manager.is_session_active(2));
    assert!(!h.manager.is_session_active(3));

    let command = h.spawner.commands.lock().unwrap()[0].clone();
    assert_eq!(
        command.args,
        vec!["-game_id", "2", "-key", "K1", "-token", "T1"]
    );

    let session = h.manager.active_session().unwrap();
    assert_eq!(session.baseline_play_minutes, 100);
    assert_eq!(session.process_id, Some(4242));

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(h.reporter.reports(), vec![(2, "T1".to_string(), 101)]);
    assert_eq!(h.authority.session_checks.load(Ordering::SeqCst), 1);

    h.spawner.last_process().exit(Some(0));
    h.manager.wait_until_idle().await;

    assert_eq!(h.reporter.reports().len(), 2);
    assert_eq!(h.reporter.reports()[1].2, 101);
    assert_eq!(
        h.events(),
        vec![
            SessionEvent::GameStarted {
                game_id: 2,
                pid: 4242
            },
            SessionEvent::GameStopped {
                game_id: 2,
                reason: TerminationReason::ProcessExited { code: Some(0) },
                minutes: 101,
            },
        ]
    );
    assert!(!h.manager.is_session_active(2));
}

#[tokio::test(start_paused = true)]
async fn second_launch_is_rejected_without_spawning() {
    let h = Harness::new(quiet_config());
    h.manager.launch(request()).await.unwrap();

    let err = h
        .manager
        .launch(LaunchRequest::new(3, "T1", "/games/other/game.exe"))
        .await
        .unwrap_err();

    assert_eq!(err, LaunchError::SessionConflict);
    assert_eq!(h.spawner.spawn_count(), 1);
    assert_eq!(h.authority.validations.load(Ordering::SeqCst), 1);
    assert!(h.manager.is_session_active(2));
}

#[tokio::test(start_paused = true)]
async fn concurrent_launches_start_one_game() {
    let h = Harness::new(quiet_config());

    let (a, b) = tokio::join!(
        h.manager.launch(request()),
        h.manager
            .launch(LaunchRequest::new(3, "T1", "/games/other/game.exe"))
    );

    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    assert!([a, b]
        .into_iter()
        .any(|r| r == Err(LaunchError::SessionConflict)));
    assert_eq!(h.spawner.spawn_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn validation_failure_spawns_nothing() {
    let mut h = Harness::new(quiet_config());
    *h.authority.validate_result.lock().unwrap() = Err("HTTP 403".to_string());

    let err = h.manager.launch(request()).await.unwrap_err();

    assert!(matches!(err, LaunchError::ValidationFailed { .. }));
    assert_eq!(h.spawner.spawn_count(), 0);
    assert_eq!(h.manager.state(), SessionState::Idle);
    assert!(h.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn spawn_failure_releases_the_slot() {
    let h = Harness::new(quiet_config());
    *h.spawner.fail.lock().unwrap() = Some("No such file".to_string());

    let err = h.manager.launch(request()).await.unwrap_err();
    assert!(matches!(err, LaunchError::LaunchFailed { ref reason } if reason.contains("No such file")));
    assert_eq!(h.manager.state(), SessionState::Idle);
    assert!(h.reporter.reports().is_empty());

    *h.spawner.fail.lock().unwrap() = None;
    assert!(h.manager.launch(request()).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn baseline_failure_counts_from_zero() {
    let mut h = Harness::new(quiet_config());
    *h.reporter.baseline.lock().unwrap() = Err("HTTP 500".to_string());

    h.manager.launch(request()).await.unwrap();
    assert_eq!(h.manager.active_session().unwrap().baseline_play_minutes, 0);

    tokio::time::sleep(Duration::from_secs(125)).await;
    h.spawner.last_process().exit(Some(0));
    h.manager.wait_until_idle().await;

    assert_eq!(h.reporter.reports(), vec![(2, "T1".to_string(), 2)]);
    assert!(h.events().iter().any(|e| matches!(
        e,
        SessionEvent::GameStopped { minutes: 2, .. }
    )));
}

#[tokio::test(start_paused = true)]
async fn cancelled_launch_returns_to_idle() {
    let h = Harness::new(quiet_config());
    let _gate = h.authority.hold_next_validation();

    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.launch(request()).await });
    settle().await;
    assert_eq!(h.manager.state(), SessionState::Launching);

    pending.abort();
    assert!(pending.await.unwrap_err().is_cancelled());
    assert_eq!(h.manager.state(), SessionState::Idle);

    assert!(h.manager.launch(request()).await.is_ok());
}

// ---------------------------------------------------------------------
// Termination
// ---------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn game_exit_reports_exactly_once() {
    let mut h = Harness::new(quiet_config());
    h.manager.launch(request()).await.unwrap();

    tokio::time::sleep(Duration::from_secs(10 * 60)).await;
    h.spawner.last_process().exit(Some(0));
    h.manager.wait_until_idle().await;
    settle().await;

    assert_eq!(h.reporter.reports(), vec![(2, "T1".to_string(), 110)]);
    let stopped: Vec<_> = h
        .events()
        .into_iter()
        .filter(|e| e.name() == "game-stopped")
        .collect();
    assert_eq!(stopped.len(), 1);
    assert!(h.spawner.last_process().signals().is_empty());
}

#[tokio::test(start_paused = true)]
async fn dead_process_without_exit_event_is_noticed_on_tick() {
    let mut h = Harness::new(config());
    h.manager.launch(request()).await.unwrap();

    // Gone, but the exit was never observed
    let process = h.spawner.last_process();
    process.alive.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(61)).await;
    h.manager.wait_until_idle().await;

    assert_eq!(h.reporter.reports(), vec![(2, "T1".to_string(), 101)]);
    assert!(process.signals().is_empty());
    assert_eq!(
        h.events(),
        vec![
            SessionEvent::GameStarted {
                game_id: 2,
                pid: 4242
            },
            SessionEvent::GameStopped {
                game_id: 2,
                reason: TerminationReason::ProcessExited { code: None },
                minutes: 101,
            },
        ]
    );
    assert_eq!(h.manager.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn process_failure_ends_the_session() {
    let mut h = Harness::new(quiet_config());
    h.manager.launch(request()).await.unwrap();

    let process = h.spawner.last_process();
    process.alive.store(false, Ordering::SeqCst);
    let _ = process.events.send(ProcessEvent::Failed {
        message: "boom".to_string(),
    });
    h.manager.wait_until_idle().await;
    settle().await;

    assert_eq!(h.reporter.reports(), vec![(2, "T1".to_string(), 100)]);
    assert_eq!(
        h.events(),
        vec![
            SessionEvent::GameStarted {
                game_id: 2,
                pid: 4242
            },
            SessionEvent::GameStopped {
                game_id: 2,
                reason: TerminationReason::ProcessFailed {
                    message: "boom".to_string()
                },
                minutes: 100,
            },
        ]
    );
    assert!(!h.manager.is_session_active(2));
}

#[tokio::test(start_paused = true)]
async fn invalidated_login_kills_the_game() {
    let mut h = Harness::new(config());
    h.spawner.ignores_term.store(true, Ordering::SeqCst);
    h.manager.launch(request()).await.unwrap();

    h.authority.session_valid.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(61)).await;
    h.manager.wait_until_idle().await;

    let process = h.spawner.last_process();
    assert_eq!(process.signals(), vec!["terminate", "kill"]);
    assert!(!process.is_alive());
    assert_eq!(h.reporter.reports(), vec![(2, "T1".to_string(), 101)]);
    assert_eq!(
        h.events(),
        vec![
            SessionEvent::GameStarted {
                game_id: 2,
                pid: 4242
            },
            SessionEvent::SessionInvalidated { game_id: 2 },
            SessionEvent::GameStopped {
                game_id: 2,
                reason: TerminationReason::AuthInvalidated,
                minutes: 101,
            },
        ]
    );
    assert_eq!(h.manager.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn refused_report_ends_the_session() {
    let mut h = Harness::new(config());
    h.reporter.script([Err(ReportError::Unauthorized)]);
    h.manager.launch(request()).await.unwrap();

    tokio::time::sleep(Duration::from_secs(61)).await;
    h.manager.wait_until_idle().await;

    assert_eq!(h.reporter.reports().len(), 2);
    assert_eq!(h.spawner.last_process().signals(), vec!["terminate"]);
    let names: Vec<_> = h.events().iter().map(|e| e.name()).collect();
    assert_eq!(
        names,
        vec!["game-started", "session-invalidated", "game-stopped"]
    );
}

#[tokio::test(start_paused = true)]
async fn repeated_report_failures_end_the_session() {
    let mut h = Harness::new(SessionConfig {
        max_consecutive_report_failures: Some(3),
        ..config()
    });
    h.reporter
        .script((0..10).map(|_| Err(ReportError::Transient("HTTP 502".to_string()))));
    h.manager.launch(request()).await.unwrap();

    tokio::time::sleep(Duration::from_secs(3 * 60 + 1)).await;
    h.manager.wait_until_idle().await;

    // three supervised attempts plus the final one
    assert_eq!(h.reporter.reports().len(), 4);
    assert!(h.events().iter().any(|e| matches!(
        e,
        SessionEvent::GameStopped {
            reason: TerminationReason::ReportingUnavailable,
            minutes: 103,
            ..
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn report_failures_without_cap_keep_the_game_running() {
    let h = Harness::new(SessionConfig {
        max_consecutive_report_failures: None,
        ..config()
    });
    h.reporter
        .script((0..20).map(|_| Err(ReportError::Transient("timeout".to_string()))));
    h.manager.launch(request()).await.unwrap();

    tokio::time::sleep(Duration::from_secs(10 * 60 + 1)).await;

    assert_eq!(h.manager.state(), SessionState::Active);
    assert_eq!(h.reporter.reports().len(), 10);
    assert!(h.spawner.last_process().is_alive());
}

#[tokio::test(start_paused = true)]
async fn successful_report_resets_failure_count() {
    let h = Harness::new(SessionConfig {
        max_consecutive_report_failures: Some(2),
        ..config()
    });
    let transient = || Err(ReportError::Transient("HTTP 503".to_string()));
    h.reporter
        .script([transient(), Ok(()), transient(), Ok(()), transient()]);
    h.manager.launch(request()).await.unwrap();

    tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;

    assert_eq!(h.manager.state(), SessionState::Active);
    assert_eq!(h.reporter.reports().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn finish_is_idempotent() {
    let mut h = Harness::new(quiet_config());
    let outcome = h.manager.launch(request()).await.unwrap();
    let inner = h.manager.inner.clone();

    let (first, second) = tokio::join!(
        inner.finish(outcome.session_id, TerminationReason::AppQuit),
        inner.finish(outcome.session_id, TerminationReason::WindowClosed)
    );
    assert!(first.is_some() ^ second.is_some());

    // a later exit event for the same session is ignored as well
    h.spawner.last_process().exit(Some(0));
    settle().await;

    assert_eq!(h.reporter.reports().len(), 1);
    let stopped = h
        .events()
        .into_iter()
        .filter(|e| e.name() == "game-stopped")
        .count();
    assert_eq!(stopped, 1);
    assert!(inner
        .finish(outcome.session_id, TerminationReason::AppQuit)
        .await
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn stop_leaves_no_supervisor_behind() {
    let h = Harness::new(config());
    h.manager.launch(request()).await.unwrap();

    let summary = h.manager.stop(StopCause::AppQuit).await.unwrap();
    assert_eq!(summary.reason, TerminationReason::AppQuit);
    assert_eq!(summary.report, ReportStatus::Delivered);
    assert_eq!(summary.final_minutes, 100);
    assert_eq!(h.spawner.last_process().signals(), vec!["terminate"]);

    tokio::time::sleep(Duration::from_secs(10 * 60)).await;

    assert_eq!(h.reporter.reports().len(), 1);
    assert_eq!(h.authority.session_checks.load(Ordering::SeqCst), 0);
    assert_eq!(h.manager.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn stop_when_idle_does_nothing() {
    let h = Harness::new(quiet_config());
    assert!(h.manager.stop(StopCause::WindowClosed).await.is_none());
    assert!(h.reporter.reports().is_empty());
}

#[tokio::test(start_paused = true)]
async fn window_close_during_launch_stops_the_new_game() {
    let h = Harness::new(quiet_config());
    let release = h.authority.hold_next_validation();

    let manager = h.manager.clone();
    let launch = tokio::spawn(async move { manager.launch(request()).await });
    settle().await;
    assert_eq!(h.manager.state(), SessionState::Launching);

    let manager = h.manager.clone();
    let stop = tokio::spawn(async move { manager.stop(StopCause::WindowClosed).await });
    settle().await;
    assert!(!stop.is_finished());

    release.send(()).unwrap();
    assert!(launch.await.unwrap().is_ok());

    let summary = stop.await.unwrap().unwrap();
    assert_eq!(summary.reason, TerminationReason::WindowClosed);
    assert_eq!(h.spawner.last_process().signals(), vec!["terminate"]);
    assert_eq!(h.manager.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn uninstall_only_stops_the_matching_game() {
    let h = Harness::new(quiet_config());
    h.manager.launch(request()).await.unwrap();

    assert!(h.manager.stop(StopCause::Uninstall(3)).await.is_none());
    assert!(h.manager.is_session_active(2));

    let summary = h.manager.stop(StopCause::Uninstall(2)).await.unwrap();
    assert_eq!(summary.reason, TerminationReason::Uninstalled);
    assert_eq!(summary.game_id, 2);
    assert!(!h.manager.is_session_active(2));
}

#[tokio::test(start_paused = true)]
async fn state_changes_are_published() {
    let h = Harness::new(quiet_config());
    let mut rx = h.manager.subscribe_state();
    assert_eq!(*rx.borrow(), SessionState::Idle);

    h.manager.launch(request()).await.unwrap();
    assert_eq!(*rx.borrow_and_update(), SessionState::Active);

    h.manager.stop(StopCause::AppQuit).await;
    assert!(rx.has_changed().unwrap());
    assert_eq!(*rx.borrow_and_update(), SessionState::Idle);
}
