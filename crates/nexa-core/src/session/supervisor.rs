//! Periodic supervision of the active session
//!
//! One task per session. Each tick checks the process, re-validates the login
//! session and pushes the running play time total. Anything that ends the
//! session is handed to `Inner::finish`.

use crate::api::ReportError;
use crate::session::manager::Inner;
use crate::session::types::TerminationReason;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};

enum Verdict {
    Continue,
    /// The session ended elsewhere
    Stale,
    Terminate(TerminationReason),
}

pub(super) async fn run(inner: Arc<Inner>, session_id: u64, mut cancel: oneshot::Receiver<()>) {
    let period = inner.config.supervisor_interval;
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures = 0u32;

    log::debug!(
        "[supervisor] Supervising session {} every {:?}",
        session_id,
        period
    );

    loop {
        tokio::select! {
            biased;
            _ = &mut cancel => break,
            _ = interval.tick() => {}
        }

        let verdict = tokio::select! {
            biased;
            _ = &mut cancel => break,
            verdict = tick(&inner, session_id, &mut failures) => verdict,
        };

        match verdict {
            Verdict::Continue => {}
            Verdict::Stale => break,
            Verdict::Terminate(reason) => {
                inner.finish(session_id, reason).await;
                break;
            }
        }
    }

    log::debug!("[supervisor] Supervisor for session {} stopped", session_id);
}

async fn tick(inner: &Inner, session_id: u64, failures: &mut u32) -> Verdict {
    let Some((session, process)) = inner.current(session_id) else {
        return Verdict::Stale;
    };

    if !process.is_alive() {
        log::info!(
            "[supervisor] Game {} process is no longer running",
            session.game_id
        );
        return Verdict::Terminate(TerminationReason::ProcessExited { code: None });
    }

    match inner.authority.is_session_valid(&session.auth_token).await {
        Ok(true) => {}
        Ok(false) => {
            log::warn!(
                "[supervisor] Login session for game {} was invalidated, stopping the game",
                session.game_id
            );
            return Verdict::Terminate(TerminationReason::AuthInvalidated);
        }
        // Unknown is not invalid; reporting below decides
        Err(e) => log::warn!(
            "[supervisor] Could not re-validate login session for game {}: {:#}",
            session.game_id,
            e
        ),
    }

    if inner.current(session_id).is_none() {
        return Verdict::Stale;
    }

    let total = session.total_minutes(Instant::now());
    match inner
        .reporter
        .report_total(session.game_id, &session.auth_token, total)
        .await
    {
        Ok(()) => {
            *failures = 0;
            log::debug!(
                "[supervisor] Reported {} minutes for game {}",
                total,
                session.game_id
            );
            Verdict::Continue
        }
        Err(ReportError::Unauthorized) => {
            log::warn!(
                "[supervisor] Play time report for game {} was refused, stopping the game",
                session.game_id
            );
            Verdict::Terminate(TerminationReason::AuthInvalidated)
        }
        Err(ReportError::Transient(message)) => {
            *failures += 1;
            log::warn!(
                "[supervisor] Play time report for game {} failed ({} in a row): {}",
                session.game_id,
                failures,
                message
            );
            match inner.config.max_consecutive_report_failures {
                Some(max) if *failures >= max => {
                    log::error!(
                        "[supervisor] Giving up on game {} after {} failed reports",
                        session.game_id,
                        failures
                    );
                    Verdict::Terminate(TerminationReason::ReportingUnavailable)
                }
                _ => Verdict::Continue,
            }
        }
    }
}
