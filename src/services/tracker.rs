//! Scan lifecycle tracker.
//!
//! One tracker per viewed session. It runs two polling tasks on the same
//! cadence, one for coarse session status and one for progress telemetry, and
//! publishes a single merged [`TrackerState`] over a `watch` channel. Both
//! tasks write through `send_modify`, so the monotonic merge is the only path
//! by which displayed counters change.
//!
//! Dropping the tracker tears both tasks down.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::ScanBackend;
use crate::models::progress::ProgressView;
use crate::models::session::{ScanSession, ScanStatus};
use crate::models::tier::max_tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerPhase {
    Polling,
    /// Completed; waiting out the short delay before results.
    Completing,
    ReadyForResults,
    Failed,
    Expired,
    /// The backend does not know this session.
    NotFound,
}

impl TrackerPhase {
    /// Phases in which polling has stopped for good.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Polling | Self::Completing)
    }
}

/// Everything the tracking view renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerState {
    pub session_id: Uuid,
    pub session: Option<ScanSession>,
    pub progress: ProgressView,
    pub phase: TrackerPhase,
    pub status_polls: u64,
    pub progress_polls: u64,
    /// Number of times polling was stopped. Never exceeds one.
    pub stops: u32,
    pub last_error: Option<String>,
}

impl TrackerState {
    fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            session: None,
            progress: ProgressView::default(),
            phase: TrackerPhase::Polling,
            status_polls: 0,
            progress_polls: 0,
            stops: 0,
            last_error: None,
        }
    }

    pub fn status(&self) -> Option<ScanStatus> {
        self.session.as_ref().map(|s| s.status)
    }
}

/// Polling timings.
#[derive(Debug, Clone, Copy)]
pub struct TrackerTimings {
    pub poll_interval: Duration,
    pub completion_delay: Duration,
}

impl Default for TrackerTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5000),
            completion_delay: Duration::from_millis(2000),
        }
    }
}

/// Handle owning the polling tasks for one session.
#[derive(Debug)]
pub struct Tracker {
    session_id: Uuid,
    state: watch::Receiver<TrackerState>,
    /// Torn down with the view.
    view_token: CancellationToken,
    /// Child of `view_token`; cancelled when the session reaches a terminal status.
    poll_token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Tracker {
    /// Start polling `session_id`. Must be called inside a tokio runtime.
    pub fn spawn(backend: Arc<dyn ScanBackend>, session_id: Uuid, timings: TrackerTimings) -> Self {
        let (tx, rx) = watch::channel(TrackerState::new(session_id));
        let tx = Arc::new(tx);
        let view_token = CancellationToken::new();
        let poll_token = view_token.child_token();

        tracing::info!(session_id = %session_id, "Starting scan tracker");

        let status = tokio::spawn(status_loop(
            backend.clone(),
            session_id,
            timings,
            tx.clone(),
            view_token.clone(),
            poll_token.clone(),
        ));
        let progress = tokio::spawn(progress_loop(
            backend,
            session_id,
            timings.poll_interval,
            tx,
            poll_token.clone(),
        ));

        Self {
            session_id,
            state: rx,
            view_token,
            poll_token,
            handles: vec![status, progress],
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> TrackerState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackerState> {
        self.state.clone()
    }

    pub fn is_polling(&self) -> bool {
        !self.poll_token.is_cancelled()
    }

    /// Wait until the tracker reaches a terminal phase.
    pub async fn wait_terminal(&mut self) -> TrackerPhase {
        let reached = self
            .state
            .wait_for(|s| s.phase.is_terminal())
            .await
            .map(|s| s.phase);
        match reached {
            Ok(phase) => phase,
            // Senders live in the tasks; they only drop once those have exited.
            Err(_) => self.state.borrow().phase,
        }
    }

    /// Tear down all polling. Idempotent.
    pub fn stop(&self) {
        if !self.view_token.is_cancelled() {
            tracing::debug!(session_id = %self.session_id, "Stopping scan tracker");
            self.view_token.cancel();
        }
    }

    /// Stop and wait for the tasks to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Tracker task ended abnormally");
            }
        }
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.view_token.cancel();
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    // A slow fetch pushes the next tick back rather than bunching ticks up.
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Cancel polling once and record the terminal phase.
fn finish(
    tx: &watch::Sender<TrackerState>,
    poll_token: &CancellationToken,
    session_id: Uuid,
    phase: TrackerPhase,
) {
    if poll_token.is_cancelled() {
        return;
    }
    poll_token.cancel();
    tx.send_modify(|s| {
        s.phase = phase;
        s.stops += 1;
    });
    tracing::info!(session_id = %session_id, phase = ?phase, "Scan tracking stopped");
}

async fn status_loop(
    backend: Arc<dyn ScanBackend>,
    session_id: Uuid,
    timings: TrackerTimings,
    tx: Arc<watch::Sender<TrackerState>>,
    view_token: CancellationToken,
    poll_token: CancellationToken,
) {
    let mut interval = ticker(timings.poll_interval);
    loop {
        tokio::select! {
            _ = poll_token.cancelled() => break,
            _ = interval.tick() => {}
        }

        let fetched = tokio::select! {
            _ = poll_token.cancelled() => break,
            result = backend.fetch_session(session_id) => result,
        };

        let session = match fetched {
            Ok(session) => session,
            Err(e) if e.is_not_found() => {
                tracing::warn!(session_id = %session_id, error = %e, "Session not found");
                tx.send_modify(|s| {
                    s.status_polls += 1;
                    s.last_error = Some(e.user_message());
                });
                finish(&tx, &poll_token, session_id, TrackerPhase::NotFound);
                break;
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::warn!(session_id = %session_id, error = %e, "Status poll failed, retrying");
                } else {
                    tracing::error!(session_id = %session_id, error = %e, "Status poll rejected");
                }
                tx.send_modify(|s| {
                    s.status_polls += 1;
                    s.last_error = Some(e.user_message());
                });
                continue;
            }
        };

        let status = session.status;
        tx.send_modify(|s| {
            s.status_polls += 1;
            s.last_error = None;
            let previous = s.session.as_ref().and_then(|old| old.purchased_tier);
            let mut session = session;
            session.purchased_tier = max_tier(previous, session.purchased_tier);
            s.session = Some(session);
        });

        match status {
            ScanStatus::Completed => {
                finish(&tx, &poll_token, session_id, TrackerPhase::Completing);
                tokio::select! {
                    _ = view_token.cancelled() => {}
                    _ = tokio::time::sleep(timings.completion_delay) => {
                        tx.send_modify(|s| s.phase = TrackerPhase::ReadyForResults);
                        tracing::info!(session_id = %session_id, "Scan completed, results ready");
                    }
                }
                break;
            }
            ScanStatus::Failed => {
                finish(&tx, &poll_token, session_id, TrackerPhase::Failed);
                break;
            }
            ScanStatus::Expired => {
                finish(&tx, &poll_token, session_id, TrackerPhase::Expired);
                break;
            }
            ScanStatus::Pending | ScanStatus::Running => {}
        }
    }
}

async fn progress_loop(
    backend: Arc<dyn ScanBackend>,
    session_id: Uuid,
    period: Duration,
    tx: Arc<watch::Sender<TrackerState>>,
    poll_token: CancellationToken,
) {
    let mut interval = ticker(period);
    loop {
        tokio::select! {
            _ = poll_token.cancelled() => break,
            _ = interval.tick() => {}
        }

        let fetched = tokio::select! {
            _ = poll_token.cancelled() => break,
            result = backend.fetch_progress(session_id) => result,
        };

        match fetched {
            Ok(Some(snapshot)) => {
                tx.send_modify(|s| {
                    s.progress_polls += 1;
                    if s.progress.merge(&snapshot) {
                        tracing::trace!(session_id = %session_id, "Progress advanced");
                    }
                });
            }
            Ok(None) => tx.send_modify(|s| s.progress_polls += 1),
            Err(e) => {
                if e.is_transient() {
                    tracing::debug!(session_id = %session_id, error = %e, "Progress poll failed, retrying");
                } else {
                    tracing::warn!(session_id = %session_id, error = %e, "Progress poll rejected");
                }
                tx.send_modify(|s| s.progress_polls += 1);
            }
        }
    }
}
