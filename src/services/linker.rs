//! Child-scan linker.
//!
//! Follows the deeper scan spawned by a pro/deep purchase. The child is polled
//! through the parent's child-status endpoint on the tracker's cadence. When
//! the child completes, the parent report is refetched once; when it fails, a
//! notice is raised and the parent's unlocked content is left alone.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::ScanBackend;
use crate::models::report::ScanReport;
use crate::models::session::{ChildLink, ChildStatus, ScanStatus};
use crate::models::tier::Tier;

pub const CHILD_FAILED_NOTICE: &str =
    "The deeper scan did not complete. Your unlocked report is unaffected.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkerPhase {
    Watching,
    /// Child finished and the parent report was refreshed (or already current).
    ChildCompleted,
    ChildFailed,
    /// Discovery found no child for this parent.
    NoChild,
}

impl LinkerPhase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Watching)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkerState {
    pub parent_session_id: Uuid,
    pub link: Option<ChildLink>,
    pub child_status: Option<ScanStatus>,
    pub phase: LinkerPhase,
    /// Parent report fetched after the child completed.
    pub refreshed_report: Option<ScanReport>,
    pub notice: Option<String>,
    pub polls: u64,
    pub report_refetches: u32,
}

impl LinkerState {
    fn new(parent_session_id: Uuid, link: Option<ChildLink>) -> Self {
        Self {
            parent_session_id,
            link,
            child_status: None,
            phase: LinkerPhase::Watching,
            refreshed_report: None,
            notice: None,
            polls: 0,
            report_refetches: 0,
        }
    }

    /// Banner shown beside the parent report while the child runs.
    pub fn banner(&self) -> Option<String> {
        if self.phase != LinkerPhase::Watching {
            return None;
        }
        let link = self.link.as_ref()?;
        let status = self.child_status.map_or("pending", |s| s.as_str());
        Some(format!(
            "{} scan in progress ({status}). This report will update when it finishes.",
            link.child_scan_type.info().name
        ))
    }
}

/// Handle owning the child polling task.
#[derive(Debug)]
pub struct Linker {
    state: watch::Receiver<LinkerState>,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Linker {
    /// Follow the child of `parent_id`. With no known link, the first poll
    /// discovers one or finds there is none.
    pub fn spawn(
        backend: Arc<dyn ScanBackend>,
        parent_id: Uuid,
        link: Option<ChildLink>,
        poll_interval: Duration,
    ) -> Self {
        let (tx, rx) = watch::channel(LinkerState::new(parent_id, link));
        let token = CancellationToken::new();
        tracing::info!(
            parent_session_id = %parent_id,
            child_session_id = ?link.map(|l| l.child_session_id),
            "Starting child scan linker"
        );
        let handle = tokio::spawn(run(backend, parent_id, poll_interval, tx, token.clone()));
        Self {
            state: rx,
            token,
            handle: Some(handle),
        }
    }

    pub fn state(&self) -> LinkerState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkerState> {
        self.state.clone()
    }

    pub async fn wait_terminal(&mut self) -> LinkerPhase {
        let reached = self
            .state
            .wait_for(|s| s.phase.is_terminal())
            .await
            .map(|s| s.phase);
        match reached {
            Ok(phase) => phase,
            Err(_) => self.state.borrow().phase,
        }
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Linker task ended abnormally");
            }
        }
    }
}

impl Drop for Linker {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// What one child-status observation means for the linker.
#[derive(Debug, PartialEq)]
enum Observation {
    Pending,
    Absent,
    Completed,
    Failed,
}

fn observe(status: &ChildStatus) -> Observation {
    if !status.has_child {
        return Observation::Absent;
    }
    match status.status {
        Some(ScanStatus::Completed) => Observation::Completed,
        Some(ScanStatus::Failed) | Some(ScanStatus::Expired) => Observation::Failed,
        _ => Observation::Pending,
    }
}

fn link_from(parent_id: Uuid, status: &ChildStatus, known: Option<ChildLink>) -> Option<ChildLink> {
    let child_id = status.child_scan_id?;
    let scan_type = status
        .scan_type
        .as_deref()
        .and_then(|raw| raw.parse::<Tier>().ok())
        .or(known.map(|l| l.child_scan_type))
        .unwrap_or(Tier::Pro);
    Some(ChildLink {
        parent_session_id: parent_id,
        child_session_id: child_id,
        child_scan_type: scan_type,
    })
}

async fn run(
    backend: Arc<dyn ScanBackend>,
    parent_id: Uuid,
    poll_interval: Duration,
    tx: watch::Sender<LinkerState>,
    token: CancellationToken,
) {
    let discovering = tx.borrow().link.is_none();
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut first = true;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }

        let fetched = tokio::select! {
            _ = token.cancelled() => break,
            result = backend.fetch_child_status(parent_id) => result,
        };
        let status = match fetched {
            Ok(status) => status,
            Err(e) => {
                if e.is_transient() {
                    tracing::debug!(parent_session_id = %parent_id, error = %e, "Child status poll failed, retrying");
                } else {
                    tracing::warn!(parent_session_id = %parent_id, error = %e, "Child status poll rejected");
                }
                tx.send_modify(|s| s.polls += 1);
                first = false;
                continue;
            }
        };

        let observation = observe(&status);
        tx.send_modify(|s| {
            s.polls += 1;
            if let Some(link) = link_from(parent_id, &status, s.link) {
                s.link = Some(link);
            }
            if status.has_child {
                s.child_status = status.status;
            }
        });

        match observation {
            Observation::Absent if discovering => {
                tx.send_modify(|s| s.phase = LinkerPhase::NoChild);
                tracing::debug!(parent_session_id = %parent_id, "No child scan to follow");
                break;
            }
            // A freshly launched child may not be visible yet.
            Observation::Absent | Observation::Pending => {}
            Observation::Failed => {
                tx.send_modify(|s| {
                    s.phase = LinkerPhase::ChildFailed;
                    s.notice = Some(CHILD_FAILED_NOTICE.to_string());
                });
                tracing::warn!(parent_session_id = %parent_id, "Child scan failed");
                break;
            }
            Observation::Completed if discovering && first => {
                // The report the view already holds includes the child's results.
                tx.send_modify(|s| s.phase = LinkerPhase::ChildCompleted);
                break;
            }
            Observation::Completed => {
                let refetched = tokio::select! {
                    _ = token.cancelled() => break,
                    result = backend.fetch_report(parent_id) => result,
                };
                match refetched {
                    Ok(report) => {
                        tx.send_modify(|s| {
                            s.report_refetches += 1;
                            s.refreshed_report = Some(report);
                            s.phase = LinkerPhase::ChildCompleted;
                        });
                        tracing::info!(parent_session_id = %parent_id, "Child scan completed, report refreshed");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            parent_session_id = %parent_id,
                            error = %e,
                            "Report refresh after child completion failed"
                        );
                    }
                }
            }
        }
        first = false;
    }
}
