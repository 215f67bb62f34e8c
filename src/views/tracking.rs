//! Tracking view: live progress for one running session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::api::ScanBackend;
use crate::config::ClientConfig;
use crate::models::progress::{format_big_number, format_elapsed, ScanPhase};
use crate::services::tracker::{Tracker, TrackerPhase, TrackerState, TrackerTimings};
use crate::views::Screen;

/// Activity lines shown under the counters.
const ACTIVITY_TAIL: usize = 8;

/// Owns the tracker for the viewed session. Closing or dropping the view
/// stops polling.
#[derive(Debug)]
pub struct TrackingView {
    tracker: Tracker,
}

impl TrackingView {
    pub fn open(backend: Arc<dyn ScanBackend>, session_id: Uuid, config: &ClientConfig) -> Self {
        let timings = TrackerTimings {
            poll_interval: config.poll_interval,
            completion_delay: config.completion_delay,
        };
        Self {
            tracker: Tracker::spawn(backend, session_id, timings),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.tracker.session_id()
    }

    pub fn state(&self) -> TrackerState {
        self.tracker.state()
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<TrackerState> {
        self.tracker.subscribe()
    }

    /// Screen to move to, once tracking has ended.
    pub fn next_screen(&self) -> Option<Screen> {
        let state = self.tracker.state();
        Screen::after_tracking(state.session_id, state.phase, state.last_error.as_deref())
    }

    /// Wait for a terminal phase and return the screen it leads to.
    pub async fn run_to_exit(&mut self) -> Screen {
        let phase = self.tracker.wait_terminal().await;
        let state = self.tracker.state();
        Screen::after_tracking(state.session_id, phase, state.last_error.as_deref()).unwrap_or(
            Screen::Tracking {
                session_id: state.session_id,
            },
        )
    }

    /// Leave the view.
    pub async fn close(self) {
        self.tracker.shutdown().await;
    }
}

/// Text rendering of a tracker state.
pub fn render(state: &TrackerState, now: DateTime<Utc>) -> Vec<String> {
    let mut lines = Vec::new();
    let progress = &state.progress;

    let (target, elapsed, status) = match &state.session {
        Some(s) => (
            s.target_url.as_str(),
            format_elapsed(s.created_at, now),
            s.status.as_str(),
        ),
        None => ("...", "00:00".to_string(), "connecting"),
    };
    lines.push(format!("TARGET {target}  [{status}]  {elapsed}"));

    let current = progress.phase_index();
    let phases: Vec<String> = ScanPhase::ALL
        .iter()
        .map(|p| {
            if p.index() < current {
                format!("{} ✓", p.short())
            } else if p.index() == current {
                format!("[{}]", p.short())
            } else {
                p.short().to_string()
            }
        })
        .collect();
    lines.push(phases.join(" > "));
    if let Some(phase) = progress.current_phase {
        lines.push(format!("Phase: {}", phase.label()));
    }

    lines.push(format!(
        "Agents {}/{}  Tools {}  Tokens {}  Vulns {}  Cost ${:.2}",
        progress.agents_active,
        progress.agents_total,
        format_big_number(progress.tools_used),
        format_big_number(progress.tokens_in),
        progress.vulnerabilities_found,
        progress.cost
    ));

    for agent in &progress.active_agent_list {
        lines.push(format!("  * {} {}", agent.label, agent.description));
    }
    for finding in &progress.findings_so_far {
        lines.push(format!("  ! [{}] {}", finding.severity, finding.title));
    }

    let skip = progress.recent_activity.len().saturating_sub(ACTIVITY_TAIL);
    for entry in progress.recent_activity.iter().skip(skip) {
        lines.push(format!("  {} {}", entry.ts, entry.description));
    }

    match state.phase {
        TrackerPhase::Completing => lines.push("Scan complete. Loading results...".to_string()),
        TrackerPhase::Polling if state.last_error.is_some() => {
            lines.push("Connection issue, retrying...".to_string())
        }
        _ => {}
    }
    lines
}
