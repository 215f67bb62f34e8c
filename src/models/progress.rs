//! Progress telemetry for a running scan and the monotonic merge rule.
//!
//! Polls may race or return a stale partial snapshot, so the displayed view
//! only ever moves forward: each counter keeps the maximum value observed,
//! the phase never regresses, and activity lines already shown are kept.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on retained activity lines.
pub const ACTIVITY_CAP: usize = 200;

/// Scan phases in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanPhase {
    Init,
    Recon,
    Probe,
    Attack,
    Analyze,
    Report,
}

impl ScanPhase {
    pub const ALL: [ScanPhase; 6] = [
        ScanPhase::Init,
        ScanPhase::Recon,
        ScanPhase::Probe,
        ScanPhase::Attack,
        ScanPhase::Analyze,
        ScanPhase::Report,
    ];

    pub fn from_id(id: &str) -> Option<Self> {
        match id.trim().to_ascii_lowercase().as_str() {
            "init" => Some(Self::Init),
            "recon" => Some(Self::Recon),
            "probe" => Some(Self::Probe),
            "attack" => Some(Self::Attack),
            "analyze" => Some(Self::Analyze),
            "report" => Some(Self::Report),
            _ => None,
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Init => "Initialize",
            Self::Recon => "Reconnaissance",
            Self::Probe => "Endpoint Probing",
            Self::Attack => "Attack Vectors",
            Self::Analyze => "Response Analysis",
            Self::Report => "Report Generation",
        }
    }

    pub fn short(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Recon => "RECON",
            Self::Probe => "PROBE",
            Self::Attack => "ATTACK",
            Self::Analyze => "ANALYZE",
            Self::Report => "REPORT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveAgent {
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub ts: String,
    pub description: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub line: Option<u64>,
}

/// Early finding reported while the scan is still running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarlyFinding {
    pub title: String,
    pub severity: String,
}

/// One polled sample of scan telemetry. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    #[serde(default, rename = "agents")]
    pub agents_total: Option<u64>,
    #[serde(default, rename = "active_agents")]
    pub agents_active: Option<u64>,
    #[serde(default, rename = "tools")]
    pub tools_used: Option<u64>,
    #[serde(default, rename = "input_tokens")]
    pub tokens_in: Option<u64>,
    #[serde(default, rename = "output_tokens")]
    pub tokens_out: Option<u64>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub vulnerabilities_found: Option<u64>,
    #[serde(default)]
    pub findings_so_far: Vec<EarlyFinding>,
    #[serde(default)]
    pub active_agent_list: Vec<ActiveAgent>,
    #[serde(default)]
    pub recent_activity: Vec<ActivityEntry>,
    #[serde(default)]
    pub current_phase: Option<String>,
}

impl ProgressSnapshot {
    /// An empty snapshot means the scan has not started reporting yet.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Progress response wrapper (`{scan_id, status, progress}`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressEnvelope {
    #[serde(default)]
    pub progress: Option<ProgressSnapshot>,
}

/// Accumulated, displayed progress for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressView {
    pub agents_total: u64,
    pub agents_active: u64,
    pub tools_used: u64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
    pub vulnerabilities_found: u64,
    pub findings_so_far: Vec<EarlyFinding>,
    pub active_agent_list: Vec<ActiveAgent>,
    pub recent_activity: Vec<ActivityEntry>,
    pub current_phase: Option<ScanPhase>,
    pub snapshots_applied: u64,
}

impl ProgressView {
    /// Merge a snapshot; returns `true` when anything displayed changed.
    pub fn merge(&mut self, snapshot: &ProgressSnapshot) -> bool {
        if snapshot.is_empty() {
            return false;
        }
        let before = self.clone();

        raise(&mut self.agents_total, snapshot.agents_total);
        raise(&mut self.agents_active, snapshot.agents_active);
        raise(&mut self.tools_used, snapshot.tools_used);
        raise(&mut self.tokens_in, snapshot.tokens_in);
        raise(&mut self.tokens_out, snapshot.tokens_out);
        raise(&mut self.vulnerabilities_found, snapshot.vulnerabilities_found);
        if let Some(cost) = snapshot.cost.filter(|c| c.is_finite()) {
            self.cost = self.cost.max(cost);
        }

        if let Some(phase) = snapshot.current_phase.as_deref().and_then(ScanPhase::from_id) {
            self.current_phase = Some(self.current_phase.map_or(phase, |p| p.max(phase)));
        }

        for finding in &snapshot.findings_so_far {
            if !self.findings_so_far.contains(finding) {
                self.findings_so_far.push(finding.clone());
            }
        }

        // Agent roster is a point-in-time list; an empty one is a partial snapshot.
        if !snapshot.active_agent_list.is_empty() {
            self.active_agent_list = snapshot.active_agent_list.clone();
        }

        self.merge_activity(&snapshot.recent_activity);

        let changed = *self != before;
        self.snapshots_applied += 1;
        changed
    }

    fn merge_activity(&mut self, entries: &[ActivityEntry]) {
        let mut added = false;
        for entry in entries {
            let seen = self
                .recent_activity
                .iter()
                .any(|e| e.ts == entry.ts && e.description == entry.description);
            if !seen {
                self.recent_activity.push(entry.clone());
                added = true;
            }
        }
        if added {
            self.recent_activity.sort_by(|a, b| a.ts.cmp(&b.ts));
            if self.recent_activity.len() > ACTIVITY_CAP {
                let excess = self.recent_activity.len() - ACTIVITY_CAP;
                self.recent_activity.drain(..excess);
            }
        }
    }

    pub fn phase_index(&self) -> usize {
        self.current_phase.map_or(0, |p| p.index())
    }
}

fn raise(slot: &mut u64, observed: Option<u64>) {
    if let Some(value) = observed {
        *slot = (*slot).max(value);
    }
}

/// Compact counter for display: `1.2M`, `45K`, `999`.
pub fn format_big_number(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{}K", n / 1_000)
    } else {
        n.to_string()
    }
}

/// Elapsed time since `created_at` as `mm:ss`.
pub fn format_elapsed(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = now.signed_duration_since(created_at).num_seconds().max(0);
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
