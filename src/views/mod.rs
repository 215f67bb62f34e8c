//! View-scoped state. Each view owns the polling tasks it starts and tears
//! them down when it is closed or dropped.

pub mod results;
pub mod tracking;

use serde::Serialize;
use uuid::Uuid;

use crate::models::tier::Tier;
use crate::services::tracker::TrackerPhase;

/// Top-level screen of a client session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "screen", rename_all = "snake_case")]
pub enum Screen {
    Wizard,
    /// Checkout over a freshly created paid session.
    Checkout { session_id: Uuid, tier: Tier },
    Tracking { session_id: Uuid },
    Results { session_id: Uuid },
    /// Terminal scan failure with a restart affordance.
    ScanFailed { session_id: Uuid, message: String },
    /// Free report past retention; offers a fresh session.
    Expired { session_id: Uuid },
    /// Paid but not unlocked.
    ContactSupport { session_id: Uuid, message: String },
}

impl Screen {
    /// Screen reached when tracking ends in `phase`. `None` while tracking continues.
    pub fn after_tracking(session_id: Uuid, phase: TrackerPhase, error: Option<&str>) -> Option<Self> {
        match phase {
            TrackerPhase::Polling | TrackerPhase::Completing => None,
            TrackerPhase::ReadyForResults => Some(Self::Results { session_id }),
            TrackerPhase::Expired => Some(Self::Expired { session_id }),
            TrackerPhase::Failed => Some(Self::ScanFailed {
                session_id,
                message: "Scan failed. Start a new scan to try again.".to_string(),
            }),
            TrackerPhase::NotFound => Some(Self::ScanFailed {
                session_id,
                message: error.unwrap_or("Scan not found").to_string(),
            }),
        }
    }

    /// Whether this screen offers starting over with a new session.
    pub fn offers_restart(&self) -> bool {
        matches!(self, Self::ScanFailed { .. } | Self::Expired { .. })
    }
}
