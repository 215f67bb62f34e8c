//! Scan request and the client-side projection of a server-owned scan session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::tier::{deserialize_paid_tier, max_tier, paid_only, Tier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Expired,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }
}

/// Validated scan request. Only the wizard builds one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanRequest {
    target_url: String,
    #[serde(rename = "email")]
    contact_address: String,
    #[serde(skip)]
    tier: Tier,
    consent: bool,
}

impl ScanRequest {
    pub(crate) fn new(target_url: String, contact_address: String, tier: Tier) -> Self {
        Self {
            target_url,
            contact_address,
            tier,
            consent: true,
        }
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    pub fn contact_address(&self) -> &str {
        &self.contact_address
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn consent(&self) -> bool {
        self.consent
    }
}

/// Session status row as returned by the backend.
#[derive(Debug, Clone, Deserialize)]
struct SessionRecord {
    id: Uuid,
    status: ScanStatus,
    target_url: String,
    #[serde(deserialize_with = "timestamp::deserialize")]
    created_at: DateTime<Utc>,
    #[serde(default = "default_scan_type")]
    scan_type: String,
    #[serde(default, deserialize_with = "deserialize_paid_tier")]
    paid_tier: Option<Tier>,
    #[serde(default)]
    expired: bool,
}

fn default_scan_type() -> String {
    "quick".to_string()
}

/// Read-only projection of a scan session, refreshed by polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SessionRecord")]
pub struct ScanSession {
    pub id: Uuid,
    pub status: ScanStatus,
    pub target_url: String,
    pub created_at: DateTime<Utc>,
    pub scan_type: String,
    #[serde(rename = "paid_tier")]
    pub purchased_tier: Option<Tier>,
}

impl From<SessionRecord> for ScanSession {
    fn from(r: SessionRecord) -> Self {
        // The expiry flag wins over whatever status the row still carries.
        let status = if r.expired {
            ScanStatus::Expired
        } else {
            r.status
        };
        Self {
            id: r.id,
            status,
            target_url: r.target_url,
            created_at: r.created_at,
            scan_type: r.scan_type,
            purchased_tier: r.paid_tier,
        }
    }
}

impl ScanSession {
    pub fn is_paid(&self) -> bool {
        paid_only(self.purchased_tier).is_some()
    }

    /// Record a successful purchase. Tiers only ever move upwards.
    pub fn apply_purchase(&mut self, tier: Tier) {
        self.purchased_tier = max_tier(self.purchased_tier, Some(tier));
    }

    /// Days left before a free report expires; `None` for paid sessions.
    pub fn expires_in_days(&self, now: DateTime<Utc>, retention_days: i64) -> Option<i64> {
        if self.is_paid() {
            return None;
        }
        let age = now.signed_duration_since(self.created_at).num_days();
        Some((retention_days - age).max(0))
    }
}

/// Established parent→child relationship after a deeper-scan purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildLink {
    pub parent_session_id: Uuid,
    pub child_session_id: Uuid,
    pub child_scan_type: Tier,
}

/// Child-status response for a parent session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildStatus {
    pub has_child: bool,
    #[serde(default)]
    pub child_scan_id: Option<Uuid>,
    #[serde(default)]
    pub status: Option<ScanStatus>,
    #[serde(default)]
    pub scan_type: Option<String>,
}

impl ChildStatus {
    pub fn none() -> Self {
        Self {
            has_child: false,
            child_scan_id: None,
            status: None,
            scan_type: None,
        }
    }
}

/// Server timestamps may arrive without an offset; those are UTC.
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| naive.and_utc())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }
}
