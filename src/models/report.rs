//! Report content as delivered by the backend, locked fields included.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::models::tier::Tier;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    Critical,
    High,
    #[default]
    Medium,
    Low,
    Info,
}

impl Severity {
    /// Lenient parse; unknown labels fall back to `Info`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "critical" => Self::Critical,
            "high" => Self::High,
            "medium" => Self::Medium,
            "low" => Self::Low,
            _ => Self::Info,
        }
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_label(&raw))
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Critical => "Critical",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
            Self::Info => "Info",
        };
        f.write_str(label)
    }
}

/// A finding or area of interest. Detail fields exist at rest for every tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, alias = "endpoint")]
    pub affected_component: String,
    #[serde(default, alias = "impact")]
    pub teaser: String,
    #[serde(default)]
    pub technical_detail: Option<String>,
    #[serde(default)]
    pub reproduction_steps: Option<String>,
    #[serde(default, alias = "poc")]
    pub proof_of_concept: Option<String>,
    #[serde(default, alias = "recommendation")]
    pub fix_guidance: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub effort: Option<String>,
    #[serde(default)]
    pub impact: Option<String>,
}

fn default_priority() -> u32 {
    99
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanStats {
    pub endpoints_discovered: u64,
    pub endpoints_tested: u64,
    pub subdomains_found: u64,
    pub requests_sent: u64,
    pub duration_minutes: u64,
    pub technologies_identified: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryResult {
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub findings_count: u64,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub description: String,
    #[serde(default)]
    pub impact: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttackSurface {
    pub subdomains: Vec<String>,
    pub key_routes: Vec<String>,
    pub technologies: Vec<String>,
    pub auth_mechanisms: Vec<String>,
    pub external_services: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuredReport {
    pub executive_summary: String,
    pub risk_level: String,
    pub risk_rationale: String,
    pub scan_stats: ScanStats,
    pub categories_tested: Vec<CategoryResult>,
    pub attack_surface: AttackSurface,
    pub areas_of_interest: Vec<Finding>,
    pub recommendations: Vec<Recommendation>,
    pub constraints: Vec<Constraint>,
    pub deep_scan_value_prop: Option<String>,
    pub what_deep_scan_covers: Option<Vec<String>>,
}

/// Full report for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub scan_id: Uuid,
    pub target_url: String,
    #[serde(default = "default_risk_level")]
    pub risk_level: String,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub scan_type: String,
    #[serde(
        default,
        rename = "paid_tier",
        deserialize_with = "crate::models::tier::deserialize_paid_tier"
    )]
    pub purchased_tier: Option<Tier>,
    #[serde(default)]
    pub structured_report: Option<StructuredReport>,
    #[serde(default)]
    pub expired: bool,
    #[serde(default)]
    pub expires_in_days: Option<i64>,
}

fn default_risk_level() -> String {
    "Indeterminate".to_string()
}

impl ScanReport {
    /// Overall risk: the structured report's verdict, else the worst finding.
    pub fn effective_risk_level(&self) -> String {
        if let Some(report) = &self.structured_report {
            if !report.risk_level.is_empty() {
                return report.risk_level.clone();
            }
        }
        match self.findings.iter().map(|f| f.severity).min() {
            None => "Clean".to_string(),
            Some(Severity::Info) => "Low".to_string(),
            Some(worst) => worst.to_string(),
        }
    }
}
