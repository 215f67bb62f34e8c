//! Tiered content gate.
//!
//! Pure mapping from (report content, purchased tier) to what may be rendered.
//! Summary fields are always visible. Detail fields are revealed only once any
//! tier has been purchased; until then they are replaced by a fixed marker,
//! whether or not the backend actually supplied them.

use serde::Serialize;

use crate::models::report::{
    AttackSurface, CategoryResult, Constraint, Finding, Recommendation, ScanReport, ScanStats,
    Severity,
};
use crate::models::tier::{paid_only, Tier};

/// Placeholder rendered in place of locked content.
pub const LOCKED_MARKER: &str = "[LOCKED]";

/// Rendered state of one gated field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum DetailView {
    Revealed(String),
    Locked,
    /// Paid, but the backend has nothing for this field.
    Missing,
}

impl DetailView {
    fn of(value: Option<&String>, unlocked: bool) -> Self {
        match (unlocked, value) {
            (false, _) => Self::Locked,
            (true, Some(v)) => Self::Revealed(v.clone()),
            (true, None) => Self::Missing,
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked)
    }

    pub fn revealed(&self) -> Option<&str> {
        match self {
            Self::Revealed(v) => Some(v),
            _ => None,
        }
    }

    /// Text to render, or `None` when nothing should be shown.
    pub fn display(&self) -> Option<&str> {
        match self {
            Self::Revealed(v) => Some(v),
            Self::Locked => Some(LOCKED_MARKER),
            Self::Missing => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatedFinding {
    pub title: String,
    pub severity: Severity,
    pub affected_component: String,
    pub teaser: String,
    pub technical_detail: DetailView,
    pub reproduction_steps: DetailView,
    pub proof_of_concept: DetailView,
    pub fix_guidance: DetailView,
}

impl GatedFinding {
    pub fn locked_fields(&self) -> Vec<&'static str> {
        [
            ("technical_detail", &self.technical_detail),
            ("reproduction_steps", &self.reproduction_steps),
            ("proof_of_concept", &self.proof_of_concept),
            ("fix_guidance", &self.fix_guidance),
        ]
        .into_iter()
        .filter(|(_, view)| view.is_locked())
        .map(|(name, _)| name)
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatedRecommendation {
    pub priority: u32,
    pub title: String,
    pub description: DetailView,
    pub effort: DetailView,
    pub impact: DetailView,
}

/// Upsell copy for unpaid viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Upsell {
    pub value_prop: Option<String>,
    pub covers: Vec<String>,
    pub offered: Vec<Tier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatedStructuredReport {
    pub executive_summary: String,
    pub risk_rationale: String,
    pub scan_stats: ScanStats,
    pub categories_tested: Vec<CategoryResult>,
    pub attack_surface: AttackSurface,
    pub areas_of_interest: Vec<GatedFinding>,
    pub recommendations: Vec<GatedRecommendation>,
    pub constraints: Vec<Constraint>,
}

/// Everything a results view may render for one report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatedReport {
    pub target_url: String,
    pub risk_level: String,
    pub purchased_tier: Option<Tier>,
    pub findings: Vec<GatedFinding>,
    pub structured: Option<GatedStructuredReport>,
    pub upsell: Option<Upsell>,
}

impl GatedReport {
    pub fn is_unlocked(&self) -> bool {
        paid_only(self.purchased_tier).is_some()
    }
}

/// Gate a single finding.
pub fn gate(finding: &Finding, purchased: Option<Tier>) -> GatedFinding {
    let unlocked = paid_only(purchased).is_some();
    GatedFinding {
        title: finding.title.clone(),
        severity: finding.severity,
        affected_component: finding.affected_component.clone(),
        teaser: finding.teaser.clone(),
        technical_detail: DetailView::of(finding.technical_detail.as_ref(), unlocked),
        reproduction_steps: DetailView::of(finding.reproduction_steps.as_ref(), unlocked),
        proof_of_concept: DetailView::of(finding.proof_of_concept.as_ref(), unlocked),
        fix_guidance: DetailView::of(finding.fix_guidance.as_ref(), unlocked),
    }
}

fn gate_recommendation(rec: &Recommendation, unlocked: bool) -> GatedRecommendation {
    GatedRecommendation {
        priority: rec.priority,
        title: rec.title.clone(),
        description: DetailView::of(rec.description.as_ref(), unlocked),
        effort: DetailView::of(rec.effort.as_ref(), unlocked),
        impact: DetailView::of(rec.impact.as_ref(), unlocked),
    }
}

/// Gate a whole report against the purchased tier.
///
/// `purchased` is passed explicitly rather than read from the report so a
/// view can apply a purchase before the backend reflects it.
pub fn gate_report(report: &ScanReport, purchased: Option<Tier>) -> GatedReport {
    let purchased = paid_only(purchased);
    let unlocked = purchased.is_some();

    let structured = report.structured_report.as_ref().map(|s| {
        let mut recommendations: Vec<GatedRecommendation> = s
            .recommendations
            .iter()
            .map(|r| gate_recommendation(r, unlocked))
            .collect();
        recommendations.sort_by_key(|r| r.priority);

        GatedStructuredReport {
            executive_summary: s.executive_summary.clone(),
            risk_rationale: s.risk_rationale.clone(),
            scan_stats: s.scan_stats.clone(),
            categories_tested: s.categories_tested.clone(),
            attack_surface: s.attack_surface.clone(),
            areas_of_interest: s
                .areas_of_interest
                .iter()
                .map(|f| gate(f, purchased))
                .collect(),
            recommendations,
            constraints: s.constraints.clone(),
        }
    });

    let upsell = (!unlocked).then(|| {
        let source = report.structured_report.as_ref();
        Upsell {
            value_prop: source.and_then(|s| s.deep_scan_value_prop.clone()),
            covers: source
                .and_then(|s| s.what_deep_scan_covers.clone())
                .unwrap_or_default(),
            offered: Tier::upgrades_from(purchased),
        }
    });

    GatedReport {
        target_url: report.target_url.clone(),
        risk_level: report.effective_risk_level(),
        purchased_tier: purchased,
        findings: report.findings.iter().map(|f| gate(f, purchased)).collect(),
        structured,
        upsell,
    }
}
