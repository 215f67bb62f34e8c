//! Results view: gated report, retention countdown, checkout application,
//! PDF delivery, and the child-scan linker for deeper purchases.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::api::{PaymentProcessor, ScanBackend};
use crate::config::ClientConfig;
use crate::errors::Result;
use crate::models::report::ScanReport;
use crate::models::session::{ScanSession, ScanStatus};
use crate::models::tier::{max_tier, paid_only, Tier};
use crate::services::checkout::{CheckoutCoordinator, CheckoutOutcome};
use crate::services::fingerprint;
use crate::services::gate::{gate_report, GatedFinding, GatedReport};
use crate::services::linker::{Linker, LinkerPhase, LinkerState};
use crate::views::Screen;

/// Result of asking for the PDF report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdfRequest {
    /// The backend accepted the request and will email the PDF.
    Sent,
    /// Unpaid: checkout opens instead of calling the backend.
    NeedsCheckout,
}

pub struct ResultsView {
    backend: Arc<dyn ScanBackend>,
    config: ClientConfig,
    session_id: Uuid,
    session: ScanSession,
    report: Option<ScanReport>,
    purchased: Option<Tier>,
    gated: Option<GatedReport>,
    fingerprint: Option<String>,
    linker: Option<Linker>,
    /// Refetches taken from the linker so far.
    linker_refetches: u32,
    expired: bool,
}

impl std::fmt::Debug for ResultsView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultsView")
            .field("session_id", &self.session_id)
            .field("purchased", &self.purchased)
            .field("expired", &self.expired)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

impl ResultsView {
    /// Load the session and, unless it has expired, its report.
    ///
    /// The status fetch decides expiry; a cached report never overrides it.
    pub async fn open(
        backend: Arc<dyn ScanBackend>,
        session_id: Uuid,
        config: &ClientConfig,
    ) -> Result<Self> {
        let session = backend.fetch_session(session_id).await?;
        let mut view = Self {
            backend,
            config: config.clone(),
            session_id,
            purchased: paid_only(session.purchased_tier),
            session,
            report: None,
            gated: None,
            fingerprint: None,
            linker: None,
            linker_refetches: 0,
            expired: false,
        };

        if view.session.status == ScanStatus::Expired {
            view.expire();
            return Ok(view);
        }

        let report = view.backend.fetch_report(session_id).await?;
        if report.expired {
            view.expire();
            return Ok(view);
        }
        view.accept_report(report);
        view.linker = Some(Linker::spawn(
            view.backend.clone(),
            session_id,
            None,
            view.config.poll_interval,
        ));
        Ok(view)
    }

    fn expire(&mut self) {
        tracing::info!(session_id = %self.session_id, "Report expired");
        self.expired = true;
        self.report = None;
        self.gated = None;
        self.fingerprint = None;
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn session(&self) -> &ScanSession {
        &self.session
    }

    pub fn purchased_tier(&self) -> Option<Tier> {
        self.purchased
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    pub fn screen(&self) -> Screen {
        if self.expired {
            Screen::Expired {
                session_id: self.session_id,
            }
        } else {
            Screen::Results {
                session_id: self.session_id,
            }
        }
    }

    pub fn gated(&self) -> Option<&GatedReport> {
        self.gated.as_ref()
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    pub fn linker_state(&self) -> Option<LinkerState> {
        self.linker.as_ref().map(|l| l.state())
    }

    /// Days before a free report expires.
    pub fn expires_in_days(&self, now: DateTime<Utc>) -> Option<i64> {
        if self.purchased.is_some() {
            return None;
        }
        self.report
            .as_ref()
            .and_then(|r| r.expires_in_days)
            .or_else(|| {
                self.session
                    .expires_in_days(now, self.config.free_retention_days)
            })
    }

    fn accept_report(&mut self, report: ScanReport) -> bool {
        self.purchased = max_tier(self.purchased, report.purchased_tier);
        self.report = Some(report);
        self.rerender()
    }

    /// Re-gate the held report. Returns `true` when the output changed.
    pub fn rerender(&mut self) -> bool {
        let Some(report) = &self.report else {
            return false;
        };
        let gated = gate_report(report, self.purchased);
        let fp = fingerprint::compute_report(&gated);
        if self.fingerprint.as_deref() == Some(fp.as_str()) {
            return false;
        }
        self.fingerprint = Some(fp);
        self.gated = Some(gated);
        true
    }

    /// Pull any parent report refreshed by the linker. Returns `true` when
    /// the rendered report changed.
    pub fn sync_linker(&mut self) -> bool {
        let Some(state) = self.linker_state() else {
            return false;
        };
        if state.report_refetches <= self.linker_refetches {
            return false;
        }
        self.linker_refetches = state.report_refetches;
        match state.refreshed_report {
            Some(report) if !report.expired => self.accept_report(report),
            _ => false,
        }
    }

    /// Start checkout for this session.
    pub fn open_checkout(
        &self,
        processor: Arc<dyn PaymentProcessor>,
        preselected: Option<Tier>,
    ) -> CheckoutCoordinator {
        CheckoutCoordinator::new(
            self.backend.clone(),
            processor,
            self.session_id,
            self.purchased,
            preselected.or(self.config.preselected_tier),
            self.config.support_contact.clone(),
        )
    }

    /// Apply a successful checkout to the view.
    ///
    /// The purchased tier is raised locally first, so locked content already
    /// held opens even if the follow-up refetch fails.
    pub async fn apply_checkout(&mut self, outcome: CheckoutOutcome) -> bool {
        let tier = outcome.tier();
        self.session.apply_purchase(tier);
        self.purchased = max_tier(self.purchased, Some(tier));
        let mut changed = self.rerender();

        match self.backend.fetch_report(self.session_id).await {
            Ok(report) if !report.expired => changed |= self.accept_report(report),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "Report refresh after checkout failed");
            }
        }

        if let CheckoutOutcome::ChildLaunched { link, .. } = outcome {
            if let Some(old) = self.linker.take() {
                old.stop();
            }
            self.linker_refetches = 0;
            self.linker = Some(Linker::spawn(
                self.backend.clone(),
                self.session_id,
                Some(link),
                self.config.poll_interval,
            ));
        }
        changed
    }

    /// Ask for the PDF. Unpaid reports go to checkout without a backend call.
    pub async fn request_pdf(&self) -> Result<PdfRequest> {
        if self.purchased.is_none() {
            return Ok(PdfRequest::NeedsCheckout);
        }
        self.backend.request_pdf(self.session_id).await?;
        tracing::info!(session_id = %self.session_id, "PDF delivery requested");
        Ok(PdfRequest::Sent)
    }

    /// Leave the view.
    pub async fn close(mut self) {
        if let Some(linker) = self.linker.take() {
            linker.shutdown().await;
        }
    }

    /// Text rendering for the terminal.
    pub fn render(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut lines = Vec::new();
        if self.expired {
            lines.push("This free report has expired.".to_string());
            lines.push(format!(
                "Free reports are kept for {} days. Start a new scan to get a fresh report.",
                self.config.free_retention_days
            ));
            return lines;
        }
        let Some(gated) = &self.gated else {
            return lines;
        };

        lines.push(format!("REPORT {}", gated.target_url));
        lines.push(format!("Risk level: {}", gated.risk_level));
        match gated.purchased_tier {
            Some(tier) => lines.push(format!("Tier: {}", tier.info().name)),
            None => {
                if let Some(days) = self.expires_in_days(now) {
                    lines.push(format!("Free report, expires in {days} days"));
                }
            }
        }

        if let Some(state) = self.linker_state() {
            if let Some(banner) = state.banner() {
                lines.push(banner);
            }
            if state.phase == LinkerPhase::ChildFailed {
                if let Some(notice) = state.notice {
                    lines.push(notice);
                }
            }
        }

        if let Some(structured) = &gated.structured {
            if !structured.executive_summary.is_empty() {
                lines.push(String::new());
                lines.push(structured.executive_summary.clone());
            }
            let stats = &structured.scan_stats;
            lines.push(format!(
                "Endpoints {}/{}  Requests {}  Duration {}m",
                stats.endpoints_tested,
                stats.endpoints_discovered,
                stats.requests_sent,
                stats.duration_minutes
            ));
            for area in &structured.areas_of_interest {
                render_finding(&mut lines, area);
            }
            for rec in &structured.recommendations {
                lines.push(format!("  {}. {}", rec.priority, rec.title));
                if let Some(text) = rec.description.display() {
                    lines.push(format!("     {text}"));
                }
            }
        }

        for finding in &gated.findings {
            render_finding(&mut lines, finding);
        }

        if let Some(upsell) = &gated.upsell {
            lines.push(String::new());
            if let Some(prop) = &upsell.value_prop {
                lines.push(prop.clone());
            }
            for item in &upsell.covers {
                lines.push(format!("  + {item}"));
            }
            let offers: Vec<String> = upsell
                .offered
                .iter()
                .map(|t| format!("{} {}", t.as_str(), t.price_label()))
                .collect();
            lines.push(format!("Unlock: {}", offers.join(" | ")));
        }
        lines
    }
}

fn render_finding(lines: &mut Vec<String>, finding: &GatedFinding) {
    lines.push(String::new());
    lines.push(format!("[{}] {}", finding.severity, finding.title));
    if !finding.affected_component.is_empty() {
        lines.push(format!("  at {}", finding.affected_component));
    }
    if !finding.teaser.is_empty() {
        lines.push(format!("  {}", finding.teaser));
    }
    for (label, view) in [
        ("Details", &finding.technical_detail),
        ("Reproduce", &finding.reproduction_steps),
        ("PoC", &finding.proof_of_concept),
        ("Fix", &finding.fix_guidance),
    ] {
        if let Some(text) = view.display() {
            lines.push(format!("  {label}: {text}"));
        }
    }
}
