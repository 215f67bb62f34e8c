//! Guided input wizard collecting a scan request one line at a time.
//!
//! States advance strictly in order:
//! url -> email -> tier -> consent -> ready -> submitting -> succeeded | failed.
//! The session-creation call only ever fires from `Submitting`, which is only
//! reachable from `ReadyToSubmit`, which in turn requires consent.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

use crate::api::ScanBackend;
use crate::errors::{ClientError, Result};
use crate::models::session::ScanRequest;
use crate::models::tier::Tier;

const BANNER: &str = "NULLSCAN - Autonomous Penetration Testing";
const URL_PROMPT: &str = "Enter target URL to begin reconnaissance:";
const EMAIL_PROMPT: &str = "Enter notification email:";
const TIER_ERROR: &str = "ERROR: Enter 1, 2, or 3.";
const CONSENT_ERROR: &str = "ERROR: Please type 'confirm' to authorize, or 'cancel' to abort.";
const SUBMIT_PROMPT: &str = "Press ENTER to initiate scan:";
const FAILED_PROMPT: &str = "Type 'retry' to try again or 'reset' to start over:";

/// Where the wizard hands off after a successful submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Handoff {
    /// Free scan: go straight to progress tracking.
    Track { session_id: Uuid },
    /// Paid scan: run checkout for the chosen tier first.
    Checkout { session_id: Uuid, tier: Tier },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum WizardState {
    CollectingUrl,
    CollectingEmail,
    CollectingTier,
    CollectingConsent,
    ReadyToSubmit,
    Submitting,
    Succeeded(Handoff),
    Failed { error: String },
}

impl WizardState {
    /// Whether the input line is enabled.
    pub fn accepts_input(&self) -> bool {
        !matches!(self, Self::Submitting | Self::Succeeded(_))
    }
}

/// One user action delivered to the wizard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardInput {
    Line(String),
    /// Global interrupt (Escape / Ctrl-C).
    Cancel,
}

impl WizardInput {
    pub fn line(text: impl Into<String>) -> Self {
        Self::Line(text.into())
    }
}

/// What the host should do after feeding input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Wait for the next line.
    Continue,
    /// The wizard entered `Submitting`; call [`Wizard::submit`].
    Submit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Input,
    System,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptLine {
    pub kind: LineKind,
    pub text: String,
}

/// Prefix `https://` when no scheme was typed.
pub fn normalize_target_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || has_scheme(trimmed) {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

static SCHEME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^https?://").expect("scheme regex should compile"));

fn has_scheme(url: &str) -> bool {
    SCHEME_PATTERN.is_match(url)
}

#[derive(Debug, Clone)]
pub struct Wizard {
    state: WizardState,
    target_url: Option<String>,
    contact_address: Option<String>,
    tier: Option<Tier>,
    consent: bool,
    transcript: Vec<TranscriptLine>,
}

impl Default for Wizard {
    fn default() -> Self {
        Self::new()
    }
}

impl Wizard {
    pub fn new() -> Self {
        let mut wizard = Self {
            state: WizardState::CollectingUrl,
            target_url: None,
            contact_address: None,
            tier: None,
            consent: false,
            transcript: Vec::new(),
        };
        wizard.system(BANNER);
        wizard.system("");
        wizard.system(URL_PROMPT);
        wizard
    }

    pub fn state(&self) -> &WizardState {
        &self.state
    }

    pub fn transcript(&self) -> &[TranscriptLine] {
        &self.transcript
    }

    pub fn target_url(&self) -> Option<&str> {
        self.target_url.as_deref()
    }

    pub fn contact_address(&self) -> Option<&str> {
        self.contact_address.as_deref()
    }

    pub fn tier(&self) -> Option<Tier> {
        self.tier
    }

    pub fn consent(&self) -> bool {
        self.consent
    }

    /// Feed one input. Never performs I/O.
    pub fn handle(&mut self, input: WizardInput) -> Step {
        let line = match input {
            WizardInput::Cancel => {
                if self.state == WizardState::Submitting {
                    tracing::debug!("Ignoring cancel while submitting");
                } else {
                    self.reset();
                }
                return Step::Continue;
            }
            WizardInput::Line(line) => line,
        };

        if !self.state.accepts_input() {
            tracing::debug!(state = ?self.state, "Ignoring input while disabled");
            return Step::Continue;
        }

        let trimmed = line.trim().to_string();
        match self.state.clone() {
            WizardState::CollectingUrl => self.on_url(&trimmed),
            WizardState::CollectingEmail => self.on_email(&trimmed),
            WizardState::CollectingTier => self.on_tier(&trimmed),
            WizardState::CollectingConsent => self.on_consent(&trimmed),
            WizardState::ReadyToSubmit => {
                self.input("INITIATE");
                return self.begin_submit();
            }
            WizardState::Failed { .. } => self.on_failed(&trimmed),
            WizardState::Submitting | WizardState::Succeeded(_) => {}
        }
        Step::Continue
    }

    fn on_url(&mut self, input: &str) {
        if input.is_empty() {
            return;
        }
        let url = normalize_target_url(input);
        self.input(&url);
        self.system("");
        self.system(&format!("Target: {url}"));
        self.system("");
        self.system(EMAIL_PROMPT);
        self.target_url = Some(url);
        self.state = WizardState::CollectingEmail;
    }

    fn on_email(&mut self, input: &str) {
        if !input.contains('@') {
            return;
        }
        self.input(input);
        self.contact_address = Some(input.to_string());
        self.system("");
        self.system("Select scan type:");
        self.system("");
        for (i, tier) in Tier::WIZARD_MENU.iter().enumerate() {
            let info = tier.info();
            self.system(&format!(
                "  [{}] {:<14} {} ({})",
                i + 1,
                info.name,
                info.description,
                tier.price_label()
            ));
        }
        self.system("");
        self.system("Enter 1, 2, or 3:");
        self.state = WizardState::CollectingTier;
    }

    fn on_tier(&mut self, input: &str) {
        self.input(input);
        let Some(tier) = Tier::from_menu_choice(input) else {
            self.system("");
            self.error(TIER_ERROR);
            return;
        };
        self.tier = Some(tier);
        self.consent = false;
        self.system("");
        self.confirmation_box(tier);
        self.system("");
        self.system("AUTHORIZATION REQUIRED:");
        self.system("Type 'confirm' to authorize security testing");
        self.system("(You must own or have permission to test this target)");
        self.state = WizardState::CollectingConsent;
    }

    fn on_consent(&mut self, input: &str) {
        match input {
            "confirm" => {
                self.input("confirm");
                self.consent = true;
                self.system("");
                self.system("Authorization confirmed.");
                self.system("");
                self.system(SUBMIT_PROMPT);
                self.state = WizardState::ReadyToSubmit;
            }
            "cancel" => {
                self.input("cancel");
                self.system("");
                self.system("Operation cancelled by user.");
                self.clear_fields();
                self.system("");
                self.system(URL_PROMPT);
                self.state = WizardState::CollectingUrl;
            }
            other => {
                self.input(other);
                self.system("");
                self.error(CONSENT_ERROR);
            }
        }
    }

    fn on_failed(&mut self, input: &str) {
        self.input(input);
        match input.to_ascii_lowercase().as_str() {
            "retry" => {
                self.system("");
                self.system(SUBMIT_PROMPT);
                self.state = WizardState::ReadyToSubmit;
            }
            "reset" => self.reset(),
            _ => self.system(FAILED_PROMPT),
        }
    }

    fn begin_submit(&mut self) -> Step {
        if !self.consent {
            // Unreachable through `handle`; kept as a hard stop.
            self.state = WizardState::CollectingConsent;
            return Step::Continue;
        }
        self.system("");
        let launching = match self.tier {
            Some(tier) if tier.is_paid() => "Processing payment...",
            _ => "Launching scan agents...",
        };
        self.system(launching);
        self.state = WizardState::Submitting;
        Step::Submit
    }

    /// Build the request from collected fields.
    fn request(&self) -> Option<ScanRequest> {
        if !self.consent {
            return None;
        }
        Some(ScanRequest::new(
            self.target_url.clone()?,
            self.contact_address.clone()?,
            self.tier?,
        ))
    }

    /// Create the session remotely. Only valid in `Submitting`.
    pub async fn submit(&mut self, backend: &dyn ScanBackend) -> Result<Handoff> {
        if self.state != WizardState::Submitting {
            return Err(ClientError::InvalidTransition(format!(
                "cannot submit from {:?}",
                self.state
            )));
        }
        let Some(request) = self.request() else {
            return Err(ClientError::InvalidTransition(
                "submission is missing fields".to_string(),
            ));
        };

        match backend.create_session(&request).await {
            Ok(session) => {
                let handoff = if request.tier().is_paid() {
                    self.system("Redirecting to payment...");
                    Handoff::Checkout {
                        session_id: session.id,
                        tier: request.tier(),
                    }
                } else {
                    self.system("Agents deployed successfully.");
                    self.system("");
                    self.system("Redirecting to operations center...");
                    Handoff::Track {
                        session_id: session.id,
                    }
                };
                tracing::info!(
                    session_id = %session.id,
                    tier = %request.tier(),
                    "Scan session created"
                );
                self.state = WizardState::Succeeded(handoff);
                Ok(handoff)
            }
            Err(e) => {
                let message = e.user_message();
                tracing::warn!(error = %e, "Scan session creation failed");
                self.system("");
                self.error(&format!("ERROR: {message}"));
                self.system("");
                self.system(FAILED_PROMPT);
                self.state = WizardState::Failed { error: message };
                Err(e)
            }
        }
    }

    /// Full reset to `CollectingUrl`. The transcript is kept.
    pub fn reset(&mut self) {
        self.clear_fields();
        self.system("");
        self.system("Session reset.");
        self.system("");
        self.system(URL_PROMPT);
        self.state = WizardState::CollectingUrl;
    }

    fn clear_fields(&mut self) {
        self.target_url = None;
        self.contact_address = None;
        self.tier = None;
        self.consent = false;
    }

    fn confirmation_box(&mut self, tier: Tier) {
        let info = tier.info();
        let selected = if tier.is_paid() {
            format!("Selected: {} ({})", info.name, tier.price_label())
        } else {
            format!("Selected: {}", info.name)
        };
        self.system(&selected);
        self.system("");

        let rows = [
            format!("Target: {}", self.target_url.as_deref().unwrap_or_default()),
            format!(
                "Email:  {}",
                self.contact_address.as_deref().unwrap_or_default()
            ),
            format!("Scan:   {}", info.name),
        ];
        let width = rows.iter().map(|r| r.chars().count()).max().unwrap_or(0) + 2;
        self.system(&format!("┌{}┐", "─".repeat(width)));
        for row in rows {
            let pad = width - 1 - row.chars().count();
            self.system(&format!("│ {row}{}│", " ".repeat(pad)));
        }
        self.system(&format!("└{}┘", "─".repeat(width)));
    }

    fn input(&mut self, text: &str) {
        self.push(LineKind::Input, format!("> {text}"));
    }

    fn system(&mut self, text: &str) {
        self.push(LineKind::System, text.to_string());
    }

    fn error(&mut self, text: &str) {
        self.push(LineKind::Error, text.to_string());
    }

    fn push(&mut self, kind: LineKind, text: String) {
        self.transcript.push(TranscriptLine { kind, text });
    }
}
