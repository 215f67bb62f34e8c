//! Terminal host: walks the screens of one client session on stdin/stdout.

pub mod terminal;

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::api::http::HttpScanBackend;
use crate::api::{PaymentProcessor, ScanBackend};
use crate::config::ClientConfig;
use crate::models::tier::Tier;
use crate::services::checkout::{CheckoutCoordinator, CheckoutError, CheckoutOutcome, CheckoutState};
use crate::services::wizard::{Handoff, Step, Wizard, WizardInput};
use crate::views::results::{PdfRequest, ResultsView};
use crate::views::tracking::{self, TrackingView};
use crate::views::Screen;

use self::terminal::{SharedTerminal, Terminal, TerminalInput, TerminalProcessor};

/// A command typed on the results screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultsCommand {
    Buy(Option<Tier>),
    Pdf,
    Show,
    NewScan,
    Quit,
    Unknown,
}

impl ResultsCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim().to_ascii_lowercase();
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("buy" | "upgrade" | "checkout"), tier) => {
                Self::Buy(tier.and_then(|t| t.parse::<Tier>().ok()).filter(|t| t.is_paid()))
            }
            (Some("unlock"), None) => Self::Buy(Some(Tier::Unlock)),
            (Some("pro"), None) => Self::Buy(Some(Tier::Pro)),
            (Some("deep"), None) => Self::Buy(Some(Tier::Deep)),
            (Some("pdf"), None) => Self::Pdf,
            (Some("show") | None, None) => Self::Show,
            (Some("new"), None) => Self::NewScan,
            (Some("quit" | "exit"), None) => Self::Quit,
            _ => Self::Unknown,
        }
    }
}

const RESULTS_HELP: &str = "Commands: buy [unlock|pro|deep], pdf, show, new, quit";

/// What a screen handler asks the host to do next.
enum Next {
    Go(Screen),
    Quit,
}

struct Host {
    config: ClientConfig,
    backend: Arc<dyn ScanBackend>,
    processor: Arc<dyn PaymentProcessor>,
    terminal: SharedTerminal,
}

/// Run an interactive session until the user quits or stdin closes.
pub async fn run(config: ClientConfig) -> anyhow::Result<()> {
    let backend: Arc<dyn ScanBackend> = Arc::new(HttpScanBackend::new(&config.api_url)?);
    let terminal = Terminal::new().shared();
    let processor: Arc<dyn PaymentProcessor> = Arc::new(TerminalProcessor::new(terminal.clone()));
    let host = Host {
        config,
        backend,
        processor,
        terminal,
    };

    let mut screen = Screen::Wizard;
    loop {
        tracing::debug!(screen = ?screen, "Entering screen");
        let next = match screen {
            Screen::Wizard => host.wizard().await?,
            Screen::Checkout { session_id, tier } => host.new_session_checkout(session_id, tier).await?,
            Screen::Tracking { session_id } => host.tracking(session_id).await?,
            Screen::Results { session_id } => host.results(session_id).await?,
            Screen::ScanFailed { message, .. } => host.restart_prompt(&message).await?,
            Screen::Expired { .. } => {
                host.restart_prompt("This free report has expired. Start a new scan for a fresh report.")
                    .await?
            }
            Screen::ContactSupport { message, .. } => {
                host.say(&message).await?;
                Next::Quit
            }
        };
        match next {
            Next::Go(s) => screen = s,
            Next::Quit => return Ok(()),
        }
    }
}

impl Host {
    async fn say(&self, line: &str) -> std::io::Result<()> {
        self.terminal.lock().await.print(line).await
    }

    async fn say_all(&self, lines: &[String]) -> std::io::Result<()> {
        self.terminal.lock().await.print_all(lines).await
    }

    async fn read(&self) -> TerminalInput {
        self.terminal.lock().await.read().await
    }

    async fn wizard(&self) -> anyhow::Result<Next> {
        let mut wizard = Wizard::new();
        let mut shown = 0;
        loop {
            let transcript = wizard.transcript();
            let fresh: Vec<String> = transcript[shown..].iter().map(|l| l.text.clone()).collect();
            shown = transcript.len();
            self.say_all(&fresh).await?;

            let input = match self.read().await {
                TerminalInput::Line(line) => WizardInput::Line(line),
                TerminalInput::Interrupt => WizardInput::Cancel,
                TerminalInput::Eof => return Ok(Next::Quit),
            };
            if wizard.handle(input) == Step::Submit {
                let submitted = wizard.submit(self.backend.as_ref()).await;
                let transcript = wizard.transcript();
                let fresh: Vec<String> =
                    transcript[shown..].iter().map(|l| l.text.clone()).collect();
                shown = transcript.len();
                self.say_all(&fresh).await?;
                match submitted {
                    Ok(Handoff::Track { session_id }) => {
                        return Ok(Next::Go(Screen::Tracking { session_id }))
                    }
                    Ok(Handoff::Checkout { session_id, tier }) => {
                        return Ok(Next::Go(Screen::Checkout { session_id, tier }))
                    }
                    // Failure is already in the transcript; the wizard offers retry/reset.
                    Err(_) => {}
                }
            }
        }
    }

    /// Paid wizard submission: pay for the chosen tier, then track the session.
    async fn new_session_checkout(&self, session_id: Uuid, tier: Tier) -> anyhow::Result<Next> {
        let mut checkout = CheckoutCoordinator::new(
            self.backend.clone(),
            self.processor.clone(),
            session_id,
            None,
            Some(tier),
            self.config.support_contact.clone(),
        );
        loop {
            match checkout.purchase(tier).await {
                Ok(_) => return Ok(Next::Go(Screen::Tracking { session_id })),
                Err(CheckoutError::BeforeCapture(message)) => {
                    self.say(&format!("ERROR: {message}")).await?;
                    self.say("Type 'retry' to pay again or 'skip' to continue with a free scan:")
                        .await?;
                    match self.read().await {
                        TerminalInput::Line(line) if line.trim().eq_ignore_ascii_case("retry") => {}
                        TerminalInput::Eof => return Ok(Next::Quit),
                        _ => return Ok(Next::Go(Screen::Tracking { session_id })),
                    }
                }
                Err(e @ CheckoutError::PaidButNotUnlocked { .. }) => {
                    return Ok(Next::Go(Screen::ContactSupport {
                        session_id,
                        message: e.to_string(),
                    }))
                }
                Err(CheckoutError::InvalidTransition(message)) => {
                    tracing::error!(session_id = %session_id, error = %message, "Checkout out of sequence");
                    return Ok(Next::Go(Screen::Tracking { session_id }));
                }
            }
        }
    }

    async fn tracking(&self, session_id: Uuid) -> anyhow::Result<Next> {
        let view = TrackingView::open(self.backend.clone(), session_id, &self.config);
        let mut rx = view.subscribe();
        let mut last: Vec<String> = Vec::new();
        self.say("Tracking scan. Press Ctrl-C to leave.").await?;

        let next = loop {
            let lines = tracking::render(&rx.borrow_and_update(), Utc::now());
            if lines != last {
                self.say_all(&lines).await?;
                last = lines;
            }
            if let Some(screen) = view.next_screen() {
                break Next::Go(screen);
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        break Next::Go(view.next_screen().unwrap_or(Screen::Wizard));
                    }
                }
                _ = tokio::signal::ctrl_c() => break Next::Go(Screen::Wizard),
            }
        };
        view.close().await;
        Ok(next)
    }

    async fn results(&self, session_id: Uuid) -> anyhow::Result<Next> {
        let mut view = match ResultsView::open(self.backend.clone(), session_id, &self.config).await {
            Ok(view) => view,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to load results");
                return Ok(Next::Go(Screen::ScanFailed {
                    session_id,
                    message: e.user_message(),
                }));
            }
        };
        if view.is_expired() {
            let screen = view.screen();
            view.close().await;
            return Ok(Next::Go(screen));
        }

        self.say_all(&view.render(Utc::now())).await?;
        self.say(RESULTS_HELP).await?;

        let next = loop {
            // Reads are cancel-safe; the timeout only gives the linker a chance to land.
            let input = tokio::select! {
                input = self.read() => input,
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if view.sync_linker() {
                        self.say("Deeper scan finished. Report updated.").await?;
                        self.say_all(&view.render(Utc::now())).await?;
                    }
                    continue;
                }
            };
            let line = match input {
                TerminalInput::Line(line) => line,
                TerminalInput::Interrupt => break Next::Go(Screen::Wizard),
                TerminalInput::Eof => break Next::Quit,
            };
            match ResultsCommand::parse(&line) {
                ResultsCommand::Show => {
                    view.sync_linker();
                    self.say_all(&view.render(Utc::now())).await?;
                }
                ResultsCommand::Buy(tier) => {
                    if let Some(screen) = self.results_checkout(&mut view, tier).await? {
                        break Next::Go(screen);
                    }
                }
                ResultsCommand::Pdf => match view.request_pdf().await {
                    Ok(PdfRequest::Sent) => self.say("PDF report sent to your email.").await?,
                    Ok(PdfRequest::NeedsCheckout) => {
                        self.say("The PDF is part of the full report.").await?;
                        if let Some(screen) = self.results_checkout(&mut view, None).await? {
                            break Next::Go(screen);
                        }
                    }
                    Err(e) => {
                        self.say(&format!("Failed to send PDF: {}. Type 'pdf' to try again.", e.user_message()))
                            .await?
                    }
                },
                ResultsCommand::NewScan => break Next::Go(Screen::Wizard),
                ResultsCommand::Quit => break Next::Quit,
                ResultsCommand::Unknown => self.say(RESULTS_HELP).await?,
            }
        };
        view.close().await;
        Ok(next)
    }

    /// Checkout from the results screen. Returns a screen only when the
    /// results screen must be left.
    async fn results_checkout(
        &self,
        view: &mut ResultsView,
        requested: Option<Tier>,
    ) -> anyhow::Result<Option<Screen>> {
        let mut checkout = view.open_checkout(self.processor.clone(), requested);
        loop {
            let CheckoutState::TierSelection { offered, default, error } = checkout.state().clone()
            else {
                return Ok(None);
            };
            if offered.is_empty() {
                self.say("Everything is already unlocked for this scan.").await?;
                return Ok(None);
            }
            if let Some(error) = error {
                self.say(&format!("ERROR: {error}")).await?;
            }
            self.say_all(&tier_menu(&offered, default)).await?;

            let tier = match self.read().await {
                TerminalInput::Line(line) => {
                    let line = line.trim().to_ascii_lowercase();
                    if line == "back" {
                        return Ok(None);
                    }
                    if line.is_empty() {
                        default
                    } else {
                        line.parse::<Tier>().ok()
                    }
                }
                TerminalInput::Interrupt | TerminalInput::Eof => return Ok(None),
            };
            let Some(tier) = tier.filter(|t| offered.contains(t)) else {
                self.say("Pick one of the listed tiers.").await?;
                continue;
            };

            match checkout.purchase(tier).await {
                Ok(outcome) => {
                    view.apply_checkout(outcome).await;
                    match outcome {
                        CheckoutOutcome::Unlocked { .. } => self.say("Report unlocked.").await?,
                        CheckoutOutcome::ChildLaunched { .. } => {
                            self.say("Report unlocked. Deeper scan started.").await?
                        }
                    }
                    self.say_all(&view.render(Utc::now())).await?;
                    return Ok(None);
                }
                Err(CheckoutError::BeforeCapture(_)) => continue,
                Err(e @ CheckoutError::PaidButNotUnlocked { .. }) => {
                    return Ok(Some(Screen::ContactSupport {
                        session_id: view.session_id(),
                        message: e.to_string(),
                    }))
                }
                Err(CheckoutError::InvalidTransition(message)) => {
                    tracing::error!(session_id = %view.session_id(), error = %message, "Checkout out of sequence");
                    return Ok(None);
                }
            }
        }
    }

    async fn restart_prompt(&self, message: &str) -> anyhow::Result<Next> {
        self.say(message).await?;
        self.say("Press ENTER to start a new scan, or type 'quit':").await?;
        match self.read().await {
            TerminalInput::Line(line) if line.trim().eq_ignore_ascii_case("quit") => Ok(Next::Quit),
            TerminalInput::Eof => Ok(Next::Quit),
            _ => Ok(Next::Go(Screen::Wizard)),
        }
    }
}

/// Checkout tier menu, default marked with `*`.
pub fn tier_menu(offered: &[Tier], default: Option<Tier>) -> Vec<String> {
    let mut menu = vec![String::new(), "Choose a tier:".to_string()];
    for tier in offered {
        let info = tier.info();
        let marker = if Some(*tier) == default { "*" } else { " " };
        menu.push(format!(
            " {marker} {:<7} {:>5}  {}",
            tier.as_str(),
            tier.price_label(),
            info.description
        ));
        for feature in info.features {
            menu.push(format!("            + {feature}"));
        }
    }
    menu.push("Tier (ENTER for default, 'back' to return):".to_string());
    menu
}
