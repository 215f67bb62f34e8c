//! Line-oriented terminal IO and the terminal payment prompt.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin, Stdout};
use tokio::sync::Mutex;

use crate::api::PaymentProcessor;
use crate::models::payment::{PaymentIntent, ProcessorOutcome};

/// One thing read from the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalInput {
    Line(String),
    /// Ctrl-C.
    Interrupt,
    Eof,
}

#[derive(Debug)]
pub struct Terminal {
    lines: Lines<BufReader<Stdin>>,
    out: Stdout,
}

pub type SharedTerminal = Arc<Mutex<Terminal>>;

impl Terminal {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            out: tokio::io::stdout(),
        }
    }

    pub fn shared(self) -> SharedTerminal {
        Arc::new(Mutex::new(self))
    }

    /// Wait for a line or an interrupt.
    pub async fn read(&mut self) -> TerminalInput {
        tokio::select! {
            line = self.lines.next_line() => match line {
                Ok(Some(line)) => TerminalInput::Line(line),
                Ok(None) => TerminalInput::Eof,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read from stdin");
                    TerminalInput::Eof
                }
            },
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                TerminalInput::Interrupt
            }
        }
    }

    pub async fn print(&mut self, line: &str) -> std::io::Result<()> {
        self.out.write_all(line.as_bytes()).await?;
        self.out.write_all(b"\n").await?;
        self.out.flush().await
    }

    pub async fn print_all<I, S>(&mut self, lines: I) -> std::io::Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            self.out.write_all(line.as_ref().as_bytes()).await?;
            self.out.write_all(b"\n").await?;
        }
        self.out.flush().await
    }
}

impl Default for Terminal {
    fn default() -> Self {
        Self::new()
    }
}

/// Stands in for the processor's hosted confirmation page: the user pays out
/// of band and pastes the confirmation id back.
#[derive(Debug, Clone)]
pub struct TerminalProcessor {
    terminal: SharedTerminal,
}

impl TerminalProcessor {
    pub fn new(terminal: SharedTerminal) -> Self {
        Self { terminal }
    }
}

/// Map the pasted answer to a processor outcome.
pub fn interpret_confirmation(input: &TerminalInput) -> ProcessorOutcome {
    match input {
        TerminalInput::Line(line) => {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("back") {
                ProcessorOutcome::Abandoned
            } else {
                ProcessorOutcome::Succeeded {
                    confirmation_id: trimmed.to_string(),
                }
            }
        }
        TerminalInput::Interrupt | TerminalInput::Eof => ProcessorOutcome::Abandoned,
    }
}

#[async_trait]
impl PaymentProcessor for TerminalProcessor {
    async fn confirm(&self, intent: &PaymentIntent) -> ProcessorOutcome {
        let mut terminal = self.terminal.lock().await;
        let prompt = [
            String::new(),
            format!(
                "Payment: {} (${}.{:02})",
                intent.tier.info().name,
                intent.amount / 100,
                intent.amount % 100
            ),
            "Complete payment with the processor, then paste the confirmation id.".to_string(),
            "Confirmation id (or 'back' to choose again):".to_string(),
        ];
        if let Err(e) = terminal.print_all(prompt).await {
            return ProcessorOutcome::Failed {
                message: format!("Could not show the payment prompt: {e}"),
            };
        }
        let input = terminal.read().await;
        interpret_confirmation(&input)
    }
}
