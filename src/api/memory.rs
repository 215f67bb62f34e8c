//! Scripted in-memory backend and processor for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::api::{PaymentProcessor, ScanBackend};
use crate::errors::{ClientError, Result};
use crate::models::payment::{
    IntentStatus, PaymentConfirmation, PaymentIntent, ProcessorOutcome,
};
use crate::models::progress::ProgressSnapshot;
use crate::models::report::ScanReport;
use crate::models::session::{ChildStatus, ScanRequest, ScanSession, ScanStatus};
use crate::models::tier::Tier;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Reply<T> {
    Ok(T),
    /// Transient failure (503).
    Unavailable,
    /// Validation failure with a detail message.
    Rejected(String),
}

impl<T> Reply<T> {
    fn into_result(self) -> Result<T> {
        match self {
            Reply::Ok(v) => Ok(v),
            Reply::Unavailable => Err(ClientError::Status {
                status: 503,
                detail: "service unavailable".to_string(),
            }),
            Reply::Rejected(msg) => Err(ClientError::Validation(msg)),
        }
    }
}

/// Replies are consumed in order; once drained, the last success repeats.
#[derive(Debug)]
struct Queue<T> {
    pending: VecDeque<Reply<T>>,
    last: Option<T>,
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
            last: None,
        }
    }
}

impl<T: Clone> Queue<T> {
    fn next(&mut self, what: &str) -> Result<T> {
        match self.pending.pop_front() {
            Some(reply) => {
                if let Reply::Ok(v) = &reply {
                    self.last = Some(v.clone());
                }
                reply.into_result()
            }
            None => self
                .last
                .clone()
                .ok_or_else(|| ClientError::NotFound(format!("no scripted {what}"))),
        }
    }
}

/// Calls observed by the scripted backend.
#[derive(Debug, Default, Clone)]
pub struct Calls {
    pub created: Vec<ScanRequest>,
    pub session: u32,
    pub progress: u32,
    pub child: u32,
    pub report: u32,
    pub intents: Vec<Tier>,
    pub confirmations: Vec<(Uuid, String, Tier)>,
    pub pdf: u32,
}

#[derive(Debug, Default)]
struct Script {
    create: Queue<ScanSession>,
    sessions: Queue<ScanSession>,
    progress: Queue<Option<ProgressSnapshot>>,
    child: Queue<ChildStatus>,
    reports: Queue<ScanReport>,
    intents: VecDeque<Reply<()>>,
    confirmations: Queue<PaymentConfirmation>,
    pdf: Queue<()>,
    calls: Calls,
}

#[derive(Debug, Default)]
pub struct ScriptedBackend {
    script: Mutex<Script>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Script) -> R) -> R {
        let mut guard = self.script.lock().unwrap();
        f(&mut guard)
    }

    pub fn push_create(&self, reply: Reply<ScanSession>) -> &Self {
        self.with(|s| s.create.pending.push_back(reply));
        self
    }

    pub fn push_session(&self, reply: Reply<ScanSession>) -> &Self {
        self.with(|s| s.sessions.pending.push_back(reply));
        self
    }

    pub fn push_progress(&self, reply: Reply<Option<ProgressSnapshot>>) -> &Self {
        self.with(|s| s.progress.pending.push_back(reply));
        self
    }

    pub fn push_child(&self, reply: Reply<ChildStatus>) -> &Self {
        self.with(|s| s.child.pending.push_back(reply));
        self
    }

    pub fn push_report(&self, reply: Reply<ScanReport>) -> &Self {
        self.with(|s| s.reports.pending.push_back(reply));
        self
    }

    pub fn push_intent(&self, reply: Reply<()>) -> &Self {
        self.with(|s| s.intents.push_back(reply));
        self
    }

    pub fn push_confirmation(&self, reply: Reply<PaymentConfirmation>) -> &Self {
        self.with(|s| s.confirmations.pending.push_back(reply));
        self
    }

    pub fn push_pdf(&self, reply: Reply<()>) -> &Self {
        self.with(|s| s.pdf.pending.push_back(reply));
        self
    }

    pub fn calls(&self) -> Calls {
        self.with(|s| s.calls.clone())
    }
}

#[async_trait]
impl ScanBackend for ScriptedBackend {
    async fn create_session(&self, request: &ScanRequest) -> Result<ScanSession> {
        self.with(|s| {
            s.calls.created.push(request.clone());
            s.create.next("session creation")
        })
    }

    async fn fetch_session(&self, _id: Uuid) -> Result<ScanSession> {
        self.with(|s| {
            s.calls.session += 1;
            s.sessions.next("session")
        })
    }

    async fn fetch_progress(&self, _id: Uuid) -> Result<Option<ProgressSnapshot>> {
        self.with(|s| {
            s.calls.progress += 1;
            // Progress is not sticky: an exhausted script means "nothing new".
            match s.progress.pending.pop_front() {
                Some(reply) => reply.into_result(),
                None => Ok(None),
            }
        })
    }

    async fn fetch_child_status(&self, _parent_id: Uuid) -> Result<ChildStatus> {
        self.with(|s| {
            s.calls.child += 1;
            s.child.next("child status")
        })
    }

    async fn fetch_report(&self, _id: Uuid) -> Result<ScanReport> {
        self.with(|s| {
            s.calls.report += 1;
            s.reports.next("report")
        })
    }

    async fn create_payment_intent(&self, _id: Uuid, tier: Tier) -> Result<PaymentIntent> {
        self.with(|s| {
            s.calls.intents.push(tier);
            s.intents.pop_front().unwrap_or(Reply::Ok(())).into_result()?;
            Ok(PaymentIntent {
                tier,
                amount: tier.info().price_cents,
                client_secret: format!("pi_{}_secret", tier.as_str()),
                status: IntentStatus::RequiresConfirmation,
            })
        })
    }

    async fn confirm_payment(
        &self,
        id: Uuid,
        confirmation_id: &str,
        tier: Tier,
    ) -> Result<PaymentConfirmation> {
        self.with(|s| {
            s.calls
                .confirmations
                .push((id, confirmation_id.to_string(), tier));
            s.confirmations.next("confirmation")
        })
    }

    async fn request_pdf(&self, _id: Uuid) -> Result<()> {
        self.with(|s| {
            s.calls.pdf += 1;
            match s.pdf.pending.pop_front() {
                Some(reply) => reply.into_result(),
                None => Ok(()),
            }
        })
    }
}

/// Processor that replays scripted outcomes.
#[derive(Debug, Default)]
pub struct ScriptedProcessor {
    outcomes: Mutex<VecDeque<ProcessorOutcome>>,
    seen: Mutex<Vec<PaymentIntent>>,
}

impl ScriptedProcessor {
    pub fn with_outcomes(outcomes: impl IntoIterator<Item = ProcessorOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<PaymentIntent> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentProcessor for ScriptedProcessor {
    async fn confirm(&self, intent: &PaymentIntent) -> ProcessorOutcome {
        self.seen.lock().unwrap().push(intent.clone());
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ProcessorOutcome::Abandoned)
    }
}

/// Session fixture with the given id and status.
pub fn session(id: Uuid, status: ScanStatus, tier: Option<Tier>) -> ScanSession {
    ScanSession {
        id,
        status,
        target_url: "https://example.com".to_string(),
        created_at: Utc::now(),
        scan_type: "quick".to_string(),
        purchased_tier: tier,
    }
}
