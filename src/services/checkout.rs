//! Checkout coordinator.
//!
//! Drives one purchase against an existing session:
//! tier selection -> intent creation -> processor confirmation -> backend
//! reconciliation -> unlocked | child scan launched | failed.
//!
//! Failures before the processor captures the charge return to tier
//! selection. Once the charge is captured, the backend is asked to reconcile
//! exactly once, and any failure from there on is terminal: the user is sent
//! to support instead of being offered a second charge.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::api::{PaymentProcessor, ScanBackend};
use crate::models::payment::{PaymentIntent, ProcessorOutcome};
use crate::models::session::ChildLink;
use crate::models::tier::Tier;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckoutError {
    /// Nothing was charged; the user may pick a tier again.
    #[error("{0}")]
    BeforeCapture(String),

    #[error("Payment succeeded but failed to unlock. Please contact support at {support_contact}.")]
    PaidButNotUnlocked { support_contact: String },

    #[error("Invalid checkout transition: {0}")]
    InvalidTransition(String),
}

impl CheckoutError {
    /// Whether the user may simply try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BeforeCapture(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CheckoutState {
    TierSelection {
        offered: Vec<Tier>,
        default: Option<Tier>,
        error: Option<String>,
    },
    CreatingIntent {
        tier: Tier,
    },
    AwaitingConfirmation {
        tier: Tier,
    },
    ReconcilingWithBackend {
        tier: Tier,
    },
    Unlocked {
        tier: Tier,
    },
    ChildScanLaunched(ChildLink),
    Failed {
        message: String,
    },
}

impl CheckoutState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Unlocked { .. } | Self::ChildScanLaunched(_) | Self::Failed { .. }
        )
    }
}

/// Successful result, applied to the results view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CheckoutOutcome {
    /// Purchased tier raised on the same session.
    Unlocked { session_id: Uuid, tier: Tier },
    /// Content unlocked and a deeper scan started as a child session.
    ChildLaunched { tier: Tier, link: ChildLink },
}

impl CheckoutOutcome {
    pub fn tier(&self) -> Tier {
        match self {
            Self::Unlocked { tier, .. } | Self::ChildLaunched { tier, .. } => *tier,
        }
    }
}

pub struct CheckoutCoordinator {
    backend: Arc<dyn ScanBackend>,
    processor: Arc<dyn PaymentProcessor>,
    session_id: Uuid,
    purchased: Option<Tier>,
    support_contact: String,
    state: CheckoutState,
    intent: Option<PaymentIntent>,
    reconciled: bool,
}

impl std::fmt::Debug for CheckoutCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutCoordinator")
            .field("session_id", &self.session_id)
            .field("purchased", &self.purchased)
            .field("state", &self.state)
            .field("intent", &self.intent)
            .field("reconciled", &self.reconciled)
            .finish()
    }
}

impl CheckoutCoordinator {
    /// Open checkout for `session_id`. A pre-selected tier becomes the default
    /// only if it is still offered.
    pub fn new(
        backend: Arc<dyn ScanBackend>,
        processor: Arc<dyn PaymentProcessor>,
        session_id: Uuid,
        purchased: Option<Tier>,
        preselected: Option<Tier>,
        support_contact: impl Into<String>,
    ) -> Self {
        let offered = Tier::upgrades_from(purchased);
        let default = preselected.filter(|t| offered.contains(t));
        Self {
            backend,
            processor,
            session_id,
            purchased,
            support_contact: support_contact.into(),
            state: CheckoutState::TierSelection {
                offered,
                default,
                error: None,
            },
            intent: None,
            reconciled: false,
        }
    }

    pub fn state(&self) -> &CheckoutState {
        &self.state
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// The most recent payment intent, with what the processor made of it.
    pub fn intent(&self) -> Option<&PaymentIntent> {
        self.intent.as_ref()
    }

    pub fn offered(&self) -> Vec<Tier> {
        Tier::upgrades_from(self.purchased)
    }

    /// Pick a tier. Only valid in tier selection and only for offered tiers.
    pub fn select(&mut self, tier: Tier) -> Result<(), CheckoutError> {
        match &self.state {
            CheckoutState::TierSelection { offered, .. } if offered.contains(&tier) => {
                tracing::debug!(session_id = %self.session_id, tier = %tier, "Checkout tier selected");
                self.state = CheckoutState::CreatingIntent { tier };
                Ok(())
            }
            CheckoutState::TierSelection { .. } => Err(CheckoutError::InvalidTransition(format!(
                "tier {tier} is not offered for this session"
            ))),
            other => Err(CheckoutError::InvalidTransition(format!(
                "cannot select a tier from {other:?}"
            ))),
        }
    }

    /// Select `tier` and run the purchase to a settled state.
    pub async fn purchase(&mut self, tier: Tier) -> Result<CheckoutOutcome, CheckoutError> {
        self.select(tier)?;
        self.run().await
    }

    /// Run the selected purchase until it settles or falls back to selection.
    pub async fn run(&mut self) -> Result<CheckoutOutcome, CheckoutError> {
        let CheckoutState::CreatingIntent { tier } = self.state else {
            return Err(CheckoutError::InvalidTransition(format!(
                "cannot start payment from {:?}",
                self.state
            )));
        };

        let mut intent = match self.backend.create_payment_intent(self.session_id, tier).await {
            Ok(intent) => intent,
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, tier = %tier, error = %e, "Payment intent creation failed");
                return Err(self.back_to_selection(tier, e.user_message()));
            }
        };

        self.state = CheckoutState::AwaitingConfirmation { tier };
        let outcome = self.processor.confirm(&intent).await;
        intent.settle(&outcome);
        self.intent = Some(intent);
        let confirmation_id = match self.settle_processor(tier, outcome) {
            Ok(id) => id,
            Err(message) => return Err(self.back_to_selection(tier, message)),
        };

        self.reconcile(tier, &confirmation_id).await
    }

    fn settle_processor(&self, tier: Tier, outcome: ProcessorOutcome) -> Result<String, String> {
        match outcome {
            ProcessorOutcome::Succeeded { confirmation_id } => {
                tracing::info!(session_id = %self.session_id, tier = %tier, "Payment captured");
                Ok(confirmation_id)
            }
            ProcessorOutcome::Failed { message } => {
                tracing::warn!(session_id = %self.session_id, tier = %tier, error = %message, "Payment failed");
                Err(if message.is_empty() {
                    "Payment failed".to_string()
                } else {
                    message
                })
            }
            ProcessorOutcome::Abandoned => {
                tracing::info!(session_id = %self.session_id, tier = %tier, "Payment abandoned");
                Err("Payment cancelled".to_string())
            }
        }
    }

    async fn reconcile(
        &mut self,
        tier: Tier,
        confirmation_id: &str,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        if self.reconciled {
            return Err(CheckoutError::InvalidTransition(
                "payment already reconciled".to_string(),
            ));
        }
        self.reconciled = true;
        self.state = CheckoutState::ReconcilingWithBackend { tier };

        let confirmation = match self
            .backend
            .confirm_payment(self.session_id, confirmation_id, tier)
            .await
        {
            Ok(c) if c.unlocked => c,
            Ok(c) => {
                tracing::error!(
                    session_id = %self.session_id,
                    tier = %tier,
                    message = ?c.message,
                    "Backend refused to unlock after capture"
                );
                return Err(self.paid_but_not_unlocked());
            }
            Err(e) => {
                tracing::error!(
                    session_id = %self.session_id,
                    tier = %tier,
                    error = %e,
                    "Reconciliation failed after capture"
                );
                return Err(self.paid_but_not_unlocked());
            }
        };

        self.purchased = Some(tier);
        let child = match confirmation.child_session_id {
            Some(child_session_id) if !tier.spawns_child() => {
                tracing::warn!(
                    session_id = %self.session_id,
                    child_session_id = %child_session_id,
                    tier = %tier,
                    "Ignoring child scan returned for a tier that does not launch one"
                );
                None
            }
            other => other,
        };
        match child {
            Some(child_session_id) => {
                let link = ChildLink {
                    parent_session_id: self.session_id,
                    child_session_id,
                    child_scan_type: tier,
                };
                tracing::info!(
                    session_id = %self.session_id,
                    child_session_id = %child_session_id,
                    tier = %tier,
                    "Deeper scan launched"
                );
                self.state = CheckoutState::ChildScanLaunched(link);
                Ok(CheckoutOutcome::ChildLaunched { tier, link })
            }
            None => {
                if tier.spawns_child() {
                    tracing::warn!(
                        session_id = %self.session_id,
                        tier = %tier,
                        "Backend unlocked without launching a deeper scan"
                    );
                } else {
                    tracing::info!(session_id = %self.session_id, tier = %tier, "Report unlocked");
                }
                self.state = CheckoutState::Unlocked { tier };
                Ok(CheckoutOutcome::Unlocked {
                    session_id: self.session_id,
                    tier,
                })
            }
        }
    }

    fn back_to_selection(&mut self, tier: Tier, message: String) -> CheckoutError {
        self.state = CheckoutState::TierSelection {
            offered: self.offered(),
            default: Some(tier),
            error: Some(message.clone()),
        };
        CheckoutError::BeforeCapture(message)
    }

    fn paid_but_not_unlocked(&mut self) -> CheckoutError {
        let err = CheckoutError::PaidButNotUnlocked {
            support_contact: self.support_contact.clone(),
        };
        self.state = CheckoutState::Failed {
            message: err.to_string(),
        };
        err
    }
}
