//! Ephemeral payment objects used during a single checkout attempt.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::tier::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresConfirmation,
    Succeeded,
    Failed,
    Abandoned,
}

/// Payment intent handed to the processor. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub tier: Tier,
    pub amount: u32,
    pub client_secret: String,
    pub status: IntentStatus,
}

/// Wire response of payment-intent creation.
#[derive(Debug, Clone, Deserialize)]
pub struct IntentResponse {
    pub client_secret: String,
    #[serde(default)]
    pub amount: Option<u32>,
}

impl IntentResponse {
    pub fn into_intent(self, tier: Tier) -> PaymentIntent {
        PaymentIntent {
            tier,
            amount: self.amount.unwrap_or_else(|| tier.info().price_cents),
            client_secret: self.client_secret,
            status: IntentStatus::RequiresConfirmation,
        }
    }
}

impl PaymentIntent {
    /// Record what the processor reported for this attempt.
    pub fn settle(&mut self, outcome: &ProcessorOutcome) {
        self.status = match outcome {
            ProcessorOutcome::Succeeded { .. } => IntentStatus::Succeeded,
            ProcessorOutcome::Failed { .. } => IntentStatus::Failed,
            ProcessorOutcome::Abandoned => IntentStatus::Abandoned,
        };
    }
}

/// What the payment processor's own UI reported back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorOutcome {
    /// Charge captured; `confirmation_id` identifies it to the backend.
    Succeeded { confirmation_id: String },
    Failed { message: String },
    Abandoned,
}

/// Backend reconciliation response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PaymentConfirmation {
    #[serde(rename = "success")]
    pub unlocked: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "child_scan_id")]
    pub child_session_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn intent_amount_falls_back_to_catalogue() {
        let resp: IntentResponse =
            serde_json::from_value(json!({"client_secret": "pi_1_secret_2"})).unwrap();
        let intent = resp.into_intent(Tier::Unlock);
        assert_eq!(intent.amount, 3_900);
        assert_eq!(intent.status, IntentStatus::RequiresConfirmation);
    }

    #[test]
    fn settle_tracks_processor_outcome() {
        let mut intent = IntentResponse {
            client_secret: "pi_1_secret_2".to_string(),
            amount: Some(25_000),
        }
        .into_intent(Tier::Pro);
        intent.settle(&ProcessorOutcome::Abandoned);
        assert_eq!(intent.status, IntentStatus::Abandoned);
        intent.settle(&ProcessorOutcome::Failed {
            message: "card declined".to_string(),
        });
        assert_eq!(intent.status, IntentStatus::Failed);
        intent.settle(&ProcessorOutcome::Succeeded {
            confirmation_id: "pi_1".to_string(),
        });
        assert_eq!(intent.status, IntentStatus::Succeeded);
    }

    #[test]
    fn confirmation_with_child() {
        let conf: PaymentConfirmation = serde_json::from_value(json!({
            "success": true,
            "message": "Payment confirmed",
            "child_scan_id": "7f1d2c3b-1111-4222-8333-944455556666"
        }))
        .unwrap();
        assert!(conf.unlocked);
        assert!(conf.child_session_id.is_some());
    }

    #[test]
    fn confirmation_without_child() {
        let conf: PaymentConfirmation =
            serde_json::from_value(json!({"success": true, "child_scan_id": null})).unwrap();
        assert!(conf.child_session_id.is_none());
    }
}
