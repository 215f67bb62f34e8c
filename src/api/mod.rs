//! Remote collaborators: the scan backend and the payment processor.
//!
//! Both are opaque services. The orchestrator only depends on the contracts
//! below, so views and services can be driven by the HTTP client in
//! production and by scripted fakes in tests.

pub mod http;
#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::payment::{PaymentConfirmation, PaymentIntent, ProcessorOutcome};
use crate::models::progress::ProgressSnapshot;
use crate::models::report::ScanReport;
use crate::models::session::{ChildStatus, ScanRequest, ScanSession};
use crate::models::tier::Tier;

/// Backend of record for scan sessions, reports and payment reconciliation.
#[async_trait]
pub trait ScanBackend: Send + Sync {
    /// Create a session from a submitted request.
    async fn create_session(&self, request: &ScanRequest) -> Result<ScanSession>;

    /// Coarse session status. Cheap enough for interval polling.
    async fn fetch_session(&self, id: Uuid) -> Result<ScanSession>;

    /// Latest progress sample; `None` means the scan has not reported yet.
    async fn fetch_progress(&self, id: Uuid) -> Result<Option<ProgressSnapshot>>;

    /// Most recent child session spawned from `parent_id`, if any.
    async fn fetch_child_status(&self, parent_id: Uuid) -> Result<ChildStatus>;

    /// Full report including locked fields.
    async fn fetch_report(&self, id: Uuid) -> Result<ScanReport>;

    async fn create_payment_intent(&self, id: Uuid, tier: Tier) -> Result<PaymentIntent>;

    /// Reconcile a captured payment. Idempotent on the backend per `confirmation_id`.
    async fn confirm_payment(
        &self,
        id: Uuid,
        confirmation_id: &str,
        tier: Tier,
    ) -> Result<PaymentConfirmation>;

    /// Ask the backend to email the PDF report. Fire-and-forget.
    async fn request_pdf(&self, id: Uuid) -> Result<()>;
}

/// The payment processor's own confirmation UI.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn confirm(&self, intent: &PaymentIntent) -> ProcessorOutcome;
}
