//! `reqwest` implementation of the scan backend contract.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::api::ScanBackend;
use crate::errors::{ClientError, Result};
use crate::models::payment::{IntentResponse, PaymentConfirmation, PaymentIntent};
use crate::models::progress::{ProgressEnvelope, ProgressSnapshot};
use crate::models::report::ScanReport;
use crate::models::session::{ChildStatus, ScanRequest, ScanSession};
use crate::models::tier::Tier;

/// HTTP client for the scan backend.
#[derive(Clone, Debug)]
pub struct HttpScanBackend {
    client: Client,
    base_url: String,
}

impl HttpScanBackend {
    /// Create a client rooted at `base_url` (e.g. `https://api.nullscan.io`).
    ///
    /// No per-request timeout is set: a slow poll is simply followed by the
    /// next tick once it settles.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        tracing::info!(base_url = %base_url, "Creating scan backend client");
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a URL under `/scans`.
    pub fn build_url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("{}/scans/{}", self.base_url, path)
    }

    fn build_url_with_params(&self, path: &str, params: &[(&str, &str)]) -> Result<Url> {
        let raw = self.build_url(path);
        Url::parse_with_params(&raw, params)
            .map_err(|e| ClientError::Validation(format!("invalid url {raw}: {e}")))
    }

    /// Send a request and decode a JSON body, mapping error statuses.
    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ClientError::from_status(status, &body));
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Send a request whose body is irrelevant.
    async fn execute_no_content(&self, request: RequestBuilder) -> Result<()> {
        let response = request.send().await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ClientError::from_status(status, &body))
            }
        }
    }
}

#[async_trait]
impl ScanBackend for HttpScanBackend {
    async fn create_session(&self, request: &ScanRequest) -> Result<ScanSession> {
        tracing::debug!(target_url = %request.target_url(), "Creating scan session");
        self.execute(self.client.post(self.build_url("")).json(request))
            .await
    }

    async fn fetch_session(&self, id: Uuid) -> Result<ScanSession> {
        self.execute(self.client.get(self.build_url(&id.to_string())))
            .await
    }

    async fn fetch_progress(&self, id: Uuid) -> Result<Option<ProgressSnapshot>> {
        let envelope: ProgressEnvelope = self
            .execute(self.client.get(self.build_url(&format!("{id}/progress"))))
            .await?;
        Ok(envelope.progress.filter(|p| !p.is_empty()))
    }

    async fn fetch_child_status(&self, parent_id: Uuid) -> Result<ChildStatus> {
        self.execute(
            self.client
                .get(self.build_url(&format!("{parent_id}/child-status"))),
        )
        .await
    }

    async fn fetch_report(&self, id: Uuid) -> Result<ScanReport> {
        self.execute(self.client.get(self.build_url(&format!("{id}/results"))))
            .await
    }

    async fn create_payment_intent(&self, id: Uuid, tier: Tier) -> Result<PaymentIntent> {
        let url = self.build_url_with_params(
            &format!("{id}/create-payment-intent"),
            &[("tier", tier.as_str())],
        )?;
        let response: IntentResponse = self.execute(self.client.post(url)).await?;
        Ok(response.into_intent(tier))
    }

    async fn confirm_payment(
        &self,
        id: Uuid,
        confirmation_id: &str,
        tier: Tier,
    ) -> Result<PaymentConfirmation> {
        let url = self.build_url_with_params(
            &format!("{id}/confirm-payment"),
            &[("payment_intent_id", confirmation_id), ("tier", tier.as_str())],
        )?;
        self.execute(self.client.post(url)).await
    }

    async fn request_pdf(&self, id: Uuid) -> Result<()> {
        self.execute_no_content(self.client.post(self.build_url(&format!("{id}/send-pdf"))))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_joins_paths() {
        let backend = HttpScanBackend::new("https://api.example.test/").unwrap();
        assert_eq!(backend.build_url(""), "https://api.example.test/scans/");
        assert_eq!(
            backend.build_url("/abc/progress"),
            "https://api.example.test/scans/abc/progress"
        );
    }

    #[test]
    fn query_params_are_encoded() {
        let backend = HttpScanBackend::new("https://api.example.test").unwrap();
        let url = backend
            .build_url_with_params(
                "abc/confirm-payment",
                &[("payment_intent_id", "pi 1&x"), ("tier", "deep")],
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.test/scans/abc/confirm-payment?payment_intent_id=pi+1%26x&tier=deep"
        );
    }
}
