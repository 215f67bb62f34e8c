//! End-to-end session flow against an in-process fake scan backend.
//!
//! The fake speaks the backend's HTTP contract and is served by axum on a
//! random port; the crate's real reqwest client talks to it.
//!
//! Run with: `cargo test --test session_flow_test`

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

use nullscan::api::http::HttpScanBackend;
use nullscan::api::{PaymentProcessor, ScanBackend};
use nullscan::config::ClientConfig;
use nullscan::models::payment::{PaymentIntent, ProcessorOutcome};
use nullscan::models::session::ScanStatus;
use nullscan::models::tier::Tier;
use nullscan::services::checkout::{CheckoutError, CheckoutOutcome};
use nullscan::services::gate::DetailView;
use nullscan::services::linker::LinkerPhase;
use nullscan::services::wizard::{Handoff, Step, Wizard, WizardInput, WizardState};
use nullscan::views::results::{PdfRequest, ResultsView};
use nullscan::views::tracking::TrackingView;
use nullscan::views::Screen;

const DEADLINE: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Fake backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct FakeScan {
    target_url: String,
    created_at: String,
    status_polls: u32,
    /// Status polls before the scan reports completed.
    completes_after: u32,
    fails: bool,
    expired: bool,
    paid_tier: Option<String>,
    child: Option<Uuid>,
    /// Results reflect a finished deeper scan.
    deep_results: bool,
    progress_polls: u64,
}

impl FakeScan {
    fn new(target_url: &str) -> Self {
        Self {
            target_url: target_url.to_string(),
            created_at: Utc::now()
                .naive_utc()
                .format("%Y-%m-%dT%H:%M:%S%.f")
                .to_string(),
            status_polls: 0,
            completes_after: 4,
            fails: false,
            expired: false,
            paid_tier: None,
            child: None,
            deep_results: false,
            progress_polls: 0,
        }
    }

    fn status(&self) -> &'static str {
        if self.status_polls >= self.completes_after {
            if self.fails {
                "failed"
            } else {
                "completed"
            }
        } else if self.status_polls <= 1 {
            "pending"
        } else {
            "running"
        }
    }
}

#[derive(Debug, Default)]
struct Fake {
    scans: HashMap<Uuid, FakeScan>,
    confirmations: Vec<(Uuid, String, String)>,
    pdf_requests: u32,
}

type Shared = Arc<Mutex<Fake>>;

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

#[derive(Debug, Deserialize)]
struct CreateBody {
    email: String,
    target_url: String,
    consent: bool,
}

async fn create_scan(State(fake): State<Shared>, Json(body): Json<CreateBody>) -> Response {
    if !body.consent {
        return detail(StatusCode::BAD_REQUEST, "Consent is required");
    }
    if !body.email.contains('@') {
        return detail(StatusCode::UNPROCESSABLE_ENTITY, "Invalid email");
    }
    if body.target_url.contains("blocked.test") {
        return detail(StatusCode::BAD_REQUEST, "Target not allowed");
    }
    let id = Uuid::new_v4();
    let scan = FakeScan::new(&body.target_url);
    let created_at = scan.created_at.clone();
    fake.lock().unwrap().scans.insert(id, scan);
    Json(json!({
        "id": id,
        "email": body.email,
        "target_url": body.target_url,
        "status": "pending",
        "created_at": created_at,
        "scan_type": "quick",
        "paid_tier": null,
    }))
    .into_response()
}

async fn get_scan(State(fake): State<Shared>, Path(id): Path<Uuid>) -> Response {
    let mut fake = fake.lock().unwrap();
    let Some(scan) = fake.scans.get_mut(&id) else {
        return detail(StatusCode::NOT_FOUND, "Scan not found");
    };
    scan.status_polls += 1;
    Json(json!({
        "id": id,
        "target_url": scan.target_url,
        "status": scan.status(),
        "created_at": scan.created_at,
        "scan_type": "quick",
        "paid_tier": scan.paid_tier,
        "expired": scan.expired,
    }))
    .into_response()
}

async fn get_progress(State(fake): State<Shared>, Path(id): Path<Uuid>) -> Response {
    let mut fake = fake.lock().unwrap();
    let Some(scan) = fake.scans.get_mut(&id) else {
        return detail(StatusCode::NOT_FOUND, "Scan not found");
    };
    scan.progress_polls += 1;
    let n = scan.progress_polls;
    if n == 1 {
        return Json(json!({ "scan_id": id, "status": "pending", "progress": {} })).into_response();
    }
    // Every third sample is stale.
    let tokens = if n % 3 == 0 { 10 } else { n * 1_000 };
    Json(json!({
        "scan_id": id,
        "status": "running",
        "progress": {
            "agents": 8,
            "active_agents": 3,
            "tools": n * 5,
            "input_tokens": tokens,
            "current_phase": if n % 3 == 0 { "recon" } else { "attack" },
            "recent_activity": [
                { "ts": format!("10:00:{n:02}"), "description": format!("step {n}"), "status": "done" }
            ],
        },
    }))
    .into_response()
}

async fn get_child_status(State(fake): State<Shared>, Path(id): Path<Uuid>) -> Response {
    let mut fake = fake.lock().unwrap();
    let Some(child_id) = fake.scans.get(&id).map(|s| s.child) else {
        return detail(StatusCode::NOT_FOUND, "Scan not found");
    };
    let Some(child_id) = child_id else {
        return Json(json!({ "has_child": false })).into_response();
    };
    let status = match fake.scans.get_mut(&child_id) {
        Some(child) => {
            child.status_polls += 1;
            child.status()
        }
        None => "pending",
    };
    if status == "completed" {
        if let Some(parent) = fake.scans.get_mut(&id) {
            parent.deep_results = true;
        }
    }
    Json(json!({
        "has_child": true,
        "child_scan_id": child_id,
        "status": status,
        "scan_type": "deep",
    }))
    .into_response()
}

async fn get_results(State(fake): State<Shared>, Path(id): Path<Uuid>) -> Response {
    let fake = fake.lock().unwrap();
    let Some(scan) = fake.scans.get(&id) else {
        return detail(StatusCode::NOT_FOUND, "Scan not found");
    };
    let mut findings = vec![json!({
        "title": "SQL injection in login",
        "severity": "critical",
        "endpoint": "/api/login",
        "impact": "Full database read access",
        "technical_detail": "username is concatenated into the query",
        "reproduction_steps": "POST /api/login with username=' OR 1=1 --",
        "poc": "curl -d \"username=' OR 1=1 --\" https://target/api/login",
        "recommendation": "Use bound parameters",
    })];
    if scan.deep_results {
        findings.push(json!({
            "title": "IDOR on invoices",
            "severity": "high",
            "endpoint": "/api/invoices/{id}",
            "impact": "Read other customers' invoices",
            "poc": "GET /api/invoices/1002",
        }));
    }
    Json(json!({
        "scan_id": id,
        "target_url": scan.target_url,
        "risk_level": "Critical",
        "findings": findings,
        "scan_type": "quick",
        "paid_tier": scan.paid_tier,
        "structured_report": null,
        "expired": scan.expired,
        "expires_in_days": if scan.paid_tier.is_some() { Value::Null } else { json!(30) },
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
struct TierQuery {
    tier: String,
}

async fn create_payment_intent(
    State(fake): State<Shared>,
    Path(id): Path<Uuid>,
    Query(q): Query<TierQuery>,
) -> Response {
    if !fake.lock().unwrap().scans.contains_key(&id) {
        return detail(StatusCode::NOT_FOUND, "Scan not found");
    }
    let amount = match q.tier.as_str() {
        "unlock" => 3_900,
        "pro" => 25_000,
        "deep" => 89_900,
        _ => return detail(StatusCode::BAD_REQUEST, "Invalid tier"),
    };
    Json(json!({ "client_secret": format!("pi_{}_secret", q.tier), "amount": amount }))
        .into_response()
}

#[derive(Debug, Deserialize)]
struct ConfirmQuery {
    payment_intent_id: String,
    tier: String,
}

async fn confirm_payment(
    State(fake): State<Shared>,
    Path(id): Path<Uuid>,
    Query(q): Query<ConfirmQuery>,
) -> Response {
    let mut fake = fake.lock().unwrap();
    fake.confirmations
        .push((id, q.payment_intent_id.clone(), q.tier.clone()));
    if q.payment_intent_id == "pi_fail" {
        return Json(json!({ "success": false, "message": "Payment not completed" }))
            .into_response();
    }
    let target = match fake.scans.get_mut(&id) {
        Some(scan) => {
            scan.paid_tier = Some(q.tier.clone());
            scan.target_url.clone()
        }
        None => return detail(StatusCode::NOT_FOUND, "Scan not found"),
    };
    let child_id = if q.tier == "pro" || q.tier == "deep" {
        let child_id = Uuid::new_v4();
        let mut child = FakeScan::new(&target);
        child.completes_after = 2;
        fake.scans.insert(child_id, child);
        if let Some(parent) = fake.scans.get_mut(&id) {
            parent.child = Some(child_id);
        }
        Some(child_id)
    } else {
        None
    };
    Json(json!({ "success": true, "message": "Payment confirmed", "child_scan_id": child_id }))
        .into_response()
}

async fn send_pdf(State(fake): State<Shared>, Path(id): Path<Uuid>) -> Response {
    let mut fake = fake.lock().unwrap();
    let paid = fake.scans.get(&id).map(|s| s.paid_tier.is_some());
    match paid {
        None => detail(StatusCode::NOT_FOUND, "Scan not found"),
        Some(false) => detail(StatusCode::FORBIDDEN, "PDF requires a paid report"),
        Some(true) => {
            fake.pdf_requests += 1;
            Json(json!({ "success": true })).into_response()
        }
    }
}

/// Spin up the fake backend on a random port, returning its base URL.
async fn start_fake() -> (String, Shared, tokio::task::JoinHandle<()>) {
    let fake: Shared = Arc::new(Mutex::new(Fake::default()));
    let app = Router::new()
        .route("/scans/", post(create_scan))
        .route("/scans/{id}", get(get_scan))
        .route("/scans/{id}/progress", get(get_progress))
        .route("/scans/{id}/child-status", get(get_child_status))
        .route("/scans/{id}/results", get(get_results))
        .route("/scans/{id}/create-payment-intent", post(create_payment_intent))
        .route("/scans/{id}/confirm-payment", post(confirm_payment))
        .route("/scans/{id}/send-pdf", post(send_pdf))
        .with_state(fake.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr: SocketAddr = listener.local_addr().expect("addr");
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server");
    });
    (format!("http://{addr}"), fake, handle)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fast_config(base_url: &str) -> ClientConfig {
    let mut config = ClientConfig::with_api_url(base_url);
    config.poll_interval = Duration::from_millis(20);
    config.completion_delay = Duration::from_millis(30);
    config.support_contact = "help@example.test".to_string();
    config
}

fn client(base_url: &str) -> Arc<dyn ScanBackend> {
    Arc::new(HttpScanBackend::new(base_url).expect("client"))
}

/// Pays with a fixed confirmation id.
struct FixedProcessor(&'static str);

#[async_trait]
impl PaymentProcessor for FixedProcessor {
    async fn confirm(&self, _intent: &PaymentIntent) -> ProcessorOutcome {
        ProcessorOutcome::Succeeded {
            confirmation_id: self.0.to_string(),
        }
    }
}

async fn submit_wizard(backend: &Arc<dyn ScanBackend>, lines: &[&str]) -> (Wizard, Step) {
    let mut wizard = Wizard::new();
    let mut step = Step::Continue;
    for line in lines {
        step = wizard.handle(WizardInput::line(*line));
    }
    if step == Step::Submit {
        let _ = wizard.submit(backend.as_ref()).await;
    }
    (wizard, step)
}

fn seed_scan(fake: &Shared, scan: FakeScan) -> Uuid {
    let id = Uuid::new_v4();
    fake.lock().unwrap().scans.insert(id, scan);
    id
}

// ---------------------------------------------------------------------------
// Flows
// ---------------------------------------------------------------------------

#[tokio::test]
async fn free_scan_is_tracked_to_a_gated_report() {
    let (base, fake, _server) = start_fake().await;
    let backend = client(&base);
    let config = fast_config(&base);

    let (wizard, step) =
        submit_wizard(&backend, &["example.com", "a@b.com", "1", "confirm", ""]).await;
    assert_eq!(step, Step::Submit);
    let WizardState::Succeeded(Handoff::Track { session_id }) = wizard.state().clone() else {
        panic!("unexpected wizard state {:?}", wizard.state());
    };
    {
        let fake = fake.lock().unwrap();
        let scan = &fake.scans[&session_id];
        assert_eq!(scan.target_url, "https://example.com");
        assert!(scan.paid_tier.is_none());
    }

    let mut view = TrackingView::open(backend.clone(), session_id, &config);
    let mut rx = view.subscribe();
    let watcher = tokio::spawn(async move {
        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            seen.push((state.progress.tokens_in, state.progress.phase_index()));
        }
        seen
    });

    let screen = assert_ok!(tokio::time::timeout(DEADLINE, view.run_to_exit()).await);
    assert_eq!(screen, Screen::Results { session_id });
    let final_state = view.state();
    assert!(final_state.progress.tokens_in >= 1_000);
    assert_eq!(final_state.stops, 1);
    view.close().await;

    let seen = assert_ok!(watcher.await);
    assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0 && w[0].1 <= w[1].1));

    let results = assert_ok!(ResultsView::open(backend.clone(), session_id, &config).await);
    let gated = results.gated().expect("report");
    assert_eq!(gated.findings[0].title, "SQL injection in login");
    assert_eq!(gated.findings[0].affected_component, "/api/login");
    assert_eq!(gated.findings[0].proof_of_concept, DetailView::Locked);
    assert_eq!(gated.findings[0].fix_guidance, DetailView::Locked);
    assert_eq!(results.expires_in_days(Utc::now()), Some(30));
    results.close().await;
}

#[tokio::test]
async fn paid_wizard_submission_hands_off_to_checkout() {
    let (base, _fake, _server) = start_fake().await;
    let backend = client(&base);

    let (wizard, _) =
        submit_wizard(&backend, &["https://shop.test", "ops@shop.test", "deep", "confirm", "go"]).await;
    assert!(matches!(
        wizard.state(),
        WizardState::Succeeded(Handoff::Checkout { tier: Tier::Deep, .. })
    ));
}

#[tokio::test]
async fn backend_rejection_fails_wizard_with_detail() {
    let (base, _fake, _server) = start_fake().await;
    let backend = client(&base);

    let (wizard, _) =
        submit_wizard(&backend, &["blocked.test", "a@b.com", "1", "confirm", ""]).await;
    assert_eq!(
        *wizard.state(),
        WizardState::Failed {
            error: "Target not allowed".to_string()
        }
    );
}

#[tokio::test]
async fn unlock_then_deep_checkout() {
    let (base, fake, _server) = start_fake().await;
    let backend = client(&base);
    let config = fast_config(&base);
    let parent = seed_scan(&fake, FakeScan::new("https://example.com"));

    let mut view = assert_ok!(ResultsView::open(backend.clone(), parent, &config).await);
    assert!(view.gated().unwrap().findings[0].reproduction_steps.is_locked());
    assert_eq!(
        assert_ok!(view.request_pdf().await),
        PdfRequest::NeedsCheckout
    );

    // Unlock: same session, details revealed.
    let mut checkout = view.open_checkout(Arc::new(FixedProcessor("pi_unlock")), None);
    let outcome = assert_ok!(checkout.purchase(Tier::Unlock).await);
    assert_eq!(
        outcome,
        CheckoutOutcome::Unlocked {
            session_id: parent,
            tier: Tier::Unlock
        }
    );
    assert!(view.apply_checkout(outcome).await);
    assert_eq!(view.session_id(), parent);
    assert_eq!(
        view.gated().unwrap().findings[0].reproduction_steps.revealed(),
        Some("POST /api/login with username=' OR 1=1 --")
    );
    assert_eq!(assert_ok!(view.request_pdf().await), PdfRequest::Sent);

    // Deep: child launched, parent stays visible, report refreshed on completion.
    let mut checkout = view.open_checkout(Arc::new(FixedProcessor("pi_deep")), Some(Tier::Deep));
    assert_eq!(checkout.offered(), vec![Tier::Pro, Tier::Deep]);
    let outcome = assert_ok!(checkout.purchase(Tier::Deep).await);
    let CheckoutOutcome::ChildLaunched { link, .. } = outcome else {
        panic!("expected a child scan, got {outcome:?}");
    };
    assert_eq!(link.parent_session_id, parent);
    assert_ne!(link.child_session_id, parent);
    view.apply_checkout(outcome).await;
    assert!(view.gated().unwrap().findings[0].proof_of_concept.revealed().is_some());

    let finished = tokio::time::timeout(DEADLINE, async {
        loop {
            if let Some(state) = view.linker_state() {
                if state.phase.is_terminal() {
                    return state.phase;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert_eq!(assert_ok!(finished), LinkerPhase::ChildCompleted);
    assert!(view.sync_linker());
    let gated = view.gated().unwrap();
    assert_eq!(gated.findings.len(), 2);
    assert_eq!(gated.findings[1].title, "IDOR on invoices");
    assert_eq!(gated.purchased_tier, Some(Tier::Deep));

    let fake = fake.lock().unwrap();
    assert_eq!(fake.confirmations.len(), 2);
    assert_eq!(fake.confirmations[0], (parent, "pi_unlock".to_string(), "unlock".to_string()));
    assert_eq!(fake.pdf_requests, 1);
}

#[tokio::test]
async fn refused_reconciliation_is_paid_but_not_unlocked() {
    let (base, fake, _server) = start_fake().await;
    let backend = client(&base);
    let config = fast_config(&base);
    let parent = seed_scan(&fake, FakeScan::new("https://example.com"));

    let view = assert_ok!(ResultsView::open(backend, parent, &config).await);
    let mut checkout = view.open_checkout(Arc::new(FixedProcessor("pi_fail")), None);
    let err = assert_err!(checkout.purchase(Tier::Unlock).await);
    assert_eq!(
        err,
        CheckoutError::PaidButNotUnlocked {
            support_contact: "help@example.test".to_string()
        }
    );
    assert_eq!(fake.lock().unwrap().confirmations.len(), 1);
    assert!(view.gated().unwrap().findings[0].fix_guidance.is_locked());
}

#[tokio::test]
async fn expired_session_shows_expired_screen() {
    let (base, fake, _server) = start_fake().await;
    let backend = client(&base);
    let config = fast_config(&base);
    let mut scan = FakeScan::new("https://old.example.com");
    scan.completes_after = 0;
    scan.expired = true;
    let id = seed_scan(&fake, scan);

    let view = assert_ok!(ResultsView::open(backend.clone(), id, &config).await);
    assert!(view.is_expired());
    assert_eq!(view.screen(), Screen::Expired { session_id: id });

    let session = assert_ok!(backend.fetch_session(id).await);
    assert_eq!(session.status, ScanStatus::Expired);
}

#[tokio::test]
async fn failed_scan_surfaces_restart() {
    let (base, fake, _server) = start_fake().await;
    let backend = client(&base);
    let config = fast_config(&base);
    let mut scan = FakeScan::new("https://example.com");
    scan.fails = true;
    let id = seed_scan(&fake, scan);

    let mut view = TrackingView::open(backend, id, &config);
    let screen = assert_ok!(tokio::time::timeout(DEADLINE, view.run_to_exit()).await);
    assert!(matches!(screen, Screen::ScanFailed { .. }));
    assert!(screen.offers_restart());
    view.close().await;
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let (base, _fake, _server) = start_fake().await;
    let backend = client(&base);

    let err = assert_err!(backend.fetch_session(Uuid::new_v4()).await);
    assert!(err.is_not_found());
    assert_eq!(err.user_message(), "Scan not found");
}
