use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use astral_storefront::config::StripeConfig;
use astral_storefront::db::DbPool;
use astral_storefront::error::{AppError, AppResult};
use astral_storefront::models::checkout::{CheckoutRequest, CheckoutSession, CheckoutState};
use astral_storefront::models::order::{BirthData, CustomerInfo, OrderDraft, OrderStatus};
use astral_storefront::services::api_client::ApiClient;
use astral_storefront::services::checkout_service::{CheckoutDispatcher, PaymentGateway, StripeGateway};
use astral_storefront::services::local_state_service::LocalStateService;
use astral_storefront::services::order_service::OrderService;
use astral_storefront::utils::crypto::CryptoVault;
use async_trait::async_trait;
use chrono::NaiveDate;
use httpmock::prelude::*;
use httpmock::Mock;
use serde_json::json;
use tempfile::{tempdir, TempDir};

struct Harness {
    _dir: TempDir,
    server: MockServer,
    orders: Arc<OrderService>,
}

async fn harness() -> Harness {
    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("checkout.sqlite")).expect("db pool");
    let vault = CryptoVault::with_master_secret(&[7u8; 32]).expect("vault");
    let state = Arc::new(LocalStateService::new(pool, vault));

    let server = MockServer::start_async().await;
    let client = ApiClient::new(&server.base_url(), StdDuration::from_secs(5)).expect("client");
    let orders = Arc::new(OrderService::new(client, state));

    Harness {
        _dir: dir,
        server,
        orders,
    }
}

async fn mock_catalog(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/products");
            then.status(200).json_body(json!([
                {
                    "id": "natal-chart",
                    "name": "Natal chart",
                    "basePriceCents": 4500,
                    "currency": "USD",
                    "active": true
                },
                {
                    "id": "retired",
                    "name": "Retired reading",
                    "basePriceCents": 100,
                    "active": false
                }
            ]));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/referrals/LUNA10");
            then.status(200).json_body(json!({
                "code": "LUNA10",
                "discountPercent": 10,
                "commissionPercent": 20,
                "active": true
            }));
        })
        .await;
}

async fn mock_order_create(server: &MockServer) -> Mock<'_> {
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/orders")
                .body_contains("\"productName\":\"Natal chart\"")
                .body_contains("\"finalPriceCents\":4050")
                .body_contains("\"status\":\"created\"");
            then.status(201).json_body(json!({
                "id": "ord_1",
                "customer": { "name": "Ada Lovelace", "email": "ada@example.com" },
                "birth": { "date": "1990-12-10", "place": "London" },
                "productId": "natal-chart",
                "productName": "Natal chart",
                "pricing": {
                    "basePriceCents": 4500,
                    "discountCents": 450,
                    "finalPriceCents": 4050,
                    "currency": "usd"
                },
                "referralCode": "LUNA10",
                "status": "created",
                "createdAt": "2024-06-01T10:00:00Z",
                "updatedAt": "2024-06-01T10:00:00Z"
            }));
        })
        .await
}

fn draft() -> OrderDraft {
    OrderDraft {
        customer: CustomerInfo {
            name: "Ada Lovelace".into(),
            email: "Ada@Example.com".into(),
        },
        birth: BirthData {
            date: NaiveDate::from_ymd_opt(1990, 12, 10).expect("birth date"),
            time: None,
            place: "London".into(),
        },
        product_id: "natal-chart".into(),
        referral_code: Some("luna10".into()),
        notes: None,
    }
}

#[derive(Default)]
struct RecordingGateway {
    requests: Mutex<Vec<CheckoutRequest>>,
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn create_session(&self, request: &CheckoutRequest) -> AppResult<CheckoutSession> {
        self.requests.lock().expect("requests lock").push(request.clone());
        Ok(CheckoutSession {
            id: "cs_test_1".into(),
            url: "https://pay.example/cs_test_1".into(),
        })
    }
}

struct DecliningGateway;

#[async_trait]
impl PaymentGateway for DecliningGateway {
    async fn create_session(&self, _request: &CheckoutRequest) -> AppResult<CheckoutSession> {
        Err(AppError::checkout_unavailable("card declined"))
    }
}

struct SlowGateway;

#[async_trait]
impl PaymentGateway for SlowGateway {
    async fn create_session(&self, _request: &CheckoutRequest) -> AppResult<CheckoutSession> {
        tokio::time::sleep(StdDuration::from_millis(200)).await;
        Ok(CheckoutSession {
            id: "cs_slow".into(),
            url: "https://pay.example/cs_slow".into(),
        })
    }
}

#[tokio::test]
async fn missing_payment_config_falls_back_to_manual_form() {
    let h = harness().await;
    let dispatcher = CheckoutDispatcher::from_config(None, StdDuration::from_secs(5), Arc::clone(&h.orders));

    let state = dispatcher.dispatch(&draft()).await.expect("dispatch");
    match state {
        CheckoutState::Failed { reason, fallback } => {
            assert_eq!(reason, "payment is not configured");
            assert_eq!(fallback.draft, draft());
            assert!(fallback.pricing.is_none());
        }
        other => panic!("expected failed state, got {}", other.as_str()),
    }
    assert_eq!(dispatcher.state().expect("state").as_str(), "failed");
}

#[tokio::test]
async fn gateway_error_keeps_the_quoted_price_on_the_fallback() {
    let h = harness().await;
    mock_catalog(&h.server).await;
    let dispatcher = CheckoutDispatcher::new(Arc::new(DecliningGateway), Arc::clone(&h.orders));

    let state = dispatcher.dispatch(&draft()).await.expect("dispatch");
    let CheckoutState::Failed { reason, fallback } = state else {
        panic!("expected failed state");
    };
    assert_eq!(reason, "checkout unavailable: card declined");
    let pricing = fallback.pricing.expect("pricing kept");
    assert_eq!(pricing.base_price_cents, 4_500);
    assert_eq!(pricing.discount_cents, 450);
    assert_eq!(pricing.final_price_cents, 4_050);
    assert_eq!(pricing.currency, "usd");
    assert_eq!(fallback.product_name.as_deref(), Some("Natal chart"));
}

#[tokio::test]
async fn successful_gateway_redirects_with_discounted_request() {
    let h = harness().await;
    mock_catalog(&h.server).await;
    let gateway = Arc::new(RecordingGateway::default());
    let dispatcher = CheckoutDispatcher::new(gateway.clone(), Arc::clone(&h.orders));

    let state = dispatcher.dispatch(&draft()).await.expect("dispatch");
    let CheckoutState::Redirected { session } = state else {
        panic!("expected redirect");
    };
    assert_eq!(session.url, "https://pay.example/cs_test_1");

    let requests = gateway.requests.lock().expect("requests lock");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].customer_email, "ada@example.com");
    assert_eq!(requests[0].referral_code.as_deref(), Some("LUNA10"));
    assert_eq!(requests[0].pricing.final_price_cents, 4_050);
}

#[tokio::test]
async fn second_dispatch_while_paying_is_rejected() {
    let h = harness().await;
    mock_catalog(&h.server).await;
    let dispatcher = CheckoutDispatcher::new(Arc::new(SlowGateway), Arc::clone(&h.orders));

    let first_draft = draft();
    let second_draft = draft();
    let (first, second) = futures::join!(dispatcher.dispatch(&first_draft), async {
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        dispatcher.dispatch(&second_draft).await
    });

    assert_eq!(first.expect("first dispatch").as_str(), "redirected");
    assert!(matches!(second, Err(AppError::Conflict { .. })));
}

#[tokio::test]
async fn reset_while_paying_is_rejected_and_session_lands() {
    let h = harness().await;
    mock_catalog(&h.server).await;
    let dispatcher = CheckoutDispatcher::new(Arc::new(SlowGateway), Arc::clone(&h.orders));

    let pending = draft();
    let (dispatched, reset) = futures::join!(dispatcher.dispatch(&pending), async {
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        dispatcher.reset()
    });

    assert!(matches!(reset, Err(AppError::Conflict { .. })));
    assert_eq!(dispatched.expect("dispatch").as_str(), "redirected");
    assert_eq!(dispatcher.state().expect("state").as_str(), "redirected");

    assert_eq!(dispatcher.reset().expect("reset after redirect"), CheckoutState::Idle);
}

#[tokio::test]
async fn invalid_draft_is_rejected_before_paying() {
    let h = harness().await;
    let dispatcher = CheckoutDispatcher::new(Arc::new(SlowGateway), Arc::clone(&h.orders));

    let mut bad = draft();
    bad.customer.email = "not-an-email".into();
    let err = dispatcher.dispatch(&bad).await.expect_err("validation error");
    assert!(matches!(err, AppError::Validation { .. }));
    assert_eq!(dispatcher.state().expect("state"), CheckoutState::Idle);
}

#[tokio::test]
async fn manual_form_submission_creates_a_created_order_and_resets() {
    let h = harness().await;
    mock_catalog(&h.server).await;
    let create = mock_order_create(&h.server).await;
    let dispatcher = CheckoutDispatcher::new(Arc::new(DecliningGateway), Arc::clone(&h.orders));

    let CheckoutState::Failed { fallback, .. } = dispatcher.dispatch(&draft()).await.expect("dispatch") else {
        panic!("expected failed state");
    };
    let record = dispatcher.submit_manual(&fallback).await.expect("manual order");

    create.assert_async().await;
    assert_eq!(record.id, "ord_1");
    assert_eq!(record.status, OrderStatus::Created);
    assert_eq!(dispatcher.state().expect("state"), CheckoutState::Idle);
}

#[tokio::test]
async fn stripe_gateway_posts_form_encoded_session_request() {
    let server = MockServer::start_async().await;
    let session_mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/checkout/sessions")
                .header("authorization", "Bearer sk_test_123")
                .body_contains("mode=payment")
                .body_contains("customer_email=ada%40example.com")
                .body_contains("unit_amount%5D=4050")
                .body_contains("metadata%5Breferral_code%5D=LUNA10");
            then.status(200).json_body(json!({
                "id": "cs_live_1",
                "url": "https://checkout.stripe.test/cs_live_1"
            }));
        })
        .await;

    let gateway = StripeGateway::new(
        StripeConfig {
            secret_key: "sk_test_123".into(),
            api_base: server.base_url(),
            success_url: "https://astral.test/thanks".into(),
            cancel_url: "https://astral.test/order".into(),
        },
        StdDuration::from_secs(5),
    )
    .expect("gateway");

    let h = harness().await;
    mock_catalog(&h.server).await;
    let dispatcher = CheckoutDispatcher::new(Arc::new(gateway), Arc::clone(&h.orders));
    let state = dispatcher.dispatch(&draft()).await.expect("dispatch");

    session_mock.assert_async().await;
    let CheckoutState::Redirected { session } = state else {
        panic!("expected redirect");
    };
    assert_eq!(session.id, "cs_live_1");
}

#[tokio::test]
async fn stripe_error_message_surfaces_as_failure_reason() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/checkout/sessions");
            then.status(402)
                .json_body(json!({ "error": { "message": "Your card was declined." } }));
        })
        .await;

    let config = StripeConfig {
        secret_key: "sk_test_123".into(),
        api_base: server.base_url(),
        success_url: "https://astral.test/thanks".into(),
        cancel_url: "https://astral.test/order".into(),
    };

    let h = harness().await;
    mock_catalog(&h.server).await;
    let dispatcher = CheckoutDispatcher::from_config(Some(&config), StdDuration::from_secs(5), Arc::clone(&h.orders));
    let state = dispatcher.dispatch(&draft()).await.expect("dispatch");

    let CheckoutState::Failed { reason, fallback } = state else {
        panic!("expected failed state");
    };
    assert_eq!(reason, "checkout unavailable: Your card was declined.");
    assert!(fallback.pricing.is_some());
}
