use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use order_dispatch::api::rest::router;
use order_dispatch::config::DispatchSettings;
use order_dispatch::engine::queue::SideEffect;
use order_dispatch::engine::signature::WebhookVerifier;
use order_dispatch::models::payment::{CheckoutRequest, CheckoutSession};
use order_dispatch::notify::LogNotifier;
use order_dispatch::payments::{CheckoutProvider, PaymentError};
use order_dispatch::state::{AppState, Dependencies};
use order_dispatch::store::MemoryStore;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

const WEBHOOK_SECRET: &str = "whsec_integration";

#[derive(Default)]
struct StubCheckout {
    calls: AtomicUsize,
}

#[async_trait]
impl CheckoutProvider for StubCheckout {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CheckoutSession {
            id: format!("cs_it_{call}"),
            url: format!("https://checkout.test/{}", request.order_id),
        })
    }
}

struct TestApp {
    app: axum::Router,
    state: Arc<AppState>,
    _effects_rx: mpsc::Receiver<SideEffect>,
}

fn setup() -> TestApp {
    let deps = Dependencies::with_store(
        Arc::new(MemoryStore::new()),
        Arc::new(StubCheckout::default()),
        Arc::new(LogNotifier),
        WebhookVerifier::new(WEBHOOK_SECRET, 300),
        DispatchSettings::default(),
    );
    let (state, rx) = AppState::new(deps, 1024, 1024);
    let state = Arc::new(state);
    TestApp {
        app: router(state.clone()),
        state,
        _effects_rx: rx,
    }
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn staff_request(role: &str, method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-actor-role", role)
        .header("x-actor-id", format!("{role}-1"))
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn admin_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    staff_request("admin", method, uri, body)
}

fn driver_request(token: &str, method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn webhook_request(state: &AppState, body: &Value) -> Request<Body> {
    let payload = serde_json::to_vec(body).unwrap();
    let signature = state
        .webhook
        .signature_header(&payload, Utc::now().timestamp())
        .unwrap();

    Request::builder()
        .method("POST")
        .uri("/webhooks/payments")
        .header("content-type", "application/json")
        .header("stripe-signature", signature)
        .body(Body::from(payload))
        .unwrap()
}

fn checkout_completed(event_id: &str, order_id: &str) -> Value {
    json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": "cs_it_0",
                "metadata": { "order_id": order_id }
            }
        }
    })
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn create_order(app: &axum::Router) -> String {
    let (status, body) = send(
        app,
        json_request(
            "POST",
            "/orders",
            json!({
                "service_type": "courier",
                "pickup_address": "100 Market St",
                "delivery_address": "2 Harbor Way",
                "scheduled_for": "2026-11-02T15:00:00Z",
                "amount_cents": 3900,
                "customer": { "name": "Dana", "email": "dana@example.com" }
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "pending_admin_review");
    body["id"].as_str().unwrap().to_string()
}

async fn paid_order(test: &TestApp) -> String {
    let order_id = create_order(&test.app).await;
    let (status, _) = send(
        &test.app,
        admin_request(
            "POST",
            &format!("/admin/orders/{order_id}/approve"),
            json!({ "amount_cents": 4625 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &test.app,
        webhook_request(&test.state, &checkout_completed("evt_paid", &order_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "applied");
    order_id
}

/// Registers a verified driver and returns `(driver_id, bearer token)`.
async fn login_driver(app: &axum::Router, name: &str) -> (String, String) {
    let (status, driver) = send(
        app,
        admin_request(
            "POST",
            "/admin/drivers",
            json!({ "name": name, "pin": "2468", "verified": true }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(driver.get("pin_digest").is_none());
    let driver_id = driver["id"].as_str().unwrap().to_string();

    let (status, session) = send(
        app,
        json_request(
            "POST",
            "/driver/sessions",
            json!({ "driver_id": driver_id, "pin": "2468" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    (driver_id, session["token"].as_str().unwrap().to_string())
}

#[tokio::test]
async fn health_returns_ok() {
    let test = setup();
    let (status, body) = send(&test.app, get_request("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["orders"], 0);
    assert_eq!(body["drivers"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let test = setup();
    let response = test.app.oneshot(get_request("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("side_effects_in_queue"));
}

#[tokio::test]
async fn happy_path_from_review_to_completion() {
    let test = setup();
    let app = &test.app;
    let order_id = create_order(app).await;

    let (status, approved) = send(
        app,
        admin_request(
            "POST",
            &format!("/admin/orders/{order_id}/approve"),
            json!({ "amount_cents": 4625 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["status"], "approved_pending_payment");
    assert_eq!(approved["amount_cents"], 4625);
    assert!(approved["checkout_url"].as_str().unwrap().starts_with("https://"));

    let (status, outcome) = send(
        app,
        webhook_request(&test.state, &checkout_completed("evt_1", &order_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["outcome"], "applied");

    let (_, paid) = send(app, get_request(&format!("/orders/{order_id}"))).await;
    assert_eq!(paid["status"], "paid");
    assert_eq!(paid["payment_status"], "paid");
    assert!(!paid["paid_at"].is_null());

    let (driver_id, token) = login_driver(app, "D1").await;

    let (status, open) = send(
        app,
        driver_request(&token, "GET", "/driver/orders/available", Value::Null),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(open
        .as_array()
        .unwrap()
        .iter()
        .any(|order| order["id"] == order_id.as_str()));

    let (status, assigned) = send(
        app,
        driver_request(&token, "POST", &format!("/driver/orders/{order_id}/accept"), Value::Null),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(assigned["status"], "assigned");
    assert_eq!(assigned["assigned_driver_id"], driver_id.as_str());

    let (status, _) = send(
        app,
        driver_request(
            &token,
            "POST",
            &format!("/driver/orders/{order_id}/proof/pickup"),
            json!({ "url": "https://uploads.test/pickup.jpg" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, moving) = send(
        app,
        driver_request(
            &token,
            "POST",
            &format!("/driver/orders/{order_id}/status"),
            json!({ "status": "en_route" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(moving["status"], "en_route");

    let (status, _) = send(
        app,
        driver_request(
            &token,
            "POST",
            &format!("/driver/orders/{order_id}/proof/delivery"),
            json!({ "confirmed": true }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, done) = send(
        app,
        driver_request(
            &token,
            "POST",
            &format!("/driver/orders/{order_id}/status"),
            json!({ "status": "completed" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["status"], "completed");
    assert!(!done["delivered_at"].is_null());
}

#[tokio::test]
async fn duplicate_webhook_is_acknowledged_without_second_commit() {
    let test = setup();
    let order_id = paid_order(&test).await;

    let (_, first) = send(&test.app, get_request(&format!("/orders/{order_id}"))).await;

    let (status, outcome) = send(
        &test.app,
        webhook_request(&test.state, &checkout_completed("evt_paid", &order_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["outcome"], "duplicate");

    let (_, second) = send(&test.app, get_request(&format!("/orders/{order_id}"))).await;
    assert_eq!(first["paid_at"], second["paid_at"]);
    assert_eq!(second["status"], "paid");
}

#[tokio::test]
async fn two_drivers_racing_get_one_ok_and_one_conflict() {
    let test = setup();
    let order_id = paid_order(&test).await;
    let (_, token_a) = login_driver(&test.app, "A").await;
    let (_, token_b) = login_driver(&test.app, "B").await;

    let uri = format!("/driver/orders/{order_id}/accept");
    let (a, b) = tokio::join!(
        send(&test.app, driver_request(&token_a, "POST", &uri, Value::Null)),
        send(&test.app, driver_request(&token_b, "POST", &uri, Value::Null)),
    );

    let statuses = [a.0, b.0];
    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::OK).count(), 1);
    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::CONFLICT).count(), 1);

    let loser = if a.0 == StatusCode::CONFLICT { a.1 } else { b.1 };
    assert_eq!(loser["code"], "conflict");
    assert_eq!(loser["current_status"], "assigned");
}

#[tokio::test]
async fn en_route_without_pickup_proof_is_precondition_failed() {
    let test = setup();
    let order_id = paid_order(&test).await;
    let (_, token) = login_driver(&test.app, "D1").await;

    send(
        &test.app,
        driver_request(&token, "POST", &format!("/driver/orders/{order_id}/accept"), Value::Null),
    )
    .await;

    for _ in 0..2 {
        let (status, body) = send(
            &test.app,
            driver_request(
                &token,
                "POST",
                &format!("/driver/orders/{order_id}/status"),
                json!({ "status": "en_route" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert_eq!(body["code"], "proof_required");
        assert_eq!(body["current_status"], "assigned");
    }
}

#[tokio::test]
async fn other_driver_cannot_touch_an_assigned_order() {
    let test = setup();
    let order_id = paid_order(&test).await;
    let (_, owner) = login_driver(&test.app, "Owner").await;
    let (_, other) = login_driver(&test.app, "Other").await;

    send(
        &test.app,
        driver_request(&owner, "POST", &format!("/driver/orders/{order_id}/accept"), Value::Null),
    )
    .await;

    let (status, _) = send(
        &test.app,
        driver_request(
            &other,
            "POST",
            &format!("/driver/orders/{order_id}/proof/pickup"),
            json!({ "confirmed": true }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn manual_pay_needs_admin_and_rejects_repeats() {
    let test = setup();
    let app = &test.app;
    let order_id = create_order(app).await;
    let uri = format!("/admin/orders/{order_id}/mark-paid");
    let note = json!({ "note": "bank transfer ref 7781" });

    let (status, body) = send(app, admin_request("POST", &uri, note.clone())).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "invalid_transition");
    assert_eq!(body["current_status"], "pending_admin_review");
    assert_eq!(body["allowed"], json!(["approved_pending_payment", "rejected"]));

    send(
        app,
        admin_request("POST", &format!("/admin/orders/{order_id}/approve"), json!({})),
    )
    .await;

    let (status, _) = send(app, staff_request("ops", "POST", &uri, note.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(app, admin_request("POST", &uri, note.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["paid_via"], "manual");

    let (status, body) = send(app, admin_request("POST", &uri, note)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["current_status"], "paid");
}

#[tokio::test]
async fn unknown_event_type_is_acknowledged() {
    let test = setup();
    let (status, body) = send(
        &test.app,
        webhook_request(
            &test.state,
            &json!({ "id": "evt_x", "type": "invoice.paid", "data": { "object": {} } }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "ignored");
}

#[tokio::test]
async fn bad_signature_is_unauthorized() {
    let test = setup();
    let order_id = create_order(&test.app).await;
    let payload = serde_json::to_vec(&checkout_completed("evt_forged", &order_id)).unwrap();
    let forged = WebhookVerifier::new("whsec_wrong", 300)
        .signature_header(&payload, Utc::now().timestamp())
        .unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/payments")
        .header("stripe-signature", forged)
        .body(Body::from(payload))
        .unwrap();
    let (status, body) = send(&test.app, request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "authentication_failed");

    let (_, order) = send(&test.app, get_request(&format!("/orders/{order_id}"))).await;
    assert_eq!(order["payment_status"], "unpaid");
}

#[tokio::test]
async fn event_without_order_metadata_is_acknowledged() {
    let test = setup();
    let (status, body) = send(
        &test.app,
        webhook_request(
            &test.state,
            &json!({
                "id": "evt_orphan",
                "type": "checkout.session.completed",
                "data": { "object": { "id": "cs_orphan" } }
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "unreconciled");
}

#[tokio::test]
async fn driver_routes_require_a_live_session() {
    let test = setup();
    let (status, _) = send(&test.app, get_request("/driver/orders")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, token) = login_driver(&test.app, "D1").await;
    let (status, _) = send(
        &test.app,
        driver_request(&token, "DELETE", "/driver/sessions", Value::Null),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &test.app,
        driver_request(&token, "GET", "/driver/orders", Value::Null),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_order_validates_input() {
    let test = setup();
    let (status, _) = send(
        &test.app,
        json_request(
            "POST",
            "/orders",
            json!({
                "service_type": "courier",
                "pickup_address": "100 Market St",
                "scheduled_for": "2026-11-02T15:00:00Z",
                "amount_cents": 3900,
                "customer": { "name": "Dana", "email": "dana@example.com" }
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &test.app,
        get_request("/orders/00000000-0000-0000-0000-000000000000"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn prepaid_staff_order_lands_in_dispatch_pool() {
    let test = setup();
    let (status, body) = send(
        &test.app,
        staff_request(
            "ops",
            "POST",
            "/admin/orders",
            json!({
                "service_type": "notary",
                "pickup_address": "9 Court Sq",
                "scheduled_for": "2026-11-03T10:00:00Z",
                "amount_cents": 7500,
                "customer": { "name": "Lee", "email": "lee@example.com" },
                "prepaid": true,
                "payment_reference": "inv-2231"
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "paid");
    assert_eq!(body["paid_via"], "prepaid");

    let (status, listed) = send(
        &test.app,
        staff_request("ops", "GET", "/admin/orders?status=paid", Value::Null),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
}
