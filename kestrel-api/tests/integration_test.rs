use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use kestrel_api::{app, AppState};
use kestrel_order::mock::{MockCatalogClient, MockFailure, MockPaymentGateway};
use kestrel_order::{OrchestratorConfig, OrderOrchestrator};
use kestrel_shared::{PaymentSucceededEvent, Redacted};
use kestrel_store::InMemoryOrderStore;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

struct TestApp {
    router: Router,
    orchestrator: Arc<OrderOrchestrator>,
    payments: Arc<MockPaymentGateway>,
}

fn test_app() -> TestApp {
    let catalog = MockCatalogClient::new().with_product("p1", "Widget", dec!(5.00));
    let payments = Arc::new(MockPaymentGateway::new());
    let orchestrator = Arc::new(OrderOrchestrator::new(
        Arc::new(InMemoryOrderStore::new()),
        Arc::new(catalog),
        payments.clone(),
        OrchestratorConfig::default(),
    ));
    let router = app(AppState { orchestrator: orchestrator.clone() });
    TestApp { router, orchestrator, payments }
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let t = test_app();
    let (status, body) = send(&t.router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".into()));
}

#[tokio::test]
async fn test_order_lifecycle() {
    let t = test_app();

    let (status, body) = send(
        &t.router,
        "POST",
        "/v1/orders",
        Some(json!({"items": [{"product_id": "p1", "quantity": 2}]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["order"]["status"], "PENDING");
    assert_eq!(body["order"]["total_items"], 2);
    assert_eq!(body["order"]["items"][0]["name"], "Widget");
    assert!(body["payment_session"]["url"].is_string());
    let total: rust_decimal::Decimal =
        serde_json::from_value(body["order"]["total_amount"].clone()).unwrap();
    assert_eq!(total, dec!(10.00));

    let id: Uuid = serde_json::from_value(body["order"]["id"].clone()).unwrap();

    t.orchestrator
        .mark_order_as_paid(PaymentSucceededEvent {
            order_id: id,
            payment_charge_id: "ch_1".into(),
            receipt_url: Redacted("http://r".into()),
        })
        .await
        .unwrap();

    let (status, body) = send(&t.router, "GET", &format!("/v1/orders/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "PAID");
    assert_eq!(body["paid"], true);
    assert_eq!(body["receipts"][0]["receipt_url"], "http://r");

    let (status, body) = send(
        &t.router,
        "PATCH",
        &format!("/v1/orders/{}/status", id),
        Some(json!({"status": "DELIVERED"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "DELIVERED");
}

#[tokio::test]
async fn test_unknown_product_is_bad_request() {
    let t = test_app();

    let (status, body) = send(
        &t.router,
        "POST",
        "/v1/orders",
        Some(json!({"items": [{"product_id": "nope", "quantity": 1}]})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);
    assert!(body["message"].as_str().unwrap().contains("nope"));

    let (_, list) = send(&t.router, "GET", "/v1/orders", None).await;
    assert_eq!(list["meta"]["count"], 0);
}

#[tokio::test]
async fn test_malformed_requests_are_bad_requests() {
    let t = test_app();

    let (status, body) = send(&t.router, "POST", "/v1/orders", Some(json!({"items": "p1"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);

    let (status, body) = send(&t.router, "GET", "/v1/orders/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);

    let (status, _) = send(&t.router, "GET", "/v1/orders?status=SHIPPED", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_order_is_not_found() {
    let t = test_app();
    let id = Uuid::new_v4();

    let (status, body) = send(&t.router, "GET", &format!("/v1/orders/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], format!("Order with id {} not found", id));

    let (status, _) = send(
        &t.router,
        "PATCH",
        &format!("/v1/orders/{}/status", id),
        Some(json!({"status": "CANCELLED"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_orders_paginates() {
    let t = test_app();
    for _ in 0..12 {
        let (status, _) = send(
            &t.router,
            "POST",
            "/v1/orders",
            Some(json!({"items": [{"product_id": "p1", "quantity": 1}]})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = send(&t.router, "GET", "/v1/orders?page=2&limit=10", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["meta"], json!({"count": 12, "total_pages": 2, "page": 2}));

    let (status, body) = send(&t.router, "GET", "/v1/orders?status=PAID", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["count"], 0);
}

#[tokio::test]
async fn test_gateway_outage_then_session_renewal() {
    let t = test_app();
    t.payments.fail_with(Some(MockFailure::Unavailable));

    let (status, body) = send(
        &t.router,
        "POST",
        "/v1/orders",
        Some(json!({"items": [{"product_id": "p1", "quantity": 1}]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["payment_session"].is_null());
    assert_eq!(body["payment_error"]["status"], 500);
    let id = body["order"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(&t.router, "POST", &format!("/v1/orders/{}/payment-session", id), None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Internal Server Error");

    t.payments.fail_with(None);
    let (status, body) = send(&t.router, "POST", &format!("/v1/orders/{}/payment-session", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["url"].is_string());
}
