//! Common test utilities for payments-service integration tests.
//!
//! Tests run against the in-memory store with the gateway stubbed by
//! wiremock, so the suite is self-contained.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use payments_service::config::{Config, DatabaseConfig, GatewayConfig, ServerConfig};
use payments_service::services::{DarajaClient, MemoryStore, Store};
use payments_service::{router, AppState};
use rust_decimal::Decimal;
use secrecy::Secret;
use serde_json::{json, Value};
use std::sync::{Arc, Once};
use tower::util::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,payments_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn test_config(gateway_base: &str) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        database: DatabaseConfig {
            url: Secret::new("postgres://unused".to_string()),
            max_connections: 2,
            min_connections: 1,
        },
        gateway: GatewayConfig {
            consumer_key: "test-consumer".to_string(),
            consumer_secret: Secret::new("test-secret".to_string()),
            shortcode: "174379".to_string(),
            passkey: Secret::new("test-passkey".to_string()),
            api_base_url: gateway_base.to_string(),
            callback_url: "http://localhost:3004/payments/callback".to_string(),
        },
        service_name: "payments-service-test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub state: AppState,
}

/// Build an application over the in-memory store, pointing the gateway
/// client at the given base URL (usually a wiremock server).
pub fn spawn_app(gateway_base: &str) -> TestApp {
    init_tracing();

    let config = test_config(gateway_base);
    let store = Arc::new(MemoryStore::new());
    let gateway = DarajaClient::new(config.gateway.clone());
    let state = AppState::new(config, store.clone() as Arc<dyn Store>, gateway);

    TestApp {
        router: router(state.clone()),
        store,
        state,
    }
}

/// Fire one request at the router and decode the JSON response.
pub async fn request(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }

    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("Failed to build request");

    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("Router call failed");

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    (status, json)
}

pub async fn post_json(router: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    request(router, "POST", uri, Some(body), &[]).await
}

pub async fn get_json(router: &Router, uri: &str) -> (StatusCode, Value) {
    request(router, "GET", uri, None, &[]).await
}

/// Parse a Decimal out of a JSON field (serialized as a string).
pub fn decimal_field(value: &Value) -> Decimal {
    value
        .as_str()
        .unwrap_or_else(|| panic!("Expected string decimal, got {}", value))
        .parse()
        .expect("Failed to parse decimal")
}

// ---------------------------------------------------------------------------
// Gateway stubs
// ---------------------------------------------------------------------------

/// Start a mock gateway with a working token endpoint.
pub async fn mock_gateway() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/oauth/v1/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-token",
            "expires_in": "3599"
        })))
        .mount(&server)
        .await;

    server
}

/// Stub a successful push acknowledgement with the given checkout id.
pub async fn mock_stk_push_success(server: &MockServer, checkout_id: &str) {
    Mock::given(method("POST"))
        .and(path("/mpesa/stkpush/v1/processrequest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "MerchantRequestID": "29115-34620561-1",
            "CheckoutRequestID": checkout_id,
            "ResponseCode": "0",
            "ResponseDescription": "Success. Request accepted for processing",
            "CustomerMessage": "Success. Request accepted for processing"
        })))
        .mount(server)
        .await;
}

/// Gateway callback payload for a successful payment.
pub fn success_callback(checkout_id: &str, amount: f64, receipt: &str) -> Value {
    json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": checkout_id,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        { "Name": "Amount", "Value": amount },
                        { "Name": "MpesaReceiptNumber", "Value": receipt },
                        { "Name": "TransactionDate", "Value": 20260807104523u64 },
                        { "Name": "PhoneNumber", "Value": 254712345678u64 }
                    ]
                }
            }
        }
    })
}

/// Gateway callback payload for a failed payment.
pub fn failure_callback(checkout_id: &str, result_code: i64, desc: &str) -> Value {
    json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": checkout_id,
                "ResultCode": result_code,
                "ResultDesc": desc
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Register a provider; returns (provider_id, wallet user_id).
pub async fn create_provider(router: &Router) -> (Uuid, Uuid) {
    let user_id = Uuid::new_v4();
    let (status, body) = post_json(
        router,
        "/providers",
        json!({
            "display_name": "Dr. Achieng",
            "email": format!("{}@clinic.example", Uuid::new_v4().simple()),
            "user_id": user_id
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "provider creation failed: {}", body);

    let provider_id = body["provider_id"]
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .expect("provider_id missing");
    (provider_id, user_id)
}

/// Create an appointment invoice with a 1000 consultation fee and 150
/// transport surcharge (total 1150), linked to the given provider.
pub async fn create_appointment_invoice(router: &Router, provider_id: Uuid) -> Value {
    let (status, body) = post_json(
        router,
        "/invoices",
        json!({
            "origin": "appointment",
            "customer_name": "Jane Wanjiku",
            "customer_email": "jane@example.com",
            "provider_id": provider_id,
            "appointment_id": Uuid::new_v4(),
            "consultation_fee": 1000,
            "transport_fee": 150,
            "line_items": [
                { "description": "Consultation", "quantity": 1, "unit_price": 1000 },
                { "description": "Transport", "quantity": 1, "unit_price": 150 }
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "invoice creation failed: {}", body);
    body
}

/// Create a manual-origin invoice for a flat amount.
pub async fn create_manual_invoice(router: &Router, provider_id: Uuid, amount: i64) -> Value {
    let (status, body) = post_json(
        router,
        "/invoices",
        json!({
            "origin": "manual",
            "customer_name": "John Otieno",
            "customer_email": "john@example.com",
            "provider_id": provider_id,
            "line_items": [
                { "description": "Pharmacy order", "quantity": 1, "unit_price": amount }
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "invoice creation failed: {}", body);
    body
}

/// Initiate a push payment for an invoice; returns the checkout request id.
pub async fn initiate_payment(router: &Router, invoice_id: &str) -> String {
    let (status, body) = post_json(
        router,
        "/payments/initiate",
        json!({ "invoice_id": invoice_id, "phone": "0712345678" }),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED, "initiation failed: {}", body);
    body["checkout_request_id"]
        .as_str()
        .expect("checkout_request_id missing")
        .to_string()
}
