//! End-to-end push-payment flow tests: initiation, callback settlement,
//! idempotency, and failure handling.

mod common;

use axum::http::StatusCode;
use common::*;
use payments_service::models::{GatewayRequestStatus, PendingGatewayRequest, TARGET_INVOICE};
use payments_service::services::Store;
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn appointment_payment_settles_end_to_end() {
    let gateway = mock_gateway().await;
    mock_stk_push_success(&gateway, "ws_CO_e2e_1").await;
    let app = spawn_app(&gateway.uri());

    let (provider_id, user_id) = create_provider(&app.router).await;
    let invoice = create_appointment_invoice(&app.router, provider_id).await;
    let invoice_id = invoice["invoice_id"].as_str().unwrap();
    assert_eq!(decimal_field(&invoice["total"]), Decimal::from(1150));

    let checkout_id = initiate_payment(&app.router, invoice_id).await;
    assert_eq!(checkout_id, "ws_CO_e2e_1");

    // Request is tracked as pending until the callback lands.
    let (status, request) =
        get_json(&app.router, &format!("/payments/requests/{}", checkout_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(request["status"], "pending");
    assert_eq!(request["phone"], "254712345678");

    let (status, ack) = post_json(
        &app.router,
        "/payments/callback",
        success_callback(&checkout_id, 1150.0, "NLJ7RT61SV"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["ResultCode"], 0);

    // Invoice is paid with the consultation-fee commission split:
    // 40% of the 1000 fee, transport untouched.
    let (_, invoice) = get_json(&app.router, &format!("/invoices/{}", invoice_id)).await;
    assert_eq!(invoice["status"], "paid");
    assert_eq!(decimal_field(&invoice["commission"]), Decimal::from(400));

    // Provider wallet received 600 + 150.
    let (_, balance) = get_json(&app.router, &format!("/wallets/{}/balance", user_id)).await;
    assert_eq!(decimal_field(&balance["balance"]), Decimal::from(750));

    // Exactly one completed transaction referencing the receipt.
    let (_, transactions) =
        get_json(&app.router, &format!("/wallets/{}/transactions", user_id)).await;
    let transactions = transactions.as_array().unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0]["reference"], "NLJ7RT61SV");
    assert_eq!(transactions[0]["status"], "completed");
    assert_eq!(transactions[0]["direction"], "credit");

    // The gateway request is terminal with the receipt recorded.
    let (_, request) =
        get_json(&app.router, &format!("/payments/requests/{}", checkout_id)).await;
    assert_eq!(request["status"], "success");
    assert_eq!(request["receipt_number"], "NLJ7RT61SV");
}

#[tokio::test]
async fn default_policy_payment_settles_end_to_end() {
    let gateway = mock_gateway().await;
    mock_stk_push_success(&gateway, "ws_CO_e2e_2").await;
    let app = spawn_app(&gateway.uri());

    let (provider_id, user_id) = create_provider(&app.router).await;
    let invoice = create_manual_invoice(&app.router, provider_id, 900).await;
    let invoice_id = invoice["invoice_id"].as_str().unwrap();

    let checkout_id = initiate_payment(&app.router, invoice_id).await;
    let (status, _) = post_json(
        &app.router,
        "/payments/callback",
        success_callback(&checkout_id, 900.0, "ABC123"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Total-based policy: 40% commission, 60% to the provider.
    let (_, invoice) = get_json(&app.router, &format!("/invoices/{}", invoice_id)).await;
    assert_eq!(invoice["status"], "paid");
    assert_eq!(decimal_field(&invoice["commission"]), Decimal::from(360));

    let (_, balance) = get_json(&app.router, &format!("/wallets/{}/balance", user_id)).await;
    assert_eq!(decimal_field(&balance["balance"]), Decimal::from(540));

    let (_, transactions) =
        get_json(&app.router, &format!("/wallets/{}/transactions", user_id)).await;
    assert_eq!(transactions.as_array().unwrap().len(), 1);
    assert_eq!(transactions[0]["reference"], "ABC123");
}

#[tokio::test]
async fn failed_callback_leaves_money_untouched() {
    let gateway = mock_gateway().await;
    mock_stk_push_success(&gateway, "ws_CO_fail_1").await;
    let app = spawn_app(&gateway.uri());

    let (provider_id, user_id) = create_provider(&app.router).await;
    let invoice = create_manual_invoice(&app.router, provider_id, 900).await;
    let invoice_id = invoice["invoice_id"].as_str().unwrap();

    let checkout_id = initiate_payment(&app.router, invoice_id).await;
    let (status, ack) = post_json(
        &app.router,
        "/payments/callback",
        failure_callback(&checkout_id, 1032, "Request cancelled by user."),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["ResultCode"], 0);

    let (_, invoice) = get_json(&app.router, &format!("/invoices/{}", invoice_id)).await;
    assert_eq!(invoice["status"], "pending");

    let (_, balance) = get_json(&app.router, &format!("/wallets/{}/balance", user_id)).await;
    assert_eq!(decimal_field(&balance["balance"]), Decimal::ZERO);

    let (_, request) =
        get_json(&app.router, &format!("/payments/requests/{}", checkout_id)).await;
    assert_eq!(request["status"], "failed");
    assert_eq!(request["result_code"], 1032);
}

#[tokio::test]
async fn duplicate_callback_credits_exactly_once() {
    let gateway = mock_gateway().await;
    mock_stk_push_success(&gateway, "ws_CO_dup_1").await;
    let app = spawn_app(&gateway.uri());

    let (provider_id, user_id) = create_provider(&app.router).await;
    let invoice = create_manual_invoice(&app.router, provider_id, 900).await;
    let invoice_id = invoice["invoice_id"].as_str().unwrap();

    let checkout_id = initiate_payment(&app.router, invoice_id).await;
    let payload = success_callback(&checkout_id, 900.0, "DUP001");

    let (first, _) = post_json(&app.router, "/payments/callback", payload.clone()).await;
    let (second, ack) = post_json(&app.router, "/payments/callback", payload).await;
    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(ack["ResultCode"], 0);

    let (_, balance) = get_json(&app.router, &format!("/wallets/{}/balance", user_id)).await;
    assert_eq!(decimal_field(&balance["balance"]), Decimal::from(540));

    let (_, transactions) =
        get_json(&app.router, &format!("/wallets/{}/transactions", user_id)).await;
    assert_eq!(transactions.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn callback_for_unknown_request_is_retryable_error() {
    let gateway = mock_gateway().await;
    let app = spawn_app(&gateway.uri());

    let (status, body) = post_json(
        &app.router,
        "/payments/callback",
        success_callback("ws_CO_never_issued", 500.0, "GHOST1"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["retryable"], true);
}

#[tokio::test]
async fn unmatchable_payment_is_kept_for_manual_resolution() {
    let gateway = mock_gateway().await;
    let app = spawn_app(&gateway.uri());

    // A pending request whose invoice vanished (e.g. created against a
    // target that was never persisted).
    let now = chrono::Utc::now();
    app.store
        .insert_gateway_request(&PendingGatewayRequest {
            checkout_request_id: "ws_CO_orphan_1".to_string(),
            merchant_request_id: "29115-1".to_string(),
            phone: "254712345678".to_string(),
            amount: Decimal::from(500),
            status: GatewayRequestStatus::Pending,
            result_code: None,
            result_description: None,
            receipt_number: None,
            account_reference: "MAN-20260101-FFFFFFFF".to_string(),
            target_kind: TARGET_INVOICE.to_string(),
            target_id: Uuid::new_v4(),
            created_utc: now,
            updated_utc: now,
        })
        .await
        .unwrap();

    let (status, ack) = post_json(
        &app.router,
        "/payments/callback",
        success_callback("ws_CO_orphan_1", 500.0, "ORPHAN1"),
    )
    .await;
    // Not the gateway's fault: acknowledged, but the money is queryable.
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["ResultCode"], 0);

    let (status, unresolved) = get_json(&app.router, "/payments/unresolved").await;
    assert_eq!(status, StatusCode::OK);
    let unresolved = unresolved.as_array().unwrap();
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0]["checkout_request_id"], "ws_CO_orphan_1");
    assert_eq!(unresolved[0]["receipt_number"], "ORPHAN1");
}

#[tokio::test]
async fn initiation_is_rejected_for_settled_invoices() {
    let gateway = mock_gateway().await;
    mock_stk_push_success(&gateway, "ws_CO_conflict_1").await;
    let app = spawn_app(&gateway.uri());

    let (provider_id, _) = create_provider(&app.router).await;
    let invoice = create_manual_invoice(&app.router, provider_id, 900).await;
    let invoice_id = invoice["invoice_id"].as_str().unwrap();

    let checkout_id = initiate_payment(&app.router, invoice_id).await;
    post_json(
        &app.router,
        "/payments/callback",
        success_callback(&checkout_id, 900.0, "PAID01"),
    )
    .await;

    let (status, _) = post_json(
        &app.router,
        "/payments/initiate",
        json!({ "invoice_id": invoice_id, "phone": "0712345678" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn gateway_outage_surfaces_as_retryable_bad_gateway() {
    let gateway = mock_gateway().await;
    Mock::given(method("POST"))
        .and(path("/mpesa/stkpush/v1/processrequest"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&gateway)
        .await;
    let app = spawn_app(&gateway.uri());

    let (provider_id, _) = create_provider(&app.router).await;
    let invoice = create_manual_invoice(&app.router, provider_id, 900).await;

    let (status, body) = post_json(
        &app.router,
        "/payments/initiate",
        json!({ "invoice_id": invoice["invoice_id"], "phone": "0712345678" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["retryable"], true);

    // Nothing was persisted for the failed initiation.
    let (_, requests) = get_json(
        &app.router,
        &format!("/invoices/{}/payments", invoice["invoice_id"].as_str().unwrap()),
    )
    .await;
    assert_eq!(requests.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn status_query_polls_the_gateway() {
    let gateway = mock_gateway().await;
    mock_stk_push_success(&gateway, "ws_CO_query_1").await;
    Mock::given(method("POST"))
        .and(path("/mpesa/stkpushquery/v1/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ResponseCode": "0",
            "ResponseDescription": "The service request has been accepted successfully",
            "MerchantRequestID": "29115-34620561-1",
            "CheckoutRequestID": "ws_CO_query_1",
            "ResultCode": "1032",
            "ResultDesc": "Request cancelled by user."
        })))
        .mount(&gateway)
        .await;
    let app = spawn_app(&gateway.uri());

    let (provider_id, _) = create_provider(&app.router).await;
    let invoice = create_manual_invoice(&app.router, provider_id, 900).await;
    let checkout_id =
        initiate_payment(&app.router, invoice["invoice_id"].as_str().unwrap()).await;

    let (status, body) = post_json(
        &app.router,
        &format!("/payments/requests/{}/query", checkout_id),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ResultCode"], "1032");

    // Polling never finalizes local state; the callback does that.
    let (_, request) =
        get_json(&app.router, &format!("/payments/requests/{}", checkout_id)).await;
    assert_eq!(request["status"], "pending");

    let (status, _) = post_json(
        &app.router,
        "/payments/requests/ws_CO_unknown/query",
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
