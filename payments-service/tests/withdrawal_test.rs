//! Withdrawal tests.

mod common;

use axum::http::StatusCode;
use common::*;
use payments_service::models::{TransactionMemo, TransactionSource};
use payments_service::services::Store;
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn withdrawal_respects_the_balance() {
    let gateway = mock_gateway().await;
    let app = spawn_app(&gateway.uri());

    let user = Uuid::new_v4();
    app.store
        .credit(
            user,
            Decimal::from(500),
            TransactionMemo::new(TransactionSource::Cash),
        )
        .await
        .unwrap();

    // Overdraw fails and the balance is untouched.
    let (status, body) = post_json(
        &app.router,
        &format!("/wallets/{}/withdraw", user),
        json!({ "amount": 600, "method": "mobile_money", "destination": "254712345678" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "body: {}", body);

    let (_, balance) = get_json(&app.router, &format!("/wallets/{}/balance", user)).await;
    assert_eq!(decimal_field(&balance["balance"]), Decimal::from(500));

    // Withdrawing the full balance clears it.
    let (status, transaction) = post_json(
        &app.router,
        &format!("/wallets/{}/withdraw", user),
        json!({ "amount": 500, "method": "mobile_money", "destination": "254712345678" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(transaction["direction"], "debit");
    assert_eq!(transaction["source"], "withdrawal");
    assert_eq!(transaction["status"], "completed");

    let (_, balance) = get_json(&app.router, &format!("/wallets/{}/balance", user)).await;
    assert_eq!(decimal_field(&balance["balance"]), Decimal::ZERO);

    // The statement shows the seed credit and the withdrawal debit.
    let (_, transactions) =
        get_json(&app.router, &format!("/wallets/{}/transactions", user)).await;
    let transactions = transactions.as_array().unwrap();
    assert_eq!(transactions.len(), 2);
    assert!(transactions
        .iter()
        .any(|t| t["source"] == "withdrawal" && t["direction"] == "debit"));
}

#[tokio::test]
async fn withdrawal_requires_method_and_destination() {
    let gateway = mock_gateway().await;
    let app = spawn_app(&gateway.uri());

    let user = Uuid::new_v4();

    let (status, _) = post_json(
        &app.router,
        &format!("/wallets/{}/withdraw", user),
        json!({ "amount": 50, "method": "", "destination": "254712345678" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = post_json(
        &app.router,
        &format!("/wallets/{}/withdraw", user),
        json!({ "amount": 50, "method": "mobile_money", "destination": "" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn withdrawal_rejects_non_positive_amounts() {
    let gateway = mock_gateway().await;
    let app = spawn_app(&gateway.uri());

    let user = Uuid::new_v4();
    let (status, _) = post_json(
        &app.router,
        &format!("/wallets/{}/withdraw", user),
        json!({ "amount": 0, "method": "mobile_money", "destination": "254712345678" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
