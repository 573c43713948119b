//! Wallet concurrency and balance tests.

mod common;

use axum::http::StatusCode;
use common::*;
use payments_service::models::{TransactionMemo, TransactionSource};
use payments_service::services::{Store, WithdrawalProcessor};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

#[tokio::test]
async fn interleaved_credits_and_debits_never_lose_updates() {
    init_tracing();
    let store = Arc::new(payments_service::services::MemoryStore::new());
    let user = Uuid::new_v4();

    // Seed enough that no debit can fail.
    store
        .credit(
            user,
            Decimal::from(1000),
            TransactionMemo::new(TransactionSource::Cash),
        )
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .credit(
                    user,
                    Decimal::from(10),
                    TransactionMemo::new(TransactionSource::Cash),
                )
                .await
                .unwrap();
        }));
    }
    for _ in 0..10 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .debit(
                    user,
                    Decimal::from(5),
                    TransactionMemo::new(TransactionSource::Withdrawal),
                )
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // 1000 + 20*10 - 10*5, regardless of interleaving.
    assert_eq!(store.balance(user).await.unwrap(), Decimal::from(1150));

    // And the balance equals the signed sum of the log.
    let log_sum: Decimal = store
        .list_transactions(user)
        .await
        .unwrap()
        .iter()
        .map(|t| t.signed_amount())
        .sum();
    assert_eq!(log_sum, Decimal::from(1150));
}

#[tokio::test]
async fn racing_withdrawals_cannot_double_spend() {
    init_tracing();
    let store = Arc::new(payments_service::services::MemoryStore::new());
    let user = Uuid::new_v4();

    store
        .credit(
            user,
            Decimal::from(100),
            TransactionMemo::new(TransactionSource::Cash),
        )
        .await
        .unwrap();

    let processor = WithdrawalProcessor::new(store.clone());
    let mut handles = Vec::new();
    for _ in 0..2 {
        let processor = processor.clone();
        handles.push(tokio::spawn(async move {
            processor
                .withdraw(user, Decimal::from(100), "mobile_money", "254712345678")
                .await
        }));
    }

    let mut successes = 0;
    let mut failures = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(_) => failures += 1,
        }
    }

    assert_eq!(successes, 1, "exactly one withdrawal may clear");
    assert_eq!(failures, 1);
    assert_eq!(store.balance(user).await.unwrap(), Decimal::ZERO);
}

#[tokio::test]
async fn balance_reads_auto_provision_an_empty_wallet() {
    let gateway = mock_gateway().await;
    let app = spawn_app(&gateway.uri());

    let never_seen = Uuid::new_v4();
    let (status, body) =
        get_json(&app.router, &format!("/wallets/{}/balance", never_seen)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal_field(&body["balance"]), Decimal::ZERO);

    let (status, body) =
        get_json(&app.router, &format!("/wallets/{}/transactions", never_seen)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 0);
}
