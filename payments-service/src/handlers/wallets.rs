//! Wallet handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{BalanceResponse, TransactionResponse, WithdrawRequest},
    services::Store,
    AppState,
};

/// Current wallet balance. Provisions an empty wallet on first read.
pub async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<BalanceResponse>, AppError> {
    let balance = state.store.balance(user_id).await?;

    Ok(Json(BalanceResponse { user_id, balance }))
}

/// Wallet statement, newest first.
pub async fn list_transactions(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<TransactionResponse>>, AppError> {
    let transactions = state.store.list_transactions(user_id).await?;

    Ok(Json(
        transactions
            .into_iter()
            .map(TransactionResponse::from)
            .collect(),
    ))
}

/// Withdraw from a wallet to an external destination.
pub async fn withdraw(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<WithdrawRequest>,
) -> Result<(StatusCode, Json<TransactionResponse>), AppError> {
    payload.validate()?;

    let transaction = state
        .withdrawals
        .withdraw(user_id, payload.amount, &payload.method, &payload.destination)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(TransactionResponse::from(transaction)),
    ))
}
