//! Withdrawal processing.

use crate::models::{Transaction, TransactionMemo, TransactionSource};
use crate::services::metrics::WITHDRAWALS_TOTAL;
use crate::services::store::Store;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct WithdrawalProcessor {
    store: Arc<dyn Store>,
}

impl WithdrawalProcessor {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Debit a wallet and record the outbound transaction.
    ///
    /// The withdrawal settles instantly; there is no pending-payout state.
    /// The balance check and the debit happen under the wallet's exclusion
    /// scope, so two racing withdrawals can never both draw down the same
    /// funds.
    pub async fn withdraw(
        &self,
        user_id: Uuid,
        amount: Decimal,
        method: &str,
        destination: &str,
    ) -> Result<Transaction, AppError> {
        if method.trim().is_empty() || destination.trim().is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Withdrawal method and destination are required"
            )));
        }

        let memo = TransactionMemo::new(TransactionSource::Withdrawal)
            .with_note(format!("{} -> {}", method.trim(), destination.trim()));

        match self.store.debit(user_id, amount, memo).await {
            Ok(transaction) => {
                WITHDRAWALS_TOTAL.with_label_values(&["completed"]).inc();
                tracing::info!(
                    user_id = %user_id,
                    amount = %amount,
                    method = method,
                    "Withdrawal completed"
                );
                Ok(transaction)
            }
            Err(e @ AppError::InsufficientFunds(_)) => {
                WITHDRAWALS_TOTAL
                    .with_label_values(&["insufficient_funds"])
                    .inc();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}
