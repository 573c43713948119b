//! Balance reconciliation.
//!
//! Recomputes a provider's wallet balance from first principles: the sum of
//! provider shares across paid invoices minus completed withdrawals. The
//! wallet balance is maintained by the credit/debit paths and should already
//! match; this is the repair tool for when it does not.

use crate::services::commission::{self, CommissionPolicy};
use crate::services::store::Store;
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of one recomputation.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub provider_id: Uuid,
    pub user_id: Uuid,
    pub paid_invoices: usize,
    pub earned_total: Decimal,
    pub withdrawals_total: Decimal,
    pub previous_balance: Decimal,
    pub recomputed_balance: Decimal,
    pub drift: Decimal,
    pub corrected: bool,
}

#[derive(Clone)]
pub struct ReconciliationAuditor {
    store: Arc<dyn Store>,
}

impl ReconciliationAuditor {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Recompute a provider's balance and correct any drift.
    ///
    /// Withdrawals are matched by the provider's user identity, not by any
    /// account id. Invoices missing a stored commission (settled before
    /// commissions were persisted) are recomputed with the total-based
    /// policy. A wallet that already matches its log is left untouched.
    pub async fn recompute(&self, provider_id: Uuid) -> Result<AuditReport, AppError> {
        let provider = self
            .store
            .get_provider(provider_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Provider not found")))?;

        let invoices = self.store.paid_invoices_for_provider(provider_id).await?;
        let earned_total: Decimal = invoices
            .iter()
            .map(|invoice| {
                invoice.provider_share().unwrap_or_else(|| {
                    commission::split(CommissionPolicy::TotalAmount {
                        total: invoice.total,
                    })
                    .provider_share
                })
            })
            .sum();

        let withdrawals_total = self
            .store
            .completed_withdrawals_total(provider.user_id)
            .await?;
        let recomputed_balance = earned_total - withdrawals_total;
        let previous_balance = self.store.balance(provider.user_id).await?;
        let drift = recomputed_balance - previous_balance;

        let corrected = if drift != Decimal::ZERO {
            tracing::warn!(
                provider_id = %provider_id,
                user_id = %provider.user_id,
                previous_balance = %previous_balance,
                recomputed_balance = %recomputed_balance,
                drift = %drift,
                "Wallet balance drifted from transaction log, correcting"
            );
            self.store
                .overwrite_balance(provider.user_id, recomputed_balance)
                .await?;
            true
        } else {
            tracing::debug!(
                provider_id = %provider_id,
                balance = %previous_balance,
                "Wallet balance matches transaction log"
            );
            false
        };

        Ok(AuditReport {
            provider_id,
            user_id: provider.user_id,
            paid_invoices: invoices.len(),
            earned_total,
            withdrawals_total,
            previous_balance,
            recomputed_balance,
            drift,
            corrected,
        })
    }
}
