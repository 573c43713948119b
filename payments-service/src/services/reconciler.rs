//! Callback reconciliation and invoice settlement.
//!
//! Drives the `pending -> success | failed` state machine for gateway
//! requests and the financial transitions that hang off a fresh success:
//! mark the invoice paid, compute the commission split, credit the
//! provider's wallet, append the completed transaction. A wallet is never
//! credited twice for one checkout request id, and money that cannot be
//! matched to an invoice is recorded for manual resolution rather than
//! dropped.

use crate::models::{
    FinalizeResult, Invoice, InvoiceOrigin, TransactionMemo, TransactionSource,
    UnresolvedCallback, TARGET_INVOICE,
};
use crate::services::commission::{self, CommissionPolicy};
use crate::services::gateway::StkCallback;
use crate::services::metrics::{PAYMENTS_FAILED_TOTAL, PAYMENTS_SETTLED_TOTAL};
use crate::services::store::{MarkPaidOutcome, Store};
use chrono::Utc;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

/// What processing a callback amounted to.
#[derive(Debug, Clone)]
pub enum CallbackResolution {
    /// Fresh success: invoice paid, provider credited.
    Settled {
        invoice_id: Uuid,
        invoice_number: String,
        receipt_number: Option<String>,
        provider_share: Option<Decimal>,
    },
    /// Fresh failure: request marked failed, nothing financial happened.
    Failed {
        checkout_request_id: String,
        result_code: i64,
        result_description: String,
    },
    /// The request was already terminal; acknowledged without re-processing.
    AlreadyProcessed,
    /// Money arrived but the invoice could not be resolved; recorded for
    /// manual resolution.
    Unresolved { reason: String },
}

/// Result of settling one invoice.
#[derive(Debug, Clone)]
pub struct SettlementOutcome {
    pub invoice: Invoice,
    /// Amount credited, absent when the invoice has no payee or was
    /// already paid.
    pub provider_share: Option<Decimal>,
    pub credited_user: Option<Uuid>,
    pub already_paid: bool,
}

#[derive(Clone)]
pub struct CallbackReconciler {
    store: Arc<dyn Store>,
}

impl CallbackReconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Process one gateway callback.
    ///
    /// Unknown checkout ids return `CallbackUnresolvable`, which the webhook
    /// handler surfaces as an error the gateway will retry against. Every
    /// other path acknowledges the callback.
    pub async fn process(
        &self,
        callback: &StkCallback,
        payload: &serde_json::Value,
    ) -> Result<CallbackResolution, AppError> {
        let outcome = callback.outcome();

        let request = match self
            .store
            .finalize_gateway_request(&callback.checkout_request_id, &outcome)
            .await?
        {
            FinalizeResult::NotFound => {
                return Err(AppError::CallbackUnresolvable(anyhow::anyhow!(
                    "No pending request for checkout id {}",
                    callback.checkout_request_id
                )));
            }
            FinalizeResult::AlreadyFinal(request) => {
                tracing::info!(
                    checkout_request_id = %request.checkout_request_id,
                    status = ?request.status,
                    "Duplicate callback for finalized request, acknowledging without re-processing"
                );
                return Ok(CallbackResolution::AlreadyProcessed);
            }
            FinalizeResult::Applied(request) => request,
        };

        if !callback.is_success() {
            tracing::warn!(
                checkout_request_id = %request.checkout_request_id,
                result_code = callback.result_code,
                result_desc = %callback.result_desc,
                "Push payment failed"
            );
            PAYMENTS_FAILED_TOTAL
                .with_label_values(&["gateway_declined"])
                .inc();
            return Ok(CallbackResolution::Failed {
                checkout_request_id: request.checkout_request_id,
                result_code: callback.result_code,
                result_description: callback.result_desc.clone(),
            });
        }

        if request.target_kind != TARGET_INVOICE {
            return self
                .record_unresolved(
                    callback,
                    payload,
                    format!("Unsupported payment target '{}'", request.target_kind),
                )
                .await;
        }

        let invoice = match self.store.get_invoice(request.target_id).await? {
            Some(invoice) => invoice,
            None => {
                return self
                    .record_unresolved(
                        callback,
                        payload,
                        format!(
                            "Invoice {} referenced by {} no longer exists",
                            request.target_id, request.account_reference
                        ),
                    )
                    .await;
            }
        };

        if let Some(amount) = callback.amount() {
            if amount != invoice.total {
                tracing::warn!(
                    invoice_id = %invoice.invoice_id,
                    invoice_total = %invoice.total,
                    confirmed_amount = %amount,
                    "Callback amount differs from invoice total"
                );
            }
        }

        let settlement = match self
            .settle_invoice(
                &invoice,
                TransactionSource::MobileMoney,
                callback.receipt_number(),
            )
            .await
        {
            Ok(settlement) => settlement,
            Err(AppError::Conflict(e)) | Err(AppError::CallbackUnresolvable(e)) => {
                // Money arrived for an invoice that cannot take it. Keep the
                // evidence and surface for manual handling.
                return self.record_unresolved(callback, payload, e.to_string()).await;
            }
            Err(e) => return Err(e),
        };

        if settlement.already_paid {
            tracing::info!(
                invoice_id = %invoice.invoice_id,
                "Invoice already paid, callback acknowledged without crediting"
            );
            return Ok(CallbackResolution::AlreadyProcessed);
        }

        Ok(CallbackResolution::Settled {
            invoice_id: settlement.invoice.invoice_id,
            invoice_number: settlement.invoice.invoice_number.clone(),
            receipt_number: callback.receipt_number(),
            provider_share: settlement.provider_share,
        })
    }

    /// Settle an invoice: mark it paid, split the amount, credit the payee.
    ///
    /// Shared by the gateway callback path and manual (cash/offline)
    /// confirmation; both are idempotent through `mark_invoice_paid`.
    pub async fn settle_invoice(
        &self,
        invoice: &Invoice,
        source: TransactionSource,
        reference: Option<String>,
    ) -> Result<SettlementOutcome, AppError> {
        let policy = settlement_policy(invoice);
        let split = commission::split(policy);

        // Resolve the payee before touching invoice state so a dangling
        // provider link fails the settlement instead of stranding money.
        let payee = self.resolve_payee(invoice).await?;

        let marked = self
            .store
            .mark_invoice_paid(invoice.invoice_id, split.platform_share)
            .await?;

        let invoice = match marked {
            MarkPaidOutcome::AlreadyPaid(invoice) => {
                return Ok(SettlementOutcome {
                    invoice,
                    provider_share: None,
                    credited_user: None,
                    already_paid: true,
                });
            }
            MarkPaidOutcome::Marked(invoice) => invoice,
        };

        let credited_user = match payee {
            Some(user_id) => {
                let mut memo =
                    TransactionMemo::new(source).with_invoice(invoice.invoice_id);
                if let Some(reference) = &reference {
                    memo = memo.with_reference(reference.clone());
                }
                self.store
                    .credit(user_id, split.provider_share, memo)
                    .await?;
                Some(user_id)
            }
            None => {
                tracing::warn!(
                    invoice_id = %invoice.invoice_id,
                    "Invoice has no linked provider, payment recorded without wallet credit"
                );
                None
            }
        };

        PAYMENTS_SETTLED_TOTAL
            .with_label_values(&[source.as_str()])
            .inc();

        tracing::info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            commission = %split.platform_share,
            provider_share = %split.provider_share,
            source = source.as_str(),
            "Invoice settled"
        );

        Ok(SettlementOutcome {
            invoice,
            provider_share: credited_user.map(|_| split.provider_share),
            credited_user,
            already_paid: false,
        })
    }

    /// Wallet owner for an invoice's provider. The stable id wins; the
    /// email match only covers records migrated before providers carried
    /// one.
    async fn resolve_payee(&self, invoice: &Invoice) -> Result<Option<Uuid>, AppError> {
        if let Some(provider_id) = invoice.provider_id {
            let provider = self
                .store
                .get_provider(provider_id)
                .await?
                .ok_or_else(|| {
                    AppError::CallbackUnresolvable(anyhow::anyhow!(
                        "Provider {} linked to invoice {} does not exist",
                        provider_id,
                        invoice.invoice_number
                    ))
                })?;
            return Ok(Some(provider.user_id));
        }

        if let Some(email) = &invoice.provider_email {
            let provider = self
                .store
                .find_provider_by_email(email)
                .await?
                .ok_or_else(|| {
                    AppError::CallbackUnresolvable(anyhow::anyhow!(
                        "No provider registered for email on invoice {}",
                        invoice.invoice_number
                    ))
                })?;
            tracing::warn!(
                invoice_id = %invoice.invoice_id,
                provider_id = %provider.provider_id,
                "Resolved payee by email match, invoice predates stable provider ids"
            );
            return Ok(Some(provider.user_id));
        }

        Ok(None)
    }

    async fn record_unresolved(
        &self,
        callback: &StkCallback,
        payload: &serde_json::Value,
        reason: String,
    ) -> Result<CallbackResolution, AppError> {
        tracing::error!(
            checkout_request_id = %callback.checkout_request_id,
            receipt_number = ?callback.receipt_number(),
            amount = ?callback.amount(),
            reason = %reason,
            "Confirmed payment could not be resolved, queued for manual resolution"
        );
        PAYMENTS_FAILED_TOTAL
            .with_label_values(&["unresolved"])
            .inc();

        self.store
            .record_unresolved_callback(&UnresolvedCallback {
                id: Uuid::new_v4(),
                checkout_request_id: callback.checkout_request_id.clone(),
                receipt_number: callback.receipt_number(),
                amount: callback.amount(),
                reason: reason.clone(),
                payload: payload.clone(),
                created_utc: Utc::now(),
            })
            .await?;

        Ok(CallbackResolution::Unresolved { reason })
    }
}

/// Pick the commission policy for an invoice. Appointment invoices with a
/// known fee/transport breakdown use the consultation-fee split; everything
/// else falls back to the total-based split. The choice is made here, once,
/// so every confirmation path applies the same math.
pub fn settlement_policy(invoice: &Invoice) -> CommissionPolicy {
    match (invoice.parsed_origin(), invoice.consultation_fee) {
        (InvoiceOrigin::Appointment, Some(fee)) => CommissionPolicy::ConsultationFee {
            fee,
            transport: invoice.transport_fee.unwrap_or(Decimal::ZERO),
        },
        _ => CommissionPolicy::TotalAmount {
            total: invoice.total,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn invoice(origin: InvoiceOrigin, fee: Option<Decimal>, transport: Option<Decimal>) -> Invoice {
        Invoice {
            invoice_id: Uuid::new_v4(),
            invoice_number: "APT-20260101-AAAAAAAA".to_string(),
            origin: origin.as_str().to_string(),
            status: "pending".to_string(),
            customer_name: "Jane Doe".to_string(),
            customer_email: "jane@example.com".to_string(),
            total: Decimal::from(1150),
            due_date: None,
            provider_id: None,
            provider_email: None,
            appointment_id: None,
            consultation_fee: fee,
            transport_fee: transport,
            commission: None,
            line_items: vec![],
            created_utc: Utc::now(),
            paid_utc: None,
        }
    }

    #[test]
    fn appointment_with_breakdown_uses_fee_policy() {
        let invoice = invoice(
            InvoiceOrigin::Appointment,
            Some(Decimal::from(1000)),
            Some(Decimal::from(150)),
        );
        assert_eq!(
            settlement_policy(&invoice),
            CommissionPolicy::ConsultationFee {
                fee: Decimal::from(1000),
                transport: Decimal::from(150),
            }
        );
    }

    #[test]
    fn unknown_breakdown_falls_back_to_total() {
        let appointment = invoice(InvoiceOrigin::Appointment, None, None);
        assert_eq!(
            settlement_policy(&appointment),
            CommissionPolicy::TotalAmount {
                total: Decimal::from(1150),
            }
        );

        let pharmacy = invoice(
            InvoiceOrigin::PharmacyOrder,
            Some(Decimal::from(1000)),
            None,
        );
        assert_eq!(
            settlement_policy(&pharmacy),
            CommissionPolicy::TotalAmount {
                total: Decimal::from(1150),
            }
        );
    }
}
