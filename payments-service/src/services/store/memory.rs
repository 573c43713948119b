//! In-memory store backend.
//!
//! Used by the test suite and viable for single-writer deployments. Wallet
//! mutation takes a per-wallet `tokio::sync::Mutex`; gateway-request
//! finalization uses the map's keyed exclusive access for its
//! compare-and-swap.

use super::{MarkPaidOutcome, Store};
use crate::models::{
    generate_invoice_number, invoice_total, CallbackOutcome, CreateInvoice, CreateProvider,
    FinalizeResult, Invoice, InvoiceScope, InvoiceStatus, PendingGatewayRequest, Provider,
    Transaction, TransactionMemo, TransactionSource, TransactionStatus, UnresolvedCallback,
    UpdateInvoice, Wallet,
};
use crate::models::Direction;
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    invoices: DashMap<Uuid, Invoice>,
    wallets: DashMap<Uuid, Arc<Mutex<Wallet>>>,
    transactions: Mutex<Vec<Transaction>>,
    requests: DashMap<String, PendingGatewayRequest>,
    providers: DashMap<Uuid, Provider>,
    unresolved: Mutex<Vec<UnresolvedCallback>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn wallet_handle(&self, user_id: Uuid) -> Arc<Mutex<Wallet>> {
        self.wallets
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(Wallet::new(user_id))))
            .clone()
    }

    async fn append_transaction(
        &self,
        user_id: Uuid,
        amount: Decimal,
        direction: Direction,
        memo: TransactionMemo,
    ) -> Transaction {
        let transaction = Transaction {
            transaction_id: Uuid::new_v4(),
            user_id,
            amount,
            direction,
            source: memo.source,
            status: TransactionStatus::Completed,
            reference: memo.reference,
            invoice_id: memo.invoice_id,
            memo: memo.note,
            created_utc: Utc::now(),
        };
        self.transactions.lock().await.push(transaction.clone());
        transaction
    }
}

fn require_positive(amount: Decimal) -> Result<(), AppError> {
    if amount <= Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Amount must be positive"
        )));
    }
    Ok(())
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn create_invoice(&self, input: &CreateInvoice) -> Result<Invoice, AppError> {
        if input.line_items.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invoice needs at least one line item"
            )));
        }

        let now = Utc::now();
        let invoice_id = Uuid::new_v4();
        let invoice = Invoice {
            invoice_id,
            invoice_number: generate_invoice_number(input.origin, now.date_naive(), invoice_id),
            origin: input.origin.as_str().to_string(),
            status: InvoiceStatus::Pending.as_str().to_string(),
            customer_name: input.customer_name.clone(),
            customer_email: input.customer_email.clone(),
            total: invoice_total(&input.line_items),
            due_date: input.due_date,
            provider_id: input.provider_id,
            provider_email: input.provider_email.clone(),
            appointment_id: input.appointment_id,
            consultation_fee: input.consultation_fee,
            transport_fee: input.transport_fee,
            commission: None,
            line_items: input.line_items.clone(),
            created_utc: now,
            paid_utc: None,
        };
        self.invoices.insert(invoice_id, invoice.clone());
        Ok(invoice)
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        Ok(self.invoices.get(&invoice_id).map(|i| i.value().clone()))
    }

    async fn list_invoices(&self, scope: &InvoiceScope) -> Result<Vec<Invoice>, AppError> {
        let mut invoices: Vec<Invoice> = self
            .invoices
            .iter()
            .filter(|entry| match scope {
                InvoiceScope::Admin => true,
                InvoiceScope::Patient { email } => entry.customer_email == *email,
                InvoiceScope::Provider { provider_id } => {
                    entry.provider_id == Some(*provider_id)
                }
            })
            .map(|entry| entry.value().clone())
            .collect();
        invoices.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(invoices)
    }

    async fn update_invoice(
        &self,
        invoice_id: Uuid,
        patch: &UpdateInvoice,
    ) -> Result<Invoice, AppError> {
        let mut entry = self
            .invoices
            .get_mut(&invoice_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        if let Some(next) = patch.status {
            if next == InvoiceStatus::Paid {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Invoices are marked paid by payment confirmation, not by edit"
                )));
            }
            let current = entry.parsed_status();
            if !current.can_transition_to(next) {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Invoice status cannot move from {} to {}",
                    current,
                    next
                )));
            }
            entry.status = next.as_str().to_string();
        }

        if let Some(items) = &patch.line_items {
            if items.is_empty() {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Invoice needs at least one line item"
                )));
            }
            if entry.parsed_status() == InvoiceStatus::Paid {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Paid invoices cannot be re-priced"
                )));
            }
            entry.line_items = items.clone();
            entry.total = invoice_total(items);
        }

        if let Some(due) = patch.due_date {
            entry.due_date = Some(due);
        }

        Ok(entry.clone())
    }

    async fn mark_invoice_paid(
        &self,
        invoice_id: Uuid,
        commission: Decimal,
    ) -> Result<MarkPaidOutcome, AppError> {
        let mut entry = self
            .invoices
            .get_mut(&invoice_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        match entry.parsed_status() {
            InvoiceStatus::Paid => Ok(MarkPaidOutcome::AlreadyPaid(entry.clone())),
            InvoiceStatus::Cancelled => Err(AppError::Conflict(anyhow::anyhow!(
                "Cancelled invoice cannot be paid"
            ))),
            InvoiceStatus::Pending | InvoiceStatus::Overdue => {
                entry.status = InvoiceStatus::Paid.as_str().to_string();
                entry.commission = Some(commission);
                entry.paid_utc = Some(Utc::now());
                Ok(MarkPaidOutcome::Marked(entry.clone()))
            }
        }
    }

    async fn mark_overdue(&self, as_of: NaiveDate) -> Result<u64, AppError> {
        let mut changed = 0;
        for mut entry in self.invoices.iter_mut() {
            if entry.parsed_status() == InvoiceStatus::Pending
                && entry.due_date.map(|d| d < as_of).unwrap_or(false)
            {
                entry.status = InvoiceStatus::Overdue.as_str().to_string();
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn paid_invoices_for_provider(
        &self,
        provider_id: Uuid,
    ) -> Result<Vec<Invoice>, AppError> {
        Ok(self
            .invoices
            .iter()
            .filter(|entry| {
                entry.provider_id == Some(provider_id)
                    && entry.parsed_status() == InvoiceStatus::Paid
            })
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn balance(&self, user_id: Uuid) -> Result<Decimal, AppError> {
        let wallet = self.wallet_handle(user_id);
        let guard = wallet.lock().await;
        Ok(guard.balance)
    }

    async fn credit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        memo: TransactionMemo,
    ) -> Result<Transaction, AppError> {
        require_positive(amount)?;
        let wallet = self.wallet_handle(user_id);
        let mut guard = wallet.lock().await;
        guard.balance += amount;
        guard.updated_utc = Utc::now();
        Ok(self
            .append_transaction(user_id, amount, Direction::Credit, memo)
            .await)
    }

    async fn debit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        memo: TransactionMemo,
    ) -> Result<Transaction, AppError> {
        require_positive(amount)?;
        let wallet = self.wallet_handle(user_id);
        let mut guard = wallet.lock().await;
        if guard.balance < amount {
            return Err(AppError::InsufficientFunds(anyhow::anyhow!(
                "Balance {} cannot cover {}",
                guard.balance,
                amount
            )));
        }
        guard.balance -= amount;
        guard.updated_utc = Utc::now();
        Ok(self
            .append_transaction(user_id, amount, Direction::Debit, memo)
            .await)
    }

    async fn overwrite_balance(
        &self,
        user_id: Uuid,
        balance: Decimal,
    ) -> Result<Decimal, AppError> {
        let wallet = self.wallet_handle(user_id);
        let mut guard = wallet.lock().await;
        let previous = guard.balance;
        guard.balance = balance;
        guard.updated_utc = Utc::now();
        Ok(previous)
    }

    async fn list_transactions(&self, user_id: Uuid) -> Result<Vec<Transaction>, AppError> {
        let log = self.transactions.lock().await;
        let mut result: Vec<Transaction> = log
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(result)
    }

    async fn completed_withdrawals_total(&self, user_id: Uuid) -> Result<Decimal, AppError> {
        let log = self.transactions.lock().await;
        Ok(log
            .iter()
            .filter(|t| {
                t.user_id == user_id
                    && t.source == TransactionSource::Withdrawal
                    && t.direction == Direction::Debit
                    && t.status == TransactionStatus::Completed
            })
            .map(|t| t.amount)
            .sum())
    }

    async fn insert_gateway_request(
        &self,
        request: &PendingGatewayRequest,
    ) -> Result<(), AppError> {
        if self
            .requests
            .insert(request.checkout_request_id.clone(), request.clone())
            .is_some()
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Gateway request {} already recorded",
                request.checkout_request_id
            )));
        }
        Ok(())
    }

    async fn get_gateway_request(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<PendingGatewayRequest>, AppError> {
        Ok(self
            .requests
            .get(checkout_request_id)
            .map(|r| r.value().clone()))
    }

    async fn gateway_requests_for_target(
        &self,
        target_kind: &str,
        target_id: Uuid,
    ) -> Result<Vec<PendingGatewayRequest>, AppError> {
        let mut result: Vec<PendingGatewayRequest> = self
            .requests
            .iter()
            .filter(|r| r.target_kind == target_kind && r.target_id == target_id)
            .map(|r| r.value().clone())
            .collect();
        result.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(result)
    }

    async fn finalize_gateway_request(
        &self,
        checkout_request_id: &str,
        outcome: &CallbackOutcome,
    ) -> Result<FinalizeResult, AppError> {
        // get_mut holds the key exclusively for the whole check-then-write.
        let mut entry = match self.requests.get_mut(checkout_request_id) {
            Some(entry) => entry,
            None => return Ok(FinalizeResult::NotFound),
        };

        if entry.status.is_terminal() {
            return Ok(FinalizeResult::AlreadyFinal(entry.clone()));
        }

        entry.status = outcome.status;
        entry.result_code = Some(outcome.result_code);
        entry.result_description = Some(outcome.result_description.clone());
        entry.receipt_number = outcome.receipt_number.clone();
        entry.updated_utc = Utc::now();
        Ok(FinalizeResult::Applied(entry.clone()))
    }

    async fn create_provider(&self, input: &CreateProvider) -> Result<Provider, AppError> {
        let provider = Provider {
            provider_id: Uuid::new_v4(),
            display_name: input.display_name.clone(),
            email: input.email.clone(),
            user_id: input.user_id,
            created_utc: Utc::now(),
        };
        self.providers.insert(provider.provider_id, provider.clone());
        Ok(provider)
    }

    async fn get_provider(&self, provider_id: Uuid) -> Result<Option<Provider>, AppError> {
        Ok(self.providers.get(&provider_id).map(|p| p.value().clone()))
    }

    async fn find_provider_by_email(&self, email: &str) -> Result<Option<Provider>, AppError> {
        Ok(self
            .providers
            .iter()
            .find(|p| p.email == email)
            .map(|p| p.value().clone()))
    }

    async fn record_unresolved_callback(
        &self,
        unresolved: &UnresolvedCallback,
    ) -> Result<(), AppError> {
        self.unresolved.lock().await.push(unresolved.clone());
        Ok(())
    }

    async fn list_unresolved_callbacks(&self) -> Result<Vec<UnresolvedCallback>, AppError> {
        Ok(self.unresolved.lock().await.clone())
    }
}
