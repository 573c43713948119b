//! Storage seam for the payment engine.
//!
//! Two backends implement the same trait: Postgres for deployments and an
//! in-memory store for tests and single-writer setups. Both uphold the two
//! concurrency guarantees the engine relies on: per-wallet serializability
//! of credit/debit, and an atomic check-then-act when a gateway request is
//! finalized.

pub mod memory;
pub mod postgres;

use crate::models::{
    CallbackOutcome, CreateInvoice, CreateProvider, FinalizeResult, Invoice, InvoiceScope,
    PendingGatewayRequest, Provider, Transaction, TransactionMemo, UnresolvedCallback,
    UpdateInvoice,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Outcome of `mark_invoice_paid`.
#[derive(Debug, Clone)]
pub enum MarkPaidOutcome {
    /// The invoice transitioned to paid now; downstream crediting may run.
    Marked(Invoice),
    /// The invoice was already paid; callers must not credit again.
    AlreadyPaid(Invoice),
}

#[async_trait::async_trait]
pub trait Store: Send + Sync {
    // ------------------------------------------------------------------
    // Invoices
    // ------------------------------------------------------------------

    async fn create_invoice(&self, input: &CreateInvoice) -> Result<Invoice, AppError>;

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError>;

    async fn list_invoices(&self, scope: &InvoiceScope) -> Result<Vec<Invoice>, AppError>;

    /// Apply a patch. Line-item replacement recomputes the total; status
    /// changes obey the forward-only transition rule and may not set `paid`
    /// (that is `mark_invoice_paid`'s job).
    async fn update_invoice(
        &self,
        invoice_id: Uuid,
        patch: &UpdateInvoice,
    ) -> Result<Invoice, AppError>;

    /// Sole path to `paid`. Idempotent: an already-paid invoice is reported
    /// as such, not an error, and the stored commission is left untouched.
    async fn mark_invoice_paid(
        &self,
        invoice_id: Uuid,
        commission: Decimal,
    ) -> Result<MarkPaidOutcome, AppError>;

    /// Move pending invoices past their due date to overdue. Returns how
    /// many changed.
    async fn mark_overdue(&self, as_of: NaiveDate) -> Result<u64, AppError>;

    /// Paid invoices for a provider, the auditor's replay input.
    async fn paid_invoices_for_provider(
        &self,
        provider_id: Uuid,
    ) -> Result<Vec<Invoice>, AppError>;

    // ------------------------------------------------------------------
    // Wallets and the transaction log
    // ------------------------------------------------------------------

    /// Current balance; provisions a zero-balance wallet on first read so
    /// any user can always be credited.
    async fn balance(&self, user_id: Uuid) -> Result<Decimal, AppError>;

    /// Add to a wallet and append the completed credit transaction, both
    /// under the wallet's exclusion scope.
    async fn credit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        memo: TransactionMemo,
    ) -> Result<Transaction, AppError>;

    /// Subtract from a wallet and append the completed debit transaction.
    /// Fails with `InsufficientFunds` when the balance cannot cover the
    /// amount; the balance is left unchanged.
    async fn debit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        memo: TransactionMemo,
    ) -> Result<Transaction, AppError>;

    /// Auditor-only: overwrite a wallet balance. Returns the previous
    /// balance. Appends nothing to the transaction log.
    async fn overwrite_balance(
        &self,
        user_id: Uuid,
        balance: Decimal,
    ) -> Result<Decimal, AppError>;

    /// Transaction history for a wallet, newest first.
    async fn list_transactions(&self, user_id: Uuid) -> Result<Vec<Transaction>, AppError>;

    /// Sum of completed withdrawal debits for a user.
    async fn completed_withdrawals_total(&self, user_id: Uuid) -> Result<Decimal, AppError>;

    // ------------------------------------------------------------------
    // Gateway requests
    // ------------------------------------------------------------------

    async fn insert_gateway_request(
        &self,
        request: &PendingGatewayRequest,
    ) -> Result<(), AppError>;

    async fn get_gateway_request(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<PendingGatewayRequest>, AppError>;

    async fn gateway_requests_for_target(
        &self,
        target_kind: &str,
        target_id: Uuid,
    ) -> Result<Vec<PendingGatewayRequest>, AppError>;

    /// Atomically finalize a pending request. The terminal-status check and
    /// the write are one operation; a concurrent duplicate callback observes
    /// `AlreadyFinal` and must not re-process.
    async fn finalize_gateway_request(
        &self,
        checkout_request_id: &str,
        outcome: &CallbackOutcome,
    ) -> Result<FinalizeResult, AppError>;

    // ------------------------------------------------------------------
    // Providers
    // ------------------------------------------------------------------

    async fn create_provider(&self, input: &CreateProvider) -> Result<Provider, AppError>;

    async fn get_provider(&self, provider_id: Uuid) -> Result<Option<Provider>, AppError>;

    /// Migration fallback for invoices that predate stable provider ids.
    async fn find_provider_by_email(&self, email: &str) -> Result<Option<Provider>, AppError>;

    // ------------------------------------------------------------------
    // Unresolved callbacks
    // ------------------------------------------------------------------

    async fn record_unresolved_callback(
        &self,
        unresolved: &UnresolvedCallback,
    ) -> Result<(), AppError>;

    async fn list_unresolved_callbacks(&self) -> Result<Vec<UnresolvedCallback>, AppError>;
}
