//! Postgres store backend.

use super::{MarkPaidOutcome, Store};
use crate::models::{
    generate_invoice_number, invoice_total, CallbackOutcome, CreateInvoice, CreateProvider,
    Direction, FinalizeResult, Invoice, InvoiceScope, InvoiceStatus, PendingGatewayRequest,
    Provider, Transaction, TransactionMemo, TransactionStatus, UnresolvedCallback, UpdateInvoice,
};
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const INVOICE_COLUMNS: &str = "invoice_id, invoice_number, origin, status, customer_name, \
     customer_email, total, due_date, provider_id, provider_email, appointment_id, \
     consultation_fee, transport_fee, commission, line_items, created_utc, paid_utc";

const TRANSACTION_COLUMNS: &str = "transaction_id, user_id, amount, direction, source, status, \
     reference, invoice_id, memo, created_utc";

const REQUEST_COLUMNS: &str = "checkout_request_id, merchant_request_id, phone, amount, status, \
     result_code, result_description, receipt_number, account_reference, target_kind, \
     target_id, created_utc, updated_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "payments-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Lock a wallet row for the current transaction, creating it first if
    /// the user has never been touched (auto-provision on read).
    async fn lock_wallet(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user_id: Uuid,
    ) -> Result<Decimal, AppError> {
        sqlx::query("INSERT INTO wallets (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to provision wallet: {}", e))
            })?;

        let balance: Decimal =
            sqlx::query_scalar("SELECT balance FROM wallets WHERE user_id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_one(&mut **tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to lock wallet: {}", e))
                })?;

        Ok(balance)
    }

    async fn insert_transaction(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user_id: Uuid,
        amount: Decimal,
        direction: Direction,
        memo: &TransactionMemo,
    ) -> Result<Transaction, AppError> {
        sqlx::query_as::<_, Transaction>(&format!(
            r#"
            INSERT INTO wallet_transactions ({TRANSACTION_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
            RETURNING {TRANSACTION_COLUMNS}
            "#,
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(amount)
        .bind(direction)
        .bind(memo.source)
        .bind(TransactionStatus::Completed)
        .bind(&memo.reference)
        .bind(memo.invoice_id)
        .bind(&memo.note)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to insert transaction: {}", e))
        })
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
impl Store for PgStore {
    #[instrument(skip(self, input), fields(origin = %input.origin.as_str()))]
    async fn create_invoice(&self, input: &CreateInvoice) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        if input.line_items.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invoice needs at least one line item"
            )));
        }

        let invoice_id = Uuid::new_v4();
        let number = generate_invoice_number(input.origin, Utc::now().date_naive(), invoice_id);
        let total = invoice_total(&input.line_items);
        let line_items = serde_json::to_value(&input.line_items)
            .map_err(|e| AppError::InternalError(anyhow::Error::new(e)))?;

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            INSERT INTO invoices (invoice_id, invoice_number, origin, status, customer_name,
                customer_email, total, due_date, provider_id, provider_email, appointment_id,
                consultation_fee, transport_fee, line_items)
            VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {INVOICE_COLUMNS}
            "#,
        ))
        .bind(invoice_id)
        .bind(&number)
        .bind(input.origin.as_str())
        .bind(&input.customer_name)
        .bind(&input.customer_email)
        .bind(total)
        .bind(input.due_date)
        .bind(input.provider_id)
        .bind(&input.provider_email)
        .bind(input.appointment_id)
        .bind(input.consultation_fee)
        .bind(input.transport_fee)
        .bind(line_items)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!("Invoice number '{}' already exists", number))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create invoice: {}", e)),
        })?;

        timer.observe_duration();

        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            total = %invoice.total,
            "Invoice created"
        );

        Ok(invoice)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_id = $1",
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    #[instrument(skip(self, scope))]
    async fn list_invoices(&self, scope: &InvoiceScope) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let invoices = match scope {
            InvoiceScope::Admin => {
                sqlx::query_as::<_, Invoice>(&format!(
                    "SELECT {INVOICE_COLUMNS} FROM invoices ORDER BY created_utc DESC",
                ))
                .fetch_all(&self.pool)
                .await
            }
            InvoiceScope::Patient { email } => {
                sqlx::query_as::<_, Invoice>(&format!(
                    "SELECT {INVOICE_COLUMNS} FROM invoices WHERE customer_email = $1 \
                     ORDER BY created_utc DESC",
                ))
                .bind(email)
                .fetch_all(&self.pool)
                .await
            }
            InvoiceScope::Provider { provider_id } => {
                sqlx::query_as::<_, Invoice>(&format!(
                    "SELECT {INVOICE_COLUMNS} FROM invoices WHERE provider_id = $1 \
                     ORDER BY created_utc DESC",
                ))
                .bind(provider_id)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        timer.observe_duration();

        Ok(invoices)
    }

    #[instrument(skip(self, patch), fields(invoice_id = %invoice_id))]
    async fn update_invoice(
        &self,
        invoice_id: Uuid,
        patch: &UpdateInvoice,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let current = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE invoice_id = $1 FOR UPDATE",
        ))
        .bind(invoice_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock invoice: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        let mut status = current.parsed_status();
        if let Some(next) = patch.status {
            if next == InvoiceStatus::Paid {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Invoices are marked paid by payment confirmation, not by edit"
                )));
            }
            if !status.can_transition_to(next) {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Invoice status cannot move from {} to {}",
                    status,
                    next
                )));
            }
            status = next;
        }

        let (line_items, total) = match &patch.line_items {
            Some(items) => {
                if items.is_empty() {
                    return Err(AppError::BadRequest(anyhow::anyhow!(
                        "Invoice needs at least one line item"
                    )));
                }
                if current.parsed_status() == InvoiceStatus::Paid {
                    return Err(AppError::Conflict(anyhow::anyhow!(
                        "Paid invoices cannot be re-priced"
                    )));
                }
                (
                    serde_json::to_value(items)
                        .map_err(|e| AppError::InternalError(anyhow::Error::new(e)))?,
                    invoice_total(items),
                )
            }
            None => (
                serde_json::to_value(&current.line_items)
                    .map_err(|e| AppError::InternalError(anyhow::Error::new(e)))?,
                current.total,
            ),
        };

        let due_date = patch.due_date.or(current.due_date);

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET status = $2, line_items = $3, total = $4, due_date = $5
            WHERE invoice_id = $1
            RETURNING {INVOICE_COLUMNS}
            "#,
        ))
        .bind(invoice_id)
        .bind(status.as_str())
        .bind(line_items)
        .bind(total)
        .bind(due_date)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice: {}", e)))?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        Ok(invoice)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn mark_invoice_paid(
        &self,
        invoice_id: Uuid,
        commission: Decimal,
    ) -> Result<MarkPaidOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_invoice_paid"])
            .start_timer();

        // Conditional update doubles as the idempotency check: only one
        // caller ever sees a row transition out of a payable status.
        let marked = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET status = 'paid', commission = $2, paid_utc = now()
            WHERE invoice_id = $1 AND status IN ('pending', 'overdue')
            RETURNING {INVOICE_COLUMNS}
            "#,
        ))
        .bind(invoice_id)
        .bind(commission)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to mark invoice paid: {}", e))
        })?;

        timer.observe_duration();

        if let Some(invoice) = marked {
            info!(
                invoice_id = %invoice.invoice_id,
                invoice_number = %invoice.invoice_number,
                commission = %commission,
                "Invoice marked paid"
            );
            return Ok(MarkPaidOutcome::Marked(invoice));
        }

        match self.get_invoice(invoice_id).await? {
            Some(invoice) if invoice.parsed_status() == InvoiceStatus::Paid => {
                Ok(MarkPaidOutcome::AlreadyPaid(invoice))
            }
            Some(_) => Err(AppError::Conflict(anyhow::anyhow!(
                "Cancelled invoice cannot be paid"
            ))),
            None => Err(AppError::NotFound(anyhow::anyhow!("Invoice not found"))),
        }
    }

    #[instrument(skip(self))]
    async fn mark_overdue(&self, as_of: NaiveDate) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_overdue"])
            .start_timer();

        let result = sqlx::query(
            "UPDATE invoices SET status = 'overdue' \
             WHERE status = 'pending' AND due_date IS NOT NULL AND due_date < $1",
        )
        .bind(as_of)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to mark invoices overdue: {}", e))
        })?;

        timer.observe_duration();

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(provider_id = %provider_id))]
    async fn paid_invoices_for_provider(
        &self,
        provider_id: Uuid,
    ) -> Result<Vec<Invoice>, AppError> {
        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices \
             WHERE provider_id = $1 AND status = 'paid' ORDER BY paid_utc",
        ))
        .bind(provider_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list paid invoices: {}", e))
        })?;

        Ok(invoices)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn balance(&self, user_id: Uuid) -> Result<Decimal, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["balance"])
            .start_timer();

        sqlx::query("INSERT INTO wallets (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to provision wallet: {}", e))
            })?;

        let balance: Decimal =
            sqlx::query_scalar("SELECT balance FROM wallets WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to get balance: {}", e))
                })?;

        timer.observe_duration();

        Ok(balance)
    }

    #[instrument(skip(self, memo), fields(user_id = %user_id, amount = %amount))]
    async fn credit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        memo: TransactionMemo,
    ) -> Result<Transaction, AppError> {
        require_positive(amount)?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["credit"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        Self::lock_wallet(&mut tx, user_id).await?;

        sqlx::query(
            "UPDATE wallets SET balance = balance + $2, updated_utc = now() WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(amount)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to credit wallet: {}", e)))?;

        let transaction =
            Self::insert_transaction(&mut tx, user_id, amount, Direction::Credit, &memo).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        info!(
            user_id = %user_id,
            amount = %amount,
            source = ?memo.source,
            "Wallet credited"
        );

        Ok(transaction)
    }

    #[instrument(skip(self, memo), fields(user_id = %user_id, amount = %amount))]
    async fn debit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        memo: TransactionMemo,
    ) -> Result<Transaction, AppError> {
        require_positive(amount)?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["debit"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let balance = Self::lock_wallet(&mut tx, user_id).await?;
        if balance < amount {
            return Err(AppError::InsufficientFunds(anyhow::anyhow!(
                "Balance {} cannot cover {}",
                balance,
                amount
            )));
        }

        sqlx::query(
            "UPDATE wallets SET balance = balance - $2, updated_utc = now() WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(amount)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to debit wallet: {}", e)))?;

        let transaction =
            Self::insert_transaction(&mut tx, user_id, amount, Direction::Debit, &memo).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        info!(
            user_id = %user_id,
            amount = %amount,
            "Wallet debited"
        );

        Ok(transaction)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn overwrite_balance(
        &self,
        user_id: Uuid,
        balance: Decimal,
    ) -> Result<Decimal, AppError> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let previous = Self::lock_wallet(&mut tx, user_id).await?;

        sqlx::query(
            "UPDATE wallets SET balance = $2, updated_utc = now() WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(balance)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to overwrite balance: {}", e))
        })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        Ok(previous)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn list_transactions(&self, user_id: Uuid) -> Result<Vec<Transaction>, AppError> {
        let transactions = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM wallet_transactions \
             WHERE user_id = $1 ORDER BY created_utc DESC",
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list transactions: {}", e))
        })?;

        Ok(transactions)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn completed_withdrawals_total(&self, user_id: Uuid) -> Result<Decimal, AppError> {
        let total: Option<Decimal> = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM wallet_transactions \
             WHERE user_id = $1 AND source = 'withdrawal' \
               AND direction = 'debit' AND status = 'completed'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to sum withdrawals: {}", e))
        })?;

        Ok(total.unwrap_or(Decimal::ZERO))
    }

    #[instrument(skip(self, request), fields(checkout_request_id = %request.checkout_request_id))]
    async fn insert_gateway_request(
        &self,
        request: &PendingGatewayRequest,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO gateway_requests (checkout_request_id, merchant_request_id, phone,
                amount, status, account_reference, target_kind, target_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&request.checkout_request_id)
        .bind(&request.merchant_request_id)
        .bind(&request.phone)
        .bind(request.amount)
        .bind(request.status)
        .bind(&request.account_reference)
        .bind(&request.target_kind)
        .bind(request.target_id)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Gateway request {} already recorded",
                    request.checkout_request_id
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!(
                "Failed to insert gateway request: {}",
                e
            )),
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_gateway_request(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<PendingGatewayRequest>, AppError> {
        let request = sqlx::query_as::<_, PendingGatewayRequest>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM gateway_requests WHERE checkout_request_id = $1",
        ))
        .bind(checkout_request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get gateway request: {}", e))
        })?;

        Ok(request)
    }

    #[instrument(skip(self))]
    async fn gateway_requests_for_target(
        &self,
        target_kind: &str,
        target_id: Uuid,
    ) -> Result<Vec<PendingGatewayRequest>, AppError> {
        let requests = sqlx::query_as::<_, PendingGatewayRequest>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM gateway_requests \
             WHERE target_kind = $1 AND target_id = $2 ORDER BY created_utc DESC",
        ))
        .bind(target_kind)
        .bind(target_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list gateway requests: {}", e))
        })?;

        Ok(requests)
    }

    #[instrument(skip(self, outcome), fields(checkout_request_id = %checkout_request_id))]
    async fn finalize_gateway_request(
        &self,
        checkout_request_id: &str,
        outcome: &CallbackOutcome,
    ) -> Result<FinalizeResult, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["finalize_gateway_request"])
            .start_timer();

        // The status guard makes the check-then-act a single atomic write;
        // a duplicate callback matches zero rows.
        let applied = sqlx::query_as::<_, PendingGatewayRequest>(&format!(
            r#"
            UPDATE gateway_requests
            SET status = $2, result_code = $3, result_description = $4,
                receipt_number = $5, updated_utc = now()
            WHERE checkout_request_id = $1 AND status = 'pending'
            RETURNING {REQUEST_COLUMNS}
            "#,
        ))
        .bind(checkout_request_id)
        .bind(outcome.status)
        .bind(outcome.result_code)
        .bind(&outcome.result_description)
        .bind(&outcome.receipt_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to finalize request: {}", e))
        })?;

        timer.observe_duration();

        if let Some(request) = applied {
            return Ok(FinalizeResult::Applied(request));
        }

        match self.get_gateway_request(checkout_request_id).await? {
            Some(request) => Ok(FinalizeResult::AlreadyFinal(request)),
            None => Ok(FinalizeResult::NotFound),
        }
    }

    #[instrument(skip(self, input), fields(email = %input.email))]
    async fn create_provider(&self, input: &CreateProvider) -> Result<Provider, AppError> {
        let provider = sqlx::query_as::<_, Provider>(
            r#"
            INSERT INTO providers (provider_id, display_name, email, user_id)
            VALUES ($1, $2, $3, $4)
            RETURNING provider_id, display_name, email, user_id, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.display_name)
        .bind(&input.email)
        .bind(input.user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Provider with email '{}' already exists",
                    input.email
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create provider: {}", e)),
        })?;

        Ok(provider)
    }

    #[instrument(skip(self), fields(provider_id = %provider_id))]
    async fn get_provider(&self, provider_id: Uuid) -> Result<Option<Provider>, AppError> {
        let provider = sqlx::query_as::<_, Provider>(
            "SELECT provider_id, display_name, email, user_id, created_utc \
             FROM providers WHERE provider_id = $1",
        )
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get provider: {}", e)))?;

        Ok(provider)
    }

    #[instrument(skip(self))]
    async fn find_provider_by_email(&self, email: &str) -> Result<Option<Provider>, AppError> {
        let provider = sqlx::query_as::<_, Provider>(
            "SELECT provider_id, display_name, email, user_id, created_utc \
             FROM providers WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to find provider: {}", e))
        })?;

        Ok(provider)
    }

    #[instrument(skip(self, unresolved), fields(checkout_request_id = %unresolved.checkout_request_id))]
    async fn record_unresolved_callback(
        &self,
        unresolved: &UnresolvedCallback,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO unresolved_callbacks (id, checkout_request_id, receipt_number,
                amount, reason, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(unresolved.id)
        .bind(&unresolved.checkout_request_id)
        .bind(&unresolved.receipt_number)
        .bind(unresolved.amount)
        .bind(&unresolved.reason)
        .bind(&unresolved.payload)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Failed to record unresolved callback: {}",
                e
            ))
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_unresolved_callbacks(&self) -> Result<Vec<UnresolvedCallback>, AppError> {
        let unresolved = sqlx::query_as::<_, UnresolvedCallback>(
            "SELECT id, checkout_request_id, receipt_number, amount, reason, payload, \
             created_utc FROM unresolved_callbacks ORDER BY created_utc DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Failed to list unresolved callbacks: {}",
                e
            ))
        })?;

        Ok(unresolved)
    }
}
