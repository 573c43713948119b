use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{
    Direction, Invoice, InvoiceOrigin, InvoiceStatus, LineItem, PendingGatewayRequest, Provider,
    Transaction, TransactionSource, TransactionStatus, UnresolvedCallback,
};

// ---------------------------------------------------------------------------
// Invoices
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct LineItemRequest {
    #[validate(length(min = 1))]
    pub description: String,
    #[validate(range(min = 1))]
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl From<&LineItemRequest> for LineItem {
    fn from(item: &LineItemRequest) -> Self {
        LineItem {
            description: item.description.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInvoiceRequest {
    pub origin: InvoiceOrigin,
    #[validate(length(min = 1))]
    pub customer_name: String,
    #[validate(email)]
    pub customer_email: String,
    pub due_date: Option<NaiveDate>,
    pub provider_id: Option<Uuid>,
    #[validate(email)]
    pub provider_email: Option<String>,
    pub appointment_id: Option<Uuid>,
    pub consultation_fee: Option<Decimal>,
    pub transport_fee: Option<Decimal>,
    #[validate(length(min = 1), nested)]
    pub line_items: Vec<LineItemRequest>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateInvoiceRequest {
    pub status: Option<InvoiceStatus>,
    pub due_date: Option<NaiveDate>,
    #[validate(nested)]
    pub line_items: Option<Vec<LineItemRequest>>,
}

#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub origin: String,
    pub status: String,
    pub customer_name: String,
    pub customer_email: String,
    pub total: Decimal,
    pub due_date: Option<NaiveDate>,
    pub provider_id: Option<Uuid>,
    pub appointment_id: Option<Uuid>,
    pub consultation_fee: Option<Decimal>,
    pub transport_fee: Option<Decimal>,
    pub commission: Option<Decimal>,
    pub line_items: Vec<LineItem>,
    pub created_utc: DateTime<Utc>,
    pub paid_utc: Option<DateTime<Utc>>,
}

impl From<Invoice> for InvoiceResponse {
    fn from(invoice: Invoice) -> Self {
        Self {
            invoice_id: invoice.invoice_id,
            invoice_number: invoice.invoice_number,
            origin: invoice.origin,
            status: invoice.status,
            customer_name: invoice.customer_name,
            customer_email: invoice.customer_email,
            total: invoice.total,
            due_date: invoice.due_date,
            provider_id: invoice.provider_id,
            appointment_id: invoice.appointment_id,
            consultation_fee: invoice.consultation_fee,
            transport_fee: invoice.transport_fee,
            commission: invoice.commission,
            line_items: invoice.line_items,
            created_utc: invoice.created_utc,
            paid_utc: invoice.paid_utc,
        }
    }
}

/// Manual (cash/offline) settlement of an invoice.
#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmManualPaymentRequest {
    /// "cash" or "card".
    #[validate(length(min = 1))]
    pub method: String,
    /// External reference for the settlement (receipt book number etc).
    pub reference: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConfirmManualPaymentResponse {
    pub invoice: InvoiceResponse,
    pub already_paid: bool,
    pub provider_share: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct SweepOverdueResponse {
    pub updated: u64,
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct InitiatePaymentRequest {
    pub invoice_id: Uuid,
    #[validate(length(min = 1))]
    pub phone: String,
}

#[derive(Debug, Serialize)]
pub struct InitiatePaymentResponse {
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub amount: Decimal,
    pub customer_message: String,
}

/// Acknowledgement envelope the gateway expects from the webhook.
#[derive(Debug, Serialize)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

impl CallbackAck {
    pub fn accepted() -> Self {
        Self {
            result_code: 0,
            result_desc: "Accepted".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GatewayRequestResponse {
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub phone: String,
    pub amount: Decimal,
    pub status: String,
    pub result_code: Option<i64>,
    pub result_description: Option<String>,
    pub receipt_number: Option<String>,
    pub account_reference: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl From<PendingGatewayRequest> for GatewayRequestResponse {
    fn from(request: PendingGatewayRequest) -> Self {
        Self {
            checkout_request_id: request.checkout_request_id,
            merchant_request_id: request.merchant_request_id,
            phone: request.phone,
            amount: request.amount,
            status: request.status.as_str().to_string(),
            result_code: request.result_code,
            result_description: request.result_description,
            receipt_number: request.receipt_number,
            account_reference: request.account_reference,
            created_utc: request.created_utc,
            updated_utc: request.updated_utc,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UnresolvedCallbackResponse {
    pub id: Uuid,
    pub checkout_request_id: String,
    pub receipt_number: Option<String>,
    pub amount: Option<Decimal>,
    pub reason: String,
    pub created_utc: DateTime<Utc>,
}

impl From<UnresolvedCallback> for UnresolvedCallbackResponse {
    fn from(unresolved: UnresolvedCallback) -> Self {
        Self {
            id: unresolved.id,
            checkout_request_id: unresolved.checkout_request_id,
            receipt_number: unresolved.receipt_number,
            amount: unresolved.amount,
            reason: unresolved.reason,
            created_utc: unresolved.created_utc,
        }
    }
}

// ---------------------------------------------------------------------------
// Wallets
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: Uuid,
    pub balance: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct WithdrawRequest {
    pub amount: Decimal,
    #[validate(length(min = 1))]
    pub method: String,
    #[validate(length(min = 1))]
    pub destination: String,
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub direction: Direction,
    pub source: TransactionSource,
    pub status: TransactionStatus,
    pub reference: Option<String>,
    pub invoice_id: Option<Uuid>,
    pub memo: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl From<Transaction> for TransactionResponse {
    fn from(t: Transaction) -> Self {
        Self {
            transaction_id: t.transaction_id,
            user_id: t.user_id,
            amount: t.amount,
            direction: t.direction,
            source: t.source,
            status: t.status,
            reference: t.reference,
            invoice_id: t.invoice_id,
            memo: t.memo,
            created_utc: t.created_utc,
        }
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProviderRequest {
    #[validate(length(min = 1))]
    pub display_name: String,
    #[validate(email)]
    pub email: String,
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ProviderResponse {
    pub provider_id: Uuid,
    pub display_name: String,
    pub email: String,
    pub user_id: Uuid,
    pub created_utc: DateTime<Utc>,
}

impl From<Provider> for ProviderResponse {
    fn from(provider: Provider) -> Self {
        Self {
            provider_id: provider.provider_id,
            display_name: provider.display_name,
            email: provider.email,
            user_id: provider.user_id,
            created_utc: provider.created_utc,
        }
    }
}
