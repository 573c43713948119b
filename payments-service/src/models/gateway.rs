//! Mobile-money gateway request tracking.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Target kind for an invoice payment. The link is free-form so other
/// billables can reuse the gateway plumbing.
pub const TARGET_INVOICE: &str = "invoice";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum GatewayRequestStatus {
    Pending,
    Success,
    Failed,
}

impl GatewayRequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, GatewayRequestStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayRequestStatus::Pending => "pending",
            GatewayRequestStatus::Success => "success",
            GatewayRequestStatus::Failed => "failed",
        }
    }
}

/// A push-payment request awaiting its asynchronous result.
///
/// Keyed by the gateway's own checkout request id; the callback finalizes it
/// exactly once (`pending -> success | failed`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PendingGatewayRequest {
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub phone: String,
    pub amount: Decimal,
    pub status: GatewayRequestStatus,
    pub result_code: Option<i64>,
    pub result_description: Option<String>,
    /// Gateway receipt number, set on success.
    pub receipt_number: Option<String>,
    /// Reference shown to the payer, the invoice number for invoice targets.
    pub account_reference: String,
    pub target_kind: String,
    pub target_id: Uuid,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Terminal result extracted from a gateway callback.
#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    pub status: GatewayRequestStatus,
    pub result_code: i64,
    pub result_description: String,
    pub receipt_number: Option<String>,
    pub amount: Option<Decimal>,
}

/// Result of the atomic finalize on a pending request.
#[derive(Debug, Clone)]
pub enum FinalizeResult {
    /// The request transitioned to a terminal state now.
    Applied(PendingGatewayRequest),
    /// The request was already terminal; nothing changed.
    AlreadyFinal(PendingGatewayRequest),
    /// No request with that checkout id exists.
    NotFound,
}

/// A callback that could not be matched to its invoice. Money is never
/// dropped silently; these are kept queryable for manual resolution.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UnresolvedCallback {
    pub id: Uuid,
    pub checkout_request_id: String,
    pub receipt_number: Option<String>,
    pub amount: Option<Decimal>,
    pub reason: String,
    pub payload: serde_json::Value,
    pub created_utc: DateTime<Utc>,
}
