//! Append-only wallet transaction log.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Entry direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Credit => "credit",
            Direction::Debit => "debit",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the money moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionSource {
    MobileMoney,
    Card,
    Cash,
    Withdrawal,
}

impl TransactionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionSource::MobileMoney => "mobile_money",
            TransactionSource::Card => "card",
            TransactionSource::Cash => "cash",
            TransactionSource::Withdrawal => "withdrawal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

/// One ledger-affecting event. Never mutated after the status is final.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub direction: Direction,
    pub source: TransactionSource,
    pub status: TransactionStatus,
    /// Provider-side reference (e.g. mobile-money receipt number).
    pub reference: Option<String>,
    pub invoice_id: Option<Uuid>,
    pub memo: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl Transaction {
    /// Signed amount (positive for credit, negative for debit).
    pub fn signed_amount(&self) -> Decimal {
        match self.direction {
            Direction::Credit => self.amount,
            Direction::Debit => -self.amount,
        }
    }
}

/// Context recorded alongside a credit/debit.
#[derive(Debug, Clone)]
pub struct TransactionMemo {
    pub source: TransactionSource,
    pub reference: Option<String>,
    pub invoice_id: Option<Uuid>,
    pub note: Option<String>,
}

impl TransactionMemo {
    pub fn new(source: TransactionSource) -> Self {
        Self {
            source,
            reference: None,
            invoice_id: None,
            note: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_invoice(mut self, invoice_id: Uuid) -> Self {
        self.invoice_id = Some(invoice_id);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}
