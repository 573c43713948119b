//! Per-user wallet.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Running balance for one user. Exactly one wallet per user, created
/// lazily on first access so any user can always be credited. All mutation
/// goes through the store's credit/debit; the balance stays derivable from
/// the transaction log.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    pub user_id: Uuid,
    pub balance: Decimal,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            balance: Decimal::ZERO,
            created_utc: now,
            updated_utc: now,
        }
    }
}
