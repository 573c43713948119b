//! Service provider registry entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A care provider whose payable share is credited to a wallet.
///
/// `user_id` is the stable foreign key to the wallet owner. Historically the
/// wallet was resolved by the provider's registered email; `email` is kept so
/// migrated invoices that only carry an email can still settle.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Provider {
    pub provider_id: Uuid,
    pub display_name: String,
    pub email: String,
    pub user_id: Uuid,
    pub created_utc: DateTime<Utc>,
}

/// Input for registering a provider.
#[derive(Debug, Clone)]
pub struct CreateProvider {
    pub display_name: String,
    pub email: String,
    pub user_id: Uuid,
}
