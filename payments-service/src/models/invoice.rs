//! Invoice model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// What billable event produced the invoice. Encoded in the invoice number
/// prefix so support staff can tell the origin at a glance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceOrigin {
    Appointment,
    Subscription,
    PharmacyOrder,
    Manual,
}

impl InvoiceOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceOrigin::Appointment => "appointment",
            InvoiceOrigin::Subscription => "subscription",
            InvoiceOrigin::PharmacyOrder => "pharmacy_order",
            InvoiceOrigin::Manual => "manual",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "appointment" => InvoiceOrigin::Appointment,
            "subscription" => InvoiceOrigin::Subscription,
            "pharmacy_order" => InvoiceOrigin::PharmacyOrder,
            _ => InvoiceOrigin::Manual,
        }
    }

    /// Invoice number prefix.
    pub fn prefix(&self) -> &'static str {
        match self {
            InvoiceOrigin::Appointment => "APT",
            InvoiceOrigin::Subscription => "SUB",
            InvoiceOrigin::PharmacyOrder => "PHA",
            InvoiceOrigin::Manual => "MAN",
        }
    }
}

/// Invoice status. Transitions are forward-only; `paid` is terminal for
/// money purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Cancelled,
    Overdue,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
            InvoiceStatus::Overdue => "overdue",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "paid" => InvoiceStatus::Paid,
            "cancelled" => InvoiceStatus::Cancelled,
            "overdue" => InvoiceStatus::Overdue,
            _ => InvoiceStatus::Pending,
        }
    }

    /// Forward-only transition rule.
    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        matches!(
            (self, next),
            (
                InvoiceStatus::Pending,
                InvoiceStatus::Paid | InvoiceStatus::Cancelled | InvoiceStatus::Overdue
            ) | (
                InvoiceStatus::Overdue,
                InvoiceStatus::Paid | InvoiceStatus::Cancelled
            )
        )
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A billable line on an invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl LineItem {
    pub fn line_total(&self) -> Decimal {
        Decimal::from(self.quantity) * self.unit_price
    }
}

/// Sum of line totals, rounded to currency precision.
pub fn invoice_total(items: &[LineItem]) -> Decimal {
    items
        .iter()
        .map(LineItem::line_total)
        .sum::<Decimal>()
        .round_dp(2)
}

/// Invoice document.
///
/// `commission` stays unset until the invoice is paid; `provider_email` is
/// only consulted when `provider_id` is absent (migration fallback for
/// records created before providers carried a stable id).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub origin: String,
    pub status: String,
    pub customer_name: String,
    pub customer_email: String,
    pub total: Decimal,
    pub due_date: Option<NaiveDate>,
    pub provider_id: Option<Uuid>,
    pub provider_email: Option<String>,
    pub appointment_id: Option<Uuid>,
    pub consultation_fee: Option<Decimal>,
    pub transport_fee: Option<Decimal>,
    pub commission: Option<Decimal>,
    #[sqlx(json)]
    pub line_items: Vec<LineItem>,
    pub created_utc: DateTime<Utc>,
    pub paid_utc: Option<DateTime<Utc>>,
}

impl Invoice {
    pub fn parsed_status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }

    pub fn parsed_origin(&self) -> InvoiceOrigin {
        InvoiceOrigin::from_string(&self.origin)
    }

    /// Provider share of a paid invoice, from the stored commission.
    pub fn provider_share(&self) -> Option<Decimal> {
        self.commission.map(|c| self.total - c)
    }
}

/// Build a globally unique, human-readable invoice number:
/// origin prefix, issue date, uuid-derived suffix.
pub fn generate_invoice_number(origin: InvoiceOrigin, issued: NaiveDate, id: Uuid) -> String {
    let suffix = id.simple().to_string()[..8].to_uppercase();
    format!("{}-{}-{}", origin.prefix(), issued.format("%Y%m%d"), suffix)
}

/// Input for creating an invoice.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub origin: InvoiceOrigin,
    pub customer_name: String,
    pub customer_email: String,
    pub due_date: Option<NaiveDate>,
    pub provider_id: Option<Uuid>,
    pub provider_email: Option<String>,
    pub appointment_id: Option<Uuid>,
    pub consultation_fee: Option<Decimal>,
    pub transport_fee: Option<Decimal>,
    pub line_items: Vec<LineItem>,
}

/// Patch for updating an invoice. Replacing line items recomputes the total.
#[derive(Debug, Clone, Default)]
pub struct UpdateInvoice {
    pub line_items: Option<Vec<LineItem>>,
    pub status: Option<InvoiceStatus>,
    pub due_date: Option<NaiveDate>,
}

/// Role-sensitive listing scope.
#[derive(Debug, Clone)]
pub enum InvoiceScope {
    /// All invoices.
    Admin,
    /// Invoices addressed to this patient's email.
    Patient { email: String },
    /// Invoices linked to this provider.
    Provider { provider_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoice_number_encodes_origin_and_date() {
        let id = Uuid::new_v4();
        let date = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        let number = generate_invoice_number(InvoiceOrigin::Appointment, date, id);
        assert!(number.starts_with("APT-20260314-"));
        assert_eq!(number.len(), "APT-20260314-".len() + 8);
    }

    #[test]
    fn total_is_sum_of_line_totals() {
        let items = vec![
            LineItem {
                description: "Consultation".into(),
                quantity: 1,
                unit_price: Decimal::new(100000, 2),
            },
            LineItem {
                description: "Transport".into(),
                quantity: 3,
                unit_price: Decimal::new(5000, 2),
            },
        ];
        assert_eq!(invoice_total(&items), Decimal::new(115000, 2));
    }

    #[test]
    fn paid_is_terminal() {
        assert!(InvoiceStatus::Pending.can_transition_to(InvoiceStatus::Paid));
        assert!(InvoiceStatus::Pending.can_transition_to(InvoiceStatus::Overdue));
        assert!(InvoiceStatus::Overdue.can_transition_to(InvoiceStatus::Paid));
        assert!(!InvoiceStatus::Paid.can_transition_to(InvoiceStatus::Pending));
        assert!(!InvoiceStatus::Paid.can_transition_to(InvoiceStatus::Cancelled));
        assert!(!InvoiceStatus::Cancelled.can_transition_to(InvoiceStatus::Paid));
    }
}
