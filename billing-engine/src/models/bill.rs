//! Bill (billing document) model.

use super::plan::Discount;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bill status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillStatus {
    Draft,
    Sent,
    Partial,
    Paid,
    Overdue,
    Cancelled,
}

impl BillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillStatus::Draft => "draft",
            BillStatus::Sent => "sent",
            BillStatus::Partial => "partial",
            BillStatus::Paid => "paid",
            BillStatus::Overdue => "overdue",
            BillStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(BillStatus::Draft),
            "sent" => Some(BillStatus::Sent),
            "partial" => Some(BillStatus::Partial),
            "paid" => Some(BillStatus::Paid),
            "overdue" => Some(BillStatus::Overdue),
            "cancelled" => Some(BillStatus::Cancelled),
            _ => None,
        }
    }

    /// Paid and cancelled bills accept no further edits.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BillStatus::Paid | BillStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub description: String,
    pub quantity: Decimal,
    pub rate: Decimal,
    #[serde(default)]
    pub amount: Decimal,
}

impl LineItem {
    pub fn new(description: impl Into<String>, quantity: Decimal, rate: Decimal) -> Self {
        Self {
            description: description.into(),
            quantity,
            rate,
            amount: quantity * rate,
        }
    }
}

/// An invoice-like document whose amounts and status are always derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bill {
    pub id: Uuid,
    pub company_id: Uuid,
    pub client_id: Uuid,
    pub bill_number: String,
    pub items: Vec<LineItem>,
    pub discount: Option<Discount>,
    /// Percent units.
    pub tax_rate: Decimal,
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub balance_amount: Decimal,
    pub status: BillStatus,
    pub due_date: NaiveDate,
    pub notes: Option<String>,
    pub sent_utc: Option<DateTime<Utc>>,
    pub paid_utc: Option<DateTime<Utc>>,
    pub cancelled_utc: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for creating a bill.
#[derive(Debug, Clone)]
pub struct CreateBill {
    pub company_id: Uuid,
    pub client_id: Uuid,
    pub items: Vec<LineItem>,
    pub due_date: NaiveDate,
    pub tax_rate: Option<Decimal>,
    pub discount: Option<Discount>,
    pub notes: Option<String>,
    pub created_by: Uuid,
}

/// Input for editing a bill.
#[derive(Debug, Clone, Default)]
pub struct UpdateBill {
    pub items: Option<Vec<LineItem>>,
    pub due_date: Option<NaiveDate>,
    pub tax_rate: Option<Decimal>,
    pub notes: Option<String>,
}

/// Filter parameters for listing bills.
#[derive(Debug, Clone, Default)]
pub struct ListBillsFilter {
    pub client_id: Option<Uuid>,
    pub status: Option<BillStatus>,
}
