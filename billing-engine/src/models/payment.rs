//! Payment model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Partial,
    Paid,
    Overdue,
    Verified,
    Rejected,
    Cancelled,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 7] = [
        PaymentStatus::Pending,
        PaymentStatus::Partial,
        PaymentStatus::Paid,
        PaymentStatus::Overdue,
        PaymentStatus::Verified,
        PaymentStatus::Rejected,
        PaymentStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Overdue => "overdue",
            PaymentStatus::Verified => "verified",
            PaymentStatus::Rejected => "rejected",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// Statuses set by an explicit decision; the recompute pass never
    /// overwrites them.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Verified | PaymentStatus::Rejected | PaymentStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    #[default]
    BankTransfer,
    Upi,
    Card,
    Cheque,
    Other,
}

/// Money received, optionally against a bill and/or a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub company_id: Uuid,
    pub client_id: Uuid,
    pub bill_id: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    pub amount: Decimal,
    pub paid_amount: Decimal,
    pub balance_amount: Decimal,
    pub status: PaymentStatus,
    pub due_date: Option<NaiveDate>,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub payment_date: Option<DateTime<Utc>>,
    pub submitted_utc: Option<DateTime<Utc>>,
    pub verified_by: Option<Uuid>,
    pub verified_utc: Option<DateTime<Utc>>,
    pub rejected_by: Option<Uuid>,
    pub rejected_utc: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_by: Uuid,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for recording a payment.
#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub company_id: Uuid,
    pub client_id: Uuid,
    pub bill_id: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    pub amount: Decimal,
    pub paid_amount: Decimal,
    pub due_date: Option<NaiveDate>,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub submitted: bool,
    pub created_by: Uuid,
}

/// Input for editing a payment.
#[derive(Debug, Clone, Default)]
pub struct UpdatePayment {
    pub paid_amount: Option<Decimal>,
    pub due_date: Option<NaiveDate>,
    pub method: Option<PaymentMethod>,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

/// Filter parameters for listing payments.
#[derive(Debug, Clone, Default)]
pub struct ListPaymentsFilter {
    pub client_id: Option<Uuid>,
    pub bill_id: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    pub status: Option<PaymentStatus>,
}

impl ListPaymentsFilter {
    pub fn matches(&self, payment: &Payment) -> bool {
        self.client_id.map_or(true, |c| payment.client_id == c)
            && self.bill_id.map_or(true, |b| payment.bill_id == Some(b))
            && self
                .subscription_id
                .map_or(true, |s| payment.subscription_id == Some(s))
            && self.status.map_or(true, |s| payment.status == s)
    }
}

/// Aggregates over a company's payments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStats {
    pub total_payments: u64,
    pub by_status: Vec<StatusBucket>,
    pub total_received: Decimal,
    pub total_outstanding: Decimal,
    pub pending_verification: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBucket {
    pub status: PaymentStatus,
    pub count: u64,
    pub amount: Decimal,
}
