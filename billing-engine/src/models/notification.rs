//! Notification records emitted by billing. Delivery is someone else's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BillDueSoon,
    BillOverdue,
    PaymentOverdue,
    PlanRenewalReminder,
    PlanExpiring,
    PlanExpired,
    PaymentVerified,
    PaymentRejected,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::BillDueSoon => "bill_due_soon",
            NotificationKind::BillOverdue => "bill_overdue",
            NotificationKind::PaymentOverdue => "payment_overdue",
            NotificationKind::PlanRenewalReminder => "plan_renewal_reminder",
            NotificationKind::PlanExpiring => "plan_expiring",
            NotificationKind::PlanExpired => "plan_expired",
            NotificationKind::PaymentVerified => "payment_verified",
            NotificationKind::PaymentRejected => "payment_rejected",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub company_id: Uuid,
    pub recipient_user_id: Uuid,
    pub kind: NotificationKind,
    pub priority: Priority,
    pub title: String,
    pub message: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    /// Deterministic key; a second emission with the same key is dropped.
    pub dedup_key: String,
    pub is_read: bool,
    pub created_utc: DateTime<Utc>,
}

/// A notification about to be emitted.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub company_id: Uuid,
    pub recipient_user_id: Uuid,
    pub kind: NotificationKind,
    pub priority: Priority,
    pub title: String,
    pub message: String,
    pub entity_type: &'static str,
    pub entity_id: Uuid,
    pub dedup_key: String,
}
