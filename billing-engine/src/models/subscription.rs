//! Subscription model.

use super::service::BillingCycle;
use crate::error::{BillingError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }
}

/// Plan terms frozen at subscription time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSnapshot {
    pub plan_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub billing_cycle: BillingCycle,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOn {
    pub name: String,
    pub price: Decimal,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// A client's subscription to a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub company_id: Uuid,
    pub client_id: Uuid,
    pub plan_id: Uuid,
    pub plan_snapshot: PlanSnapshot,
    pub add_ons: Vec<AddOn>,
    pub billing_cycle: BillingCycle,
    pub plan_amount: Decimal,
    pub add_ons_amount: Decimal,
    pub discount: Decimal,
    pub subtotal: Decimal,
    pub tax_percentage: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub status: SubscriptionStatus,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub next_billing_date: Option<NaiveDate>,
    pub created_by: Uuid,
    pub created_utc: DateTime<Utc>,
    pub activated_by: Option<Uuid>,
    pub activated_utc: Option<DateTime<Utc>>,
    pub cancelled_by: Option<Uuid>,
    pub cancelled_utc: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub updated_utc: DateTime<Utc>,
}

impl Subscription {
    /// `pending -> active`.
    pub fn activate(&mut self, actor: Uuid, at: DateTime<Utc>) -> Result<()> {
        match self.status {
            SubscriptionStatus::Pending => {
                self.status = SubscriptionStatus::Active;
                self.activated_by = Some(actor);
                self.activated_utc = Some(at);
                self.updated_utc = at;
                Ok(())
            }
            SubscriptionStatus::Active => Err(BillingError::conflict(format!(
                "subscription {} is already active; activation requires status pending",
                self.id
            ))),
            SubscriptionStatus::Cancelled => Err(BillingError::conflict(format!(
                "subscription {} is cancelled; activation requires status pending",
                self.id
            ))),
        }
    }

    /// `pending|active -> cancelled`. Terminal.
    pub fn cancel(&mut self, actor: Uuid, reason: &str, at: DateTime<Utc>) -> Result<()> {
        if self.status == SubscriptionStatus::Cancelled {
            return Err(BillingError::conflict(format!(
                "subscription {} is already cancelled; cancellation requires status pending or active",
                self.id
            )));
        }
        self.status = SubscriptionStatus::Cancelled;
        self.cancelled_by = Some(actor);
        self.cancelled_utc = Some(at);
        self.cancellation_reason = Some(reason.to_string());
        self.updated_utc = at;
        Ok(())
    }
}

/// Input for creating a subscription.
#[derive(Debug, Clone)]
pub struct CreateSubscription {
    pub company_id: Uuid,
    pub client_id: Uuid,
    pub plan_id: Uuid,
    pub add_ons: Vec<AddOn>,
    pub billing_cycle: BillingCycle,
    pub discount: Decimal,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub created_by: Uuid,
}

/// Filter parameters for listing subscriptions.
#[derive(Debug, Clone, Default)]
pub struct ListSubscriptionsFilter {
    pub client_id: Option<Uuid>,
    pub status: Option<SubscriptionStatus>,
}
