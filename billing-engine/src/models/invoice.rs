//! Invoice issued when a subscription payment is verified.

use super::service::BillingCycle;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: Uuid,
    pub company_id: Uuid,
    pub client_id: Uuid,
    pub subscription_id: Uuid,
    pub payment_id: Uuid,
    pub invoice_number: String,
    pub plan_name: String,
    pub billing_cycle: BillingCycle,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub amount_paid: Decimal,
    pub period_start: NaiveDate,
    pub period_end: Option<NaiveDate>,
    pub issued_utc: DateTime<Utc>,
}
