use super::{non_negative, positive};
use crate::models::{PaymentMethod, PaymentStatus};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    /// Required for operators; client callers pay as themselves.
    pub client_id: Option<Uuid>,
    pub bill_id: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    #[validate(custom(function = "positive"))]
    pub amount: Decimal,
    #[validate(custom(function = "non_negative"))]
    pub paid_amount: Option<Decimal>,
    pub due_date: Option<NaiveDate>,
    pub method: Option<PaymentMethod>,
    #[validate(length(max = 200))]
    pub reference: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitVerificationRequest {
    pub client_id: Option<Uuid>,
    pub bill_id: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    #[validate(custom(function = "positive"))]
    pub amount: Decimal,
    pub method: Option<PaymentMethod>,
    #[validate(length(max = 200))]
    pub reference: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePaymentRequest {
    #[validate(custom(function = "non_negative"))]
    pub paid_amount: Option<Decimal>,
    pub due_date: Option<NaiveDate>,
    pub method: Option<PaymentMethod>,
    #[validate(length(max = 200))]
    pub reference: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PartialPaymentRequest {
    #[validate(custom(function = "positive"))]
    pub amount_paid: Decimal,
    pub method: Option<PaymentMethod>,
    #[validate(length(max = 200))]
    pub reference: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RejectPaymentRequest {
    #[validate(length(min = 1, max = 1000))]
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentListParams {
    pub client_id: Option<Uuid>,
    pub bill_id: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    pub status: Option<PaymentStatus>,
}
