use super::{non_negative, DiscountRequest};
use crate::models::{
    AddOn, BillStatus, BillingCycle, Discount, LineItem, PaymentMethod, SubscriptionStatus,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionRequest {
    /// Ignored for client callers, who always subscribe themselves.
    pub client_id: Option<Uuid>,
    #[validate(required)]
    pub plan_id: Option<Uuid>,
    #[validate(required)]
    pub billing_cycle: Option<BillingCycle>,
    #[serde(default)]
    pub add_ons: Vec<AddOn>,
    #[validate(custom(function = "non_negative"))]
    pub discount: Option<Decimal>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionListParams {
    pub client_id: Option<Uuid>,
    pub status: Option<SubscriptionStatus>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    #[validate(length(min = 1, max = 1000))]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LineItemRequest {
    #[validate(length(min = 1, max = 500))]
    pub description: String,
    pub quantity: Decimal,
    pub rate: Decimal,
}

impl From<LineItemRequest> for LineItem {
    fn from(req: LineItemRequest) -> Self {
        LineItem::new(req.description, req.quantity, req.rate)
    }
}

pub(crate) fn line_items(items: Vec<LineItemRequest>) -> Vec<LineItem> {
    items.into_iter().map(LineItem::from).collect()
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateBillRequest {
    #[validate(required)]
    pub client_id: Option<Uuid>,
    #[validate(required, length(min = 1))]
    pub items: Option<Vec<LineItemRequest>>,
    #[validate(required)]
    pub due_date: Option<NaiveDate>,
    pub tax_rate: Option<Decimal>,
    pub discount: Option<DiscountRequest>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBillRequest {
    #[validate(length(min = 1))]
    pub items: Option<Vec<LineItemRequest>>,
    pub due_date: Option<NaiveDate>,
    pub tax_rate: Option<Decimal>,
    pub notes: Option<String>,
}

/// Omitting `discountType` removes the discount.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyDiscountRequest {
    pub discount_type: Option<crate::models::DiscountType>,
    #[serde(default)]
    pub value: Decimal,
}

impl ApplyDiscountRequest {
    pub fn into_discount(self) -> Option<Discount> {
        self.discount_type.map(|discount_type| Discount {
            discount_type,
            value: self.value,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkPaidRequest {
    pub method: Option<PaymentMethod>,
    pub reference: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillListParams {
    pub client_id: Option<Uuid>,
    pub status: Option<BillStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientScopeParams {
    pub client_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpsertClientRequest {
    pub user_id: Uuid,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(email)]
    pub email: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub plan_id: Option<Uuid>,
    pub plan_end_date: Option<NaiveDate>,
}

fn default_active() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_plan_fails_validation() {
        let req: CreateSubscriptionRequest =
            serde_json::from_str(r#"{"billingCycle": "monthly"}"#).unwrap();
        let errors = req.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("plan_id"));
    }

    #[test]
    fn bills_need_at_least_one_item() {
        let req: CreateBillRequest = serde_json::from_str(&format!(
            r#"{{"clientId": "{}", "items": [], "dueDate": "2024-03-01"}}"#,
            Uuid::new_v4()
        ))
        .unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn discount_type_absent_means_removal() {
        let req: ApplyDiscountRequest = serde_json::from_str("{}").unwrap();
        assert!(req.into_discount().is_none());
    }
}
