use super::{double_option, non_negative};
use crate::models::{BillingCycle, Discount, DiscountType};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateServiceRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub description: Option<String>,
    #[validate(custom(function = "non_negative"))]
    pub base_price: Decimal,
    #[validate(length(min = 1))]
    pub allowed_cycles: Vec<BillingCycle>,
    #[serde(default)]
    pub features: Vec<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateServiceRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    pub description: Option<String>,
    #[validate(custom(function = "non_negative"))]
    pub base_price: Option<Decimal>,
    #[validate(length(min = 1))]
    pub allowed_cycles: Option<Vec<BillingCycle>>,
    pub features: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetActiveRequest {
    pub is_active: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveOnlyParams {
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountRequest {
    pub discount_type: DiscountType,
    pub value: Decimal,
}

impl From<DiscountRequest> for Discount {
    fn from(req: DiscountRequest) -> Self {
        Discount {
            discount_type: req.discount_type,
            value: req.value,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomPriceRequest {
    pub service_id: Uuid,
    pub price: Decimal,
}

pub(crate) fn custom_price_pairs(prices: Option<Vec<CustomPriceRequest>>) -> Vec<(Uuid, Decimal)> {
    prices
        .unwrap_or_default()
        .into_iter()
        .map(|p| (p.service_id, p.price))
        .collect()
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlanRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub service_ids: Vec<Uuid>,
    pub custom_prices: Option<Vec<CustomPriceRequest>>,
    #[validate(custom(function = "non_negative"))]
    pub override_price: Option<Decimal>,
    pub discount: Option<DiscountRequest>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlanRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub override_price: Option<Option<Decimal>>,
    #[serde(default, deserialize_with = "double_option")]
    pub discount: Option<Option<DiscountRequest>>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddPlanServicesRequest {
    #[validate(length(min = 1))]
    pub service_ids: Vec<Uuid>,
    pub custom_prices: Option<Vec<CustomPriceRequest>>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateServicePriceRequest {
    /// `null` clears the custom price.
    #[validate(custom(function = "non_negative"))]
    pub custom_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct ComparisonParams {
    /// Comma-separated plan ids.
    pub ids: String,
}
