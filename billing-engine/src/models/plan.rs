//! Plan model.

use super::service::{BillingCycle, Service};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// How a discount value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::Percentage => "percentage",
            DiscountType::Fixed => "fixed",
        }
    }
}

/// A discount: `value` is percent units for `Percentage`, money for `Fixed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discount {
    pub discount_type: DiscountType,
    pub value: Decimal,
}

impl Discount {
    pub fn percentage(value: Decimal) -> Self {
        Self {
            discount_type: DiscountType::Percentage,
            value,
        }
    }

    pub fn fixed(value: Decimal) -> Self {
        Self {
            discount_type: DiscountType::Fixed,
            value,
        }
    }

    /// Amount taken off `base`; never more than `base` and never negative.
    pub fn amount_off(&self, base: Decimal) -> Decimal {
        let raw = match self.discount_type {
            DiscountType::Percentage => base * self.value / Decimal::ONE_HUNDRED,
            DiscountType::Fixed => self.value,
        };
        raw.max(Decimal::ZERO).min(base.max(Decimal::ZERO))
    }
}

/// Copy of a service taken when it was included in a plan.
///
/// Owned by value; later edits to the originating service never reach it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncludedService {
    pub service_id: Uuid,
    pub name: String,
    pub base_price: Decimal,
    pub custom_price: Option<Decimal>,
    pub allowed_cycles: BTreeSet<BillingCycle>,
    #[serde(default)]
    pub features: Vec<String>,
}

impl IncludedService {
    pub fn snapshot(service: &Service, custom_price: Option<Decimal>) -> Self {
        Self {
            service_id: service.id,
            name: service.name.clone(),
            base_price: service.base_price,
            custom_price,
            allowed_cycles: service.allowed_cycles.clone(),
            features: service.features.clone(),
        }
    }

    pub fn effective_price(&self) -> Decimal {
        self.custom_price.unwrap_or(self.base_price)
    }
}

/// A sellable bundle of services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub services: Vec<IncludedService>,
    pub override_price: Option<Decimal>,
    pub discount: Option<Discount>,
    pub auto_price: Decimal,
    pub final_price: Decimal,
    pub allowed_cycles: BTreeSet<BillingCycle>,
    pub is_active: bool,
    pub created_by: Uuid,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Plan {
    pub fn includes(&self, service_id: Uuid) -> bool {
        self.services.iter().any(|s| s.service_id == service_id)
    }

    /// Union of the features of every included service, in inclusion order.
    pub fn features(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.services
            .iter()
            .flat_map(|s| s.features.iter())
            .filter(|f| seen.insert(f.as_str()))
            .cloned()
            .collect()
    }
}

/// Input for creating a plan.
#[derive(Debug, Clone)]
pub struct CreatePlan {
    pub company_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub service_ids: Vec<Uuid>,
    pub custom_prices: Vec<(Uuid, Decimal)>,
    pub override_price: Option<Decimal>,
    pub discount: Option<Discount>,
    pub created_by: Uuid,
}

/// Input for updating a plan. `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default)]
pub struct UpdatePlan {
    pub name: Option<String>,
    pub description: Option<String>,
    pub override_price: Option<Option<Decimal>>,
    pub discount: Option<Option<Discount>>,
}

/// Side-by-side view of several plans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanComparison {
    pub plans: Vec<ComparedPlan>,
    /// One row per service name across all compared plans.
    pub features: Vec<FeatureRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparedPlan {
    pub id: Uuid,
    pub name: String,
    pub auto_price: Decimal,
    pub final_price: Decimal,
    pub allowed_cycles: BTreeSet<BillingCycle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRow {
    pub name: String,
    /// Parallel to `PlanComparison::plans`.
    pub included: Vec<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_discount_is_proportional() {
        let d = Discount::percentage(Decimal::from(10));
        assert_eq!(d.amount_off(Decimal::from(200)), Decimal::from(20));
    }

    #[test]
    fn fixed_discount_never_exceeds_base() {
        let d = Discount::fixed(Decimal::from(500));
        assert_eq!(d.amount_off(Decimal::from(120)), Decimal::from(120));
    }
}
