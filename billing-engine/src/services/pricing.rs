//! Plan pricing: allowed cycles and final price derived from included services.

use crate::error::{BillingError, Result};
use crate::models::{BillingCycle, Discount, DiscountType, Plan, Service};
use crate::services::repository::ServiceRepository;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeSet;
use tracing::instrument;
use uuid::Uuid;

/// Rounds a money amount to cents, midpoint away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Percentage discounts live in [0, 100]; fixed discounts are non-negative.
pub fn validate_discount(discount: &Discount) -> Result<()> {
    if discount.value < Decimal::ZERO {
        return Err(BillingError::validation("discount value must not be negative"));
    }
    if discount.discount_type == DiscountType::Percentage && discount.value > Decimal::ONE_HUNDRED
    {
        return Err(BillingError::validation(
            "percentage discount must not exceed 100",
        ));
    }
    Ok(())
}

/// Intersection of every included service's cycle set. No services, no cycles.
pub fn compute_allowed_cycles(plan: &Plan) -> BTreeSet<BillingCycle> {
    let mut services = plan.services.iter();
    let Some(first) = services.next() else {
        return BTreeSet::new();
    };
    services.fold(first.allowed_cycles.clone(), |acc, item| {
        acc.intersection(&item.allowed_cycles).copied().collect()
    })
}

pub fn compute_auto_price(plan: &Plan) -> Decimal {
    round_money(plan.services.iter().map(|s| s.effective_price()).sum())
}

/// Override wins outright; otherwise the discount applies to the auto price.
pub fn compute_final_price(plan: &Plan) -> Decimal {
    if let Some(price) = plan.override_price {
        return round_money(price.max(Decimal::ZERO));
    }
    let auto = compute_auto_price(plan);
    let off = plan
        .discount
        .map(|d| d.amount_off(auto))
        .unwrap_or(Decimal::ZERO);
    round_money((auto - off).max(Decimal::ZERO))
}

/// Refreshes every derived pricing field on the plan.
pub fn reprice(plan: &mut Plan) {
    plan.allowed_cycles = compute_allowed_cycles(plan);
    plan.auto_price = compute_auto_price(plan);
    plan.final_price = compute_final_price(plan);
}

/// Loads the requested services, failing with every ID that is missing or
/// inactive within the company. Order follows `ids`.
#[instrument(skip(repo, ids), fields(company_id = %company_id, requested = ids.len()))]
pub async fn resolve_active_services(
    repo: &dyn ServiceRepository,
    company_id: Uuid,
    ids: &[Uuid],
) -> Result<Vec<Service>> {
    let found = repo.get_services(company_id, ids).await?;

    let mut resolved = Vec::with_capacity(ids.len());
    let mut unresolved = Vec::new();
    for id in ids {
        match found.iter().find(|s| s.id == *id && s.is_active) {
            Some(service) => resolved.push(service.clone()),
            None => unresolved.push(id.to_string()),
        }
    }

    if !unresolved.is_empty() {
        return Err(BillingError::validation(format!(
            "services not found or inactive: {}",
            unresolved.join(", ")
        )));
    }
    Ok(resolved)
}
