//! Services and plans. Every plan mutation goes back through the pricing pass.

use crate::clock::Clock;
use crate::error::{BillingError, Result};
use crate::models::{
    ComparedPlan, CreatePlan, CreateService, FeatureRow, IncludedService, Plan, PlanComparison,
    Service, UpdatePlan, UpdateService,
};
use crate::services::metrics::record_catalog_operation;
use crate::services::pricing::{reprice, resolve_active_services, validate_discount};
use crate::services::repository::Repositories;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct CatalogService {
    repos: Repositories,
    clock: Arc<dyn Clock>,
}

impl CatalogService {
    pub fn new(repos: Repositories, clock: Arc<dyn Clock>) -> Self {
        Self { repos, clock }
    }

    #[instrument(skip(self, input), fields(company_id = %input.company_id))]
    pub async fn create_service(&self, input: CreateService) -> Result<Service> {
        let name = input.name.trim().to_string();
        validate_service_fields(&name, input.base_price, input.allowed_cycles.len())?;

        let now = self.clock.now();
        let service = Service {
            id: Uuid::new_v4(),
            company_id: input.company_id,
            name,
            description: input.description,
            base_price: input.base_price,
            allowed_cycles: input.allowed_cycles,
            features: input.features,
            is_active: true,
            created_by: input.created_by,
            created_utc: now,
            updated_utc: now,
        };
        self.repos.services.insert_service(&service).await?;

        record_catalog_operation(&service.company_id.to_string(), "create_service");
        info!(service_id = %service.id, "Service created");
        Ok(service)
    }

    pub async fn get_service(&self, company_id: Uuid, id: Uuid) -> Result<Service> {
        self.repos
            .services
            .get_service(company_id, id)
            .await?
            .ok_or_else(|| BillingError::not_found("service", id))
    }

    pub async fn list_services(&self, company_id: Uuid, active_only: bool) -> Result<Vec<Service>> {
        self.repos.services.list_services(company_id, active_only).await
    }

    /// Plans that already include the service keep their snapshot.
    #[instrument(skip(self, input), fields(service_id = %id))]
    pub async fn update_service(
        &self,
        company_id: Uuid,
        id: Uuid,
        input: UpdateService,
    ) -> Result<Service> {
        let mut service = self.get_service(company_id, id).await?;

        if let Some(name) = input.name {
            service.name = name.trim().to_string();
        }
        if let Some(description) = input.description {
            service.description = Some(description);
        }
        if let Some(price) = input.base_price {
            service.base_price = price;
        }
        if let Some(cycles) = input.allowed_cycles {
            service.allowed_cycles = cycles;
        }
        if let Some(features) = input.features {
            service.features = features;
        }
        validate_service_fields(
            &service.name,
            service.base_price,
            service.allowed_cycles.len(),
        )?;

        service.updated_utc = self.clock.now();
        self.repos.services.update_service(&service).await?;
        record_catalog_operation(&company_id.to_string(), "update_service");
        Ok(service)
    }

    pub async fn set_service_active(
        &self,
        company_id: Uuid,
        id: Uuid,
        is_active: bool,
    ) -> Result<Service> {
        let mut service = self.get_service(company_id, id).await?;
        service.is_active = is_active;
        service.updated_utc = self.clock.now();
        self.repos.services.update_service(&service).await?;

        record_catalog_operation(&company_id.to_string(), "toggle_service");
        info!(service_id = %id, is_active = is_active, "Service status changed");
        Ok(service)
    }

    #[instrument(skip(self, input), fields(company_id = %input.company_id))]
    pub async fn create_plan(&self, input: CreatePlan) -> Result<Plan> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(BillingError::validation("plan name is required"));
        }
        validate_plan_pricing(input.override_price, input.discount.as_ref())?;

        let mut ids = Vec::new();
        for id in &input.service_ids {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        let services = resolve_active_services(self.repos.services.as_ref(), input.company_id, &ids)
            .await?;
        let custom = custom_price_map(&input.custom_prices, &ids)?;

        let now = self.clock.now();
        let mut plan = Plan {
            id: Uuid::new_v4(),
            company_id: input.company_id,
            name,
            description: input.description,
            services: services
                .iter()
                .map(|s| IncludedService::snapshot(s, custom.get(&s.id).copied()))
                .collect(),
            override_price: input.override_price,
            discount: input.discount,
            auto_price: Decimal::ZERO,
            final_price: Decimal::ZERO,
            allowed_cycles: BTreeSet::new(),
            is_active: true,
            created_by: input.created_by,
            created_utc: now,
            updated_utc: now,
        };
        reprice(&mut plan);
        self.repos.plans.insert_plan(&plan).await?;

        record_catalog_operation(&plan.company_id.to_string(), "create_plan");
        info!(
            plan_id = %plan.id,
            final_price = %plan.final_price,
            services = plan.services.len(),
            "Plan created"
        );
        Ok(plan)
    }

    pub async fn get_plan(&self, company_id: Uuid, id: Uuid) -> Result<Plan> {
        self.repos
            .plans
            .get_plan(company_id, id)
            .await?
            .ok_or_else(|| BillingError::not_found("plan", id))
    }

    pub async fn list_plans(&self, company_id: Uuid, active_only: bool) -> Result<Vec<Plan>> {
        self.repos.plans.list_plans(company_id, active_only).await
    }

    #[instrument(skip(self, input), fields(plan_id = %id))]
    pub async fn update_plan(&self, company_id: Uuid, id: Uuid, input: UpdatePlan) -> Result<Plan> {
        let mut plan = self.get_plan(company_id, id).await?;

        if let Some(name) = input.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(BillingError::validation("plan name is required"));
            }
            plan.name = name;
        }
        if let Some(description) = input.description {
            plan.description = Some(description);
        }
        if let Some(override_price) = input.override_price {
            plan.override_price = override_price;
        }
        if let Some(discount) = input.discount {
            plan.discount = discount;
        }
        validate_plan_pricing(plan.override_price, plan.discount.as_ref())?;

        self.save_repriced(&mut plan, "update_plan").await?;
        Ok(plan)
    }

    pub async fn set_plan_active(&self, company_id: Uuid, id: Uuid, is_active: bool) -> Result<Plan> {
        let mut plan = self.get_plan(company_id, id).await?;
        plan.is_active = is_active;
        plan.updated_utc = self.clock.now();
        self.repos.plans.update_plan(&plan).await?;

        record_catalog_operation(&company_id.to_string(), "toggle_plan");
        info!(plan_id = %id, is_active = is_active, "Plan status changed");
        Ok(plan)
    }

    /// Snapshots each service into the plan. Already-included IDs are rejected.
    #[instrument(skip(self, service_ids, custom_prices), fields(plan_id = %plan_id))]
    pub async fn add_services(
        &self,
        company_id: Uuid,
        plan_id: Uuid,
        service_ids: &[Uuid],
        custom_prices: &[(Uuid, Decimal)],
    ) -> Result<Plan> {
        if service_ids.is_empty() {
            return Err(BillingError::validation("serviceIds must not be empty"));
        }
        let mut plan = self.get_plan(company_id, plan_id).await?;

        let duplicates: Vec<String> = service_ids
            .iter()
            .filter(|id| plan.includes(**id))
            .map(Uuid::to_string)
            .collect();
        if !duplicates.is_empty() {
            return Err(BillingError::validation(format!(
                "services already included in plan: {}",
                duplicates.join(", ")
            )));
        }

        let services =
            resolve_active_services(self.repos.services.as_ref(), company_id, service_ids).await?;
        let custom = custom_price_map(custom_prices, service_ids)?;
        for service in &services {
            if !plan.includes(service.id) {
                plan.services
                    .push(IncludedService::snapshot(service, custom.get(&service.id).copied()));
            }
        }

        self.save_repriced(&mut plan, "add_plan_services").await?;
        Ok(plan)
    }

    #[instrument(skip(self), fields(plan_id = %plan_id, service_id = %service_id))]
    pub async fn remove_service(&self, company_id: Uuid, plan_id: Uuid, service_id: Uuid) -> Result<Plan> {
        let mut plan = self.get_plan(company_id, plan_id).await?;
        if !plan.includes(service_id) {
            return Err(BillingError::not_found("plan service", service_id));
        }
        plan.services.retain(|s| s.service_id != service_id);

        self.save_repriced(&mut plan, "remove_plan_service").await?;
        Ok(plan)
    }

    /// Sets or clears (`None`) the per-plan price of one included service.
    #[instrument(skip(self), fields(plan_id = %plan_id, service_id = %service_id))]
    pub async fn update_service_price(
        &self,
        company_id: Uuid,
        plan_id: Uuid,
        service_id: Uuid,
        custom_price: Option<Decimal>,
    ) -> Result<Plan> {
        if custom_price.is_some_and(|p| p < Decimal::ZERO) {
            return Err(BillingError::validation("customPrice must not be negative"));
        }
        let mut plan = self.get_plan(company_id, plan_id).await?;
        let item = plan
            .services
            .iter_mut()
            .find(|s| s.service_id == service_id)
            .ok_or_else(|| BillingError::not_found("plan service", service_id))?;
        item.custom_price = custom_price;

        self.save_repriced(&mut plan, "update_plan_service_price").await?;
        Ok(plan)
    }

    pub async fn compare_plans(&self, company_id: Uuid, ids: &[Uuid]) -> Result<PlanComparison> {
        if ids.is_empty() {
            return Err(BillingError::validation("at least one plan id is required"));
        }
        let mut plans = Vec::with_capacity(ids.len());
        for id in ids {
            plans.push(self.get_plan(company_id, *id).await?);
        }
        Ok(build_comparison(&plans))
    }

    async fn save_repriced(&self, plan: &mut Plan, operation: &str) -> Result<()> {
        reprice(plan);
        plan.updated_utc = self.clock.now();
        self.repos.plans.update_plan(plan).await?;

        record_catalog_operation(&plan.company_id.to_string(), operation);
        info!(
            plan_id = %plan.id,
            final_price = %plan.final_price,
            operation = operation,
            "Plan repriced"
        );
        Ok(())
    }
}

fn validate_service_fields(name: &str, base_price: Decimal, cycles: usize) -> Result<()> {
    let mut problems = Vec::new();
    if name.is_empty() {
        problems.push("name is required");
    }
    if base_price < Decimal::ZERO {
        problems.push("basePrice must not be negative");
    }
    if cycles == 0 {
        problems.push("at least one allowed billing cycle is required");
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(BillingError::validation(problems.join("; ")))
    }
}

fn validate_plan_pricing(
    override_price: Option<Decimal>,
    discount: Option<&crate::models::Discount>,
) -> Result<()> {
    if override_price.is_some_and(|p| p < Decimal::ZERO) {
        return Err(BillingError::validation("overridePrice must not be negative"));
    }
    if let Some(discount) = discount {
        validate_discount(discount)?;
    }
    Ok(())
}

/// Custom prices must target requested services and be non-negative.
fn custom_price_map(prices: &[(Uuid, Decimal)], ids: &[Uuid]) -> Result<HashMap<Uuid, Decimal>> {
    let mut map = HashMap::new();
    for (id, price) in prices {
        if !ids.contains(id) {
            return Err(BillingError::validation(format!(
                "custom price given for service {} which is not being added",
                id
            )));
        }
        if *price < Decimal::ZERO {
            return Err(BillingError::validation(format!(
                "custom price for service {} must not be negative",
                id
            )));
        }
        map.insert(*id, *price);
    }
    Ok(map)
}

fn build_comparison(plans: &[Plan]) -> PlanComparison {
    let mut names: Vec<&str> = Vec::new();
    for plan in plans {
        for item in &plan.services {
            if !names.contains(&item.name.as_str()) {
                names.push(&item.name);
            }
        }
    }

    let features = names
        .into_iter()
        .map(|name| FeatureRow {
            name: name.to_string(),
            included: plans
                .iter()
                .map(|p| p.services.iter().any(|s| s.name == name))
                .collect(),
        })
        .collect();

    PlanComparison {
        plans: plans
            .iter()
            .map(|p| ComparedPlan {
                id: p.id,
                name: p.name.clone(),
                auto_price: p.auto_price,
                final_price: p.final_price,
                allowed_cycles: p.allowed_cycles.clone(),
            })
            .collect(),
        features,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BillingCycle;
    use chrono::Utc;

    fn plan_with(names: &[&str]) -> Plan {
        let now = Utc::now();
        Plan {
            id: Uuid::new_v4(),
            company_id: Uuid::nil(),
            name: names.join("+"),
            description: None,
            services: names
                .iter()
                .map(|n| IncludedService {
                    service_id: Uuid::new_v4(),
                    name: n.to_string(),
                    base_price: Decimal::TEN,
                    custom_price: None,
                    allowed_cycles: [BillingCycle::Monthly].into_iter().collect(),
                    features: Vec::new(),
                })
                .collect(),
            override_price: None,
            discount: None,
            auto_price: Decimal::ZERO,
            final_price: Decimal::ZERO,
            allowed_cycles: BTreeSet::new(),
            is_active: true,
            created_by: Uuid::nil(),
            created_utc: now,
            updated_utc: now,
        }
    }

    #[test]
    fn comparison_matrix_covers_union_of_services() {
        let basic = plan_with(&["Hosting"]);
        let pro = plan_with(&["Hosting", "Backups"]);
        let cmp = build_comparison(&[basic, pro]);

        assert_eq!(cmp.plans.len(), 2);
        assert_eq!(cmp.features.len(), 2);
        assert_eq!(cmp.features[0].name, "Hosting");
        assert_eq!(cmp.features[0].included, vec![true, true]);
        assert_eq!(cmp.features[1].name, "Backups");
        assert_eq!(cmp.features[1].included, vec![false, true]);
    }

    #[test]
    fn custom_prices_must_target_requested_services() {
        let requested = Uuid::new_v4();
        let stray = Uuid::new_v4();
        assert!(custom_price_map(&[(requested, Decimal::ONE)], &[requested]).is_ok());
        assert!(matches!(
            custom_price_map(&[(stray, Decimal::ONE)], &[requested]),
            Err(BillingError::Validation(_))
        ));
    }

    #[test]
    fn service_validation_names_every_problem() {
        let err = validate_service_fields("", Decimal::NEGATIVE_ONE, 0).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("name"));
        assert!(msg.contains("basePrice"));
        assert!(msg.contains("billing cycle"));
    }
}
