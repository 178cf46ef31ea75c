//! Subscription lifecycle: creation with frozen plan terms, activation, cancellation.

use crate::clock::Clock;
use crate::error::{BillingError, Result};
use crate::models::{
    describe_cycles, AddOn, BillingCycle, Client, CreateSubscription, ListSubscriptionsFilter, Plan,
    PlanSnapshot, Subscription, SubscriptionStatus,
};
use crate::services::locks::RecordLocks;
use crate::services::metrics::record_subscription_operation;
use crate::services::pricing::round_money;
use crate::services::repository::Repositories;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Money fields of a subscription, derived once at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionAmounts {
    pub plan_amount: Decimal,
    pub add_ons_amount: Decimal,
    pub discount: Decimal,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
}

pub fn compute_amounts(
    plan_price: Decimal,
    add_ons: &[AddOn],
    discount: Decimal,
    tax_percentage: Decimal,
) -> Result<SubscriptionAmounts> {
    if discount < Decimal::ZERO {
        return Err(BillingError::validation("discount must not be negative"));
    }
    if let Some(bad) = add_ons.iter().find(|a| a.price < Decimal::ZERO) {
        return Err(BillingError::validation(format!(
            "add-on '{}' has a negative price",
            bad.name
        )));
    }

    let plan_amount = round_money(plan_price);
    let add_ons_amount = round_money(
        add_ons
            .iter()
            .filter(|a| a.is_active)
            .map(|a| a.price)
            .sum(),
    );
    let gross = plan_amount + add_ons_amount;
    if discount > gross {
        return Err(BillingError::validation(format!(
            "discount {} exceeds plan and add-on amount {}",
            discount, gross
        )));
    }

    let subtotal = round_money(gross - discount);
    let tax_amount = round_money(subtotal * tax_percentage / Decimal::ONE_HUNDRED);
    Ok(SubscriptionAmounts {
        plan_amount,
        add_ons_amount,
        discount: round_money(discount),
        subtotal,
        tax_amount,
        total_amount: subtotal + tax_amount,
    })
}

/// Returns `(start, end, next_billing)`. Explicit dates win; otherwise the
/// cycle length is added to the start. One-time cycles never rebill.
pub fn derive_dates(
    cycle: BillingCycle,
    today: NaiveDate,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<(NaiveDate, Option<NaiveDate>, Option<NaiveDate>)> {
    let start = start.unwrap_or(today);
    let next_billing = cycle.advance(start);
    let end = end.or(next_billing);
    if end.is_some_and(|e| e < start) {
        return Err(BillingError::validation("endDate must not be before startDate"));
    }
    Ok((start, end, next_billing))
}

#[derive(Clone)]
pub struct SubscriptionService {
    repos: Repositories,
    clock: Arc<dyn Clock>,
    locks: RecordLocks,
    tax_percentage: Decimal,
}

impl SubscriptionService {
    pub fn new(
        repos: Repositories,
        clock: Arc<dyn Clock>,
        locks: RecordLocks,
        tax_percentage: Decimal,
    ) -> Self {
        Self {
            repos,
            clock,
            locks,
            tax_percentage,
        }
    }

    #[instrument(skip(self, input), fields(company_id = %input.company_id, plan_id = %input.plan_id))]
    pub async fn create(&self, input: CreateSubscription) -> Result<Subscription> {
        let plan = self
            .repos
            .plans
            .get_plan(input.company_id, input.plan_id)
            .await?
            .ok_or_else(|| BillingError::not_found("plan", input.plan_id))?;
        ensure_subscribable(&plan, input.billing_cycle)?;

        let amounts = compute_amounts(
            plan.final_price,
            &input.add_ons,
            input.discount,
            self.tax_percentage,
        )?;
        let (start_date, end_date, next_billing_date) = derive_dates(
            input.billing_cycle,
            self.clock.today(),
            input.start_date,
            input.end_date,
        )?;

        let now = self.clock.now();
        let subscription = Subscription {
            id: Uuid::new_v4(),
            company_id: input.company_id,
            client_id: input.client_id,
            plan_id: plan.id,
            plan_snapshot: PlanSnapshot {
                plan_id: plan.id,
                name: plan.name.clone(),
                price: plan.final_price,
                billing_cycle: input.billing_cycle,
                features: plan.features(),
            },
            add_ons: input.add_ons,
            billing_cycle: input.billing_cycle,
            plan_amount: amounts.plan_amount,
            add_ons_amount: amounts.add_ons_amount,
            discount: amounts.discount,
            subtotal: amounts.subtotal,
            tax_percentage: self.tax_percentage,
            tax_amount: amounts.tax_amount,
            total_amount: amounts.total_amount,
            status: SubscriptionStatus::Pending,
            start_date,
            end_date,
            next_billing_date,
            created_by: input.created_by,
            created_utc: now,
            activated_by: None,
            activated_utc: None,
            cancelled_by: None,
            cancelled_utc: None,
            cancellation_reason: None,
            updated_utc: now,
        };
        self.repos
            .subscriptions
            .insert_subscription(&subscription)
            .await?;

        record_subscription_operation(&subscription.company_id.to_string(), "create");
        info!(
            subscription_id = %subscription.id,
            client_id = %subscription.client_id,
            total_amount = %subscription.total_amount,
            "Subscription created"
        );
        Ok(subscription)
    }

    pub async fn get(&self, company_id: Uuid, id: Uuid) -> Result<Subscription> {
        self.repos
            .subscriptions
            .get_subscription(company_id, id)
            .await?
            .ok_or_else(|| BillingError::not_found("subscription", id))
    }

    pub async fn list(
        &self,
        company_id: Uuid,
        filter: &ListSubscriptionsFilter,
    ) -> Result<Vec<Subscription>> {
        self.repos
            .subscriptions
            .list_subscriptions(company_id, filter)
            .await
    }

    #[instrument(skip(self), fields(subscription_id = %id))]
    pub async fn activate(&self, company_id: Uuid, id: Uuid, actor: Uuid) -> Result<Subscription> {
        let _guard = self.locks.lock(id).await;
        let mut subscription = self.get(company_id, id).await?;
        subscription.activate(actor, self.clock.now())?;
        self.repos
            .subscriptions
            .update_subscription(&subscription)
            .await?;

        record_subscription_operation(&company_id.to_string(), "activate");
        info!(subscription_id = %id, "Subscription activated");
        Ok(subscription)
    }

    #[instrument(skip(self, reason), fields(subscription_id = %id))]
    pub async fn cancel(
        &self,
        company_id: Uuid,
        id: Uuid,
        actor: Uuid,
        reason: &str,
    ) -> Result<Subscription> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(BillingError::validation("cancellation reason is required"));
        }
        let _guard = self.locks.lock(id).await;
        let mut subscription = self.get(company_id, id).await?;
        subscription.cancel(actor, reason, self.clock.now())?;
        self.repos
            .subscriptions
            .update_subscription(&subscription)
            .await?;

        record_subscription_operation(&company_id.to_string(), "cancel");
        info!(subscription_id = %id, "Subscription cancelled");
        Ok(subscription)
    }

    /// Registers or refreshes the client record that links a client to its
    /// user account and current plan window.
    #[instrument(skip(self, client), fields(client_id = %client.id))]
    pub async fn upsert_client(&self, mut client: Client) -> Result<Client> {
        let name = client.name.trim().to_string();
        if name.is_empty() {
            return Err(BillingError::validation("client name is required"));
        }
        client.name = name;
        client.updated_utc = self.clock.now();
        self.repos.clients.upsert_client(&client).await?;

        record_subscription_operation(&client.company_id.to_string(), "upsert_client");
        Ok(client)
    }

    pub async fn get_client(&self, company_id: Uuid, id: Uuid) -> Result<Client> {
        self.repos
            .clients
            .get_client(company_id, id)
            .await?
            .ok_or_else(|| BillingError::not_found("client", id))
    }
}

fn ensure_subscribable(plan: &Plan, cycle: BillingCycle) -> Result<()> {
    if !plan.is_active {
        return Err(BillingError::conflict(format!(
            "plan {} is inactive; subscriptions require an active plan",
            plan.id
        )));
    }
    if !plan.allowed_cycles.contains(&cycle) {
        return Err(BillingError::conflict(format!(
            "billing cycle {} is not allowed for plan {}; allowed cycles: {}",
            cycle,
            plan.id,
            describe_cycles(&plan.allowed_cycles)
        )));
    }
    Ok(())
}
