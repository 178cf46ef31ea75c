//! In-process store backed by `DashMap`. Used by tests and when no
//! database is configured.

use super::repository::{
    BillRepository, ClientRepository, InvoiceRepository, NotificationRepository,
    PaymentRepository, PlanRepository, ServiceRepository, StoreHealth, SubscriptionRepository,
    SweepRunRepository,
};
use crate::error::{BillingError, Result};
use crate::models::{
    Bill, BillStatus, Client, Invoice, ListBillsFilter, ListPaymentsFilter,
    ListSubscriptionsFilter, Notification, Payment, PaymentStatus, Plan, Service, Subscription,
    SweepKind, SweepRun, SweepRunStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    services: DashMap<Uuid, Service>,
    plans: DashMap<Uuid, Plan>,
    subscriptions: DashMap<Uuid, Subscription>,
    bills: DashMap<Uuid, Bill>,
    payments: DashMap<Uuid, Payment>,
    invoices: DashMap<Uuid, Invoice>,
    clients: DashMap<Uuid, Client>,
    /// Keyed by dedup key.
    notifications: DashMap<String, Notification>,
    sweep_runs: DashMap<(SweepKind, NaiveDate), SweepRun>,
    sequences: DashMap<String, u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_sequence(&self, key: String) -> u64 {
        let mut entry = self.sequences.entry(key).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Every stored notification, oldest first.
    pub fn all_notifications(&self) -> Vec<Notification> {
        let mut all: Vec<Notification> = self.notifications.iter().map(|n| n.clone()).collect();
        all.sort_by_key(|n| n.created_utc);
        all
    }
}

fn insert_new<T: Clone>(map: &DashMap<Uuid, T>, id: Uuid, value: &T, entity: &str) -> Result<()> {
    match map.entry(id) {
        Entry::Occupied(_) => Err(BillingError::Storage(anyhow::anyhow!(
            "{} {} already exists",
            entity,
            id
        ))),
        Entry::Vacant(v) => {
            v.insert(value.clone());
            Ok(())
        }
    }
}

fn replace_existing<T: Clone>(
    map: &DashMap<Uuid, T>,
    id: Uuid,
    value: &T,
    entity: &'static str,
) -> Result<()> {
    match map.get_mut(&id) {
        Some(mut slot) => {
            *slot = value.clone();
            Ok(())
        }
        None => Err(BillingError::not_found(entity, id)),
    }
}

#[async_trait]
impl ServiceRepository for MemoryStore {
    async fn insert_service(&self, service: &Service) -> Result<()> {
        insert_new(&self.services, service.id, service, "service")
    }

    async fn update_service(&self, service: &Service) -> Result<()> {
        replace_existing(&self.services, service.id, service, "service")
    }

    async fn get_service(&self, company_id: Uuid, id: Uuid) -> Result<Option<Service>> {
        Ok(self
            .services
            .get(&id)
            .filter(|s| s.company_id == company_id)
            .map(|s| s.clone()))
    }

    async fn get_services(&self, company_id: Uuid, ids: &[Uuid]) -> Result<Vec<Service>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.services.get(id))
            .filter(|s| s.company_id == company_id)
            .map(|s| s.clone())
            .collect())
    }

    async fn list_services(&self, company_id: Uuid, active_only: bool) -> Result<Vec<Service>> {
        let mut services: Vec<Service> = self
            .services
            .iter()
            .filter(|s| s.company_id == company_id && (!active_only || s.is_active))
            .map(|s| s.clone())
            .collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(services)
    }
}

#[async_trait]
impl PlanRepository for MemoryStore {
    async fn insert_plan(&self, plan: &Plan) -> Result<()> {
        insert_new(&self.plans, plan.id, plan, "plan")
    }

    async fn update_plan(&self, plan: &Plan) -> Result<()> {
        replace_existing(&self.plans, plan.id, plan, "plan")
    }

    async fn get_plan(&self, company_id: Uuid, id: Uuid) -> Result<Option<Plan>> {
        Ok(self
            .plans
            .get(&id)
            .filter(|p| p.company_id == company_id)
            .map(|p| p.clone()))
    }

    async fn list_plans(&self, company_id: Uuid, active_only: bool) -> Result<Vec<Plan>> {
        let mut plans: Vec<Plan> = self
            .plans
            .iter()
            .filter(|p| p.company_id == company_id && (!active_only || p.is_active))
            .map(|p| p.clone())
            .collect();
        plans.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(plans)
    }
}

#[async_trait]
impl SubscriptionRepository for MemoryStore {
    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()> {
        insert_new(&self.subscriptions, subscription.id, subscription, "subscription")
    }

    async fn update_subscription(&self, subscription: &Subscription) -> Result<()> {
        replace_existing(&self.subscriptions, subscription.id, subscription, "subscription")
    }

    async fn get_subscription(&self, company_id: Uuid, id: Uuid) -> Result<Option<Subscription>> {
        Ok(self
            .subscriptions
            .get(&id)
            .filter(|s| s.company_id == company_id)
            .map(|s| s.clone()))
    }

    async fn list_subscriptions(
        &self,
        company_id: Uuid,
        filter: &ListSubscriptionsFilter,
    ) -> Result<Vec<Subscription>> {
        let mut subscriptions: Vec<Subscription> = self
            .subscriptions
            .iter()
            .filter(|s| {
                s.company_id == company_id
                    && filter.client_id.map_or(true, |c| s.client_id == c)
                    && filter.status.map_or(true, |st| s.status == st)
            })
            .map(|s| s.clone())
            .collect();
        subscriptions.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(subscriptions)
    }
}

#[async_trait]
impl BillRepository for MemoryStore {
    async fn insert_bill(&self, bill: &Bill) -> Result<()> {
        insert_new(&self.bills, bill.id, bill, "bill")
    }

    async fn update_bill(&self, bill: &Bill) -> Result<()> {
        replace_existing(&self.bills, bill.id, bill, "bill")
    }

    async fn delete_bill(&self, company_id: Uuid, id: Uuid) -> Result<bool> {
        Ok(self
            .bills
            .remove_if(&id, |_, b| b.company_id == company_id)
            .is_some())
    }

    async fn get_bill(&self, company_id: Uuid, id: Uuid) -> Result<Option<Bill>> {
        Ok(self
            .bills
            .get(&id)
            .filter(|b| b.company_id == company_id)
            .map(|b| b.clone()))
    }

    async fn list_bills(&self, company_id: Uuid, filter: &ListBillsFilter) -> Result<Vec<Bill>> {
        let mut bills: Vec<Bill> = self
            .bills
            .iter()
            .filter(|b| {
                b.company_id == company_id
                    && filter.client_id.map_or(true, |c| b.client_id == c)
                    && filter.status.map_or(true, |s| b.status == s)
            })
            .map(|b| b.clone())
            .collect();
        bills.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(bills)
    }

    async fn list_bills_with_status(&self, statuses: &[BillStatus]) -> Result<Vec<Bill>> {
        let mut bills: Vec<Bill> = self
            .bills
            .iter()
            .filter(|b| statuses.contains(&b.status))
            .map(|b| b.clone())
            .collect();
        bills.sort_by_key(|b| b.due_date);
        Ok(bills)
    }

    async fn next_bill_sequence(&self, prefix: &str) -> Result<u64> {
        Ok(self.next_sequence(format!("bill:{}", prefix)))
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<()> {
        insert_new(&self.payments, payment.id, payment, "payment")
    }

    async fn update_payment(&self, payment: &Payment) -> Result<()> {
        replace_existing(&self.payments, payment.id, payment, "payment")
    }

    async fn delete_payment(&self, company_id: Uuid, id: Uuid) -> Result<bool> {
        Ok(self
            .payments
            .remove_if(&id, |_, p| p.company_id == company_id)
            .is_some())
    }

    async fn get_payment(&self, company_id: Uuid, id: Uuid) -> Result<Option<Payment>> {
        Ok(self
            .payments
            .get(&id)
            .filter(|p| p.company_id == company_id)
            .map(|p| p.clone()))
    }

    async fn list_payments(
        &self,
        company_id: Uuid,
        filter: &ListPaymentsFilter,
    ) -> Result<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .payments
            .iter()
            .filter(|p| p.company_id == company_id && filter.matches(p))
            .map(|p| p.clone())
            .collect();
        payments.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(payments)
    }

    async fn payments_for_bill(&self, bill_id: Uuid) -> Result<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .payments
            .iter()
            .filter(|p| p.bill_id == Some(bill_id))
            .map(|p| p.clone())
            .collect();
        payments.sort_by_key(|p| p.created_utc);
        Ok(payments)
    }

    async fn list_payments_with_status(&self, statuses: &[PaymentStatus]) -> Result<Vec<Payment>> {
        Ok(self
            .payments
            .iter()
            .filter(|p| statuses.contains(&p.status))
            .map(|p| p.clone())
            .collect())
    }
}

#[async_trait]
impl InvoiceRepository for MemoryStore {
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<()> {
        insert_new(&self.invoices, invoice.id, invoice, "invoice")
    }

    async fn get_invoice(&self, company_id: Uuid, id: Uuid) -> Result<Option<Invoice>> {
        Ok(self
            .invoices
            .get(&id)
            .filter(|i| i.company_id == company_id)
            .map(|i| i.clone()))
    }

    async fn list_invoices(
        &self,
        company_id: Uuid,
        client_id: Option<Uuid>,
    ) -> Result<Vec<Invoice>> {
        let mut invoices: Vec<Invoice> = self
            .invoices
            .iter()
            .filter(|i| i.company_id == company_id && client_id.map_or(true, |c| i.client_id == c))
            .map(|i| i.clone())
            .collect();
        invoices.sort_by(|a, b| b.issued_utc.cmp(&a.issued_utc));
        Ok(invoices)
    }

    async fn find_by_subscription_payment(
        &self,
        subscription_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Option<Invoice>> {
        Ok(self
            .invoices
            .iter()
            .find(|i| i.subscription_id == subscription_id && i.payment_id == payment_id)
            .map(|i| i.clone()))
    }

    async fn next_invoice_sequence(&self, prefix: &str) -> Result<u64> {
        Ok(self.next_sequence(format!("invoice:{}", prefix)))
    }
}

#[async_trait]
impl ClientRepository for MemoryStore {
    async fn upsert_client(&self, client: &Client) -> Result<()> {
        self.clients.insert(client.id, client.clone());
        Ok(())
    }

    async fn get_client(&self, company_id: Uuid, id: Uuid) -> Result<Option<Client>> {
        Ok(self
            .clients
            .get(&id)
            .filter(|c| c.company_id == company_id)
            .map(|c| c.clone()))
    }

    async fn list_active_clients_with_plan_end(&self) -> Result<Vec<Client>> {
        Ok(self
            .clients
            .iter()
            .filter(|c| c.is_active && c.plan_end_date.is_some())
            .map(|c| c.clone())
            .collect())
    }
}

#[async_trait]
impl NotificationRepository for MemoryStore {
    async fn insert_if_absent(&self, notification: &Notification) -> Result<bool> {
        match self.notifications.entry(notification.dedup_key.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(v) => {
                v.insert(notification.clone());
                Ok(true)
            }
        }
    }

    async fn list_for_recipient(
        &self,
        company_id: Uuid,
        recipient_user_id: Uuid,
    ) -> Result<Vec<Notification>> {
        let mut list: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|n| n.company_id == company_id && n.recipient_user_id == recipient_user_id)
            .map(|n| n.clone())
            .collect();
        list.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(list)
    }

    async fn mark_read(
        &self,
        company_id: Uuid,
        recipient_user_id: Uuid,
        id: Uuid,
    ) -> Result<bool> {
        for mut n in self.notifications.iter_mut() {
            if n.id == id && n.company_id == company_id && n.recipient_user_id == recipient_user_id
            {
                n.is_read = true;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl SweepRunRepository for MemoryStore {
    async fn try_begin(
        &self,
        kind: SweepKind,
        run_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Option<SweepRun>> {
        let fresh = SweepRun {
            id: Uuid::new_v4(),
            kind,
            run_date,
            status: SweepRunStatus::Running,
            started_utc: now,
            finished_utc: None,
            report: None,
            error_message: None,
        };

        match self.sweep_runs.entry((kind, run_date)) {
            Entry::Vacant(v) => {
                v.insert(fresh.clone());
                Ok(Some(fresh))
            }
            Entry::Occupied(mut o) if o.get().status == SweepRunStatus::Failed => {
                o.insert(fresh.clone());
                Ok(Some(fresh))
            }
            Entry::Occupied(_) => Ok(None),
        }
    }

    async fn finish(&self, run: &SweepRun) -> Result<()> {
        self.sweep_runs.insert((run.kind, run.run_date), run.clone());
        Ok(())
    }

    async fn get_run(&self, kind: SweepKind, run_date: NaiveDate) -> Result<Option<SweepRun>> {
        Ok(self.sweep_runs.get(&(kind, run_date)).map(|r| r.clone()))
    }
}

#[async_trait]
impl StoreHealth for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
