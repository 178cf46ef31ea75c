//! Storage seams. Services only ever talk to these traits.

use crate::error::Result;
use crate::models::{
    Bill, BillStatus, Client, Invoice, ListBillsFilter, ListPaymentsFilter,
    ListSubscriptionsFilter, Notification, Payment, PaymentStatus, Plan, Service, Subscription,
    SweepKind, SweepRun,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait ServiceRepository: Send + Sync {
    async fn insert_service(&self, service: &Service) -> Result<()>;
    async fn update_service(&self, service: &Service) -> Result<()>;
    async fn get_service(&self, company_id: Uuid, id: Uuid) -> Result<Option<Service>>;
    async fn get_services(&self, company_id: Uuid, ids: &[Uuid]) -> Result<Vec<Service>>;
    async fn list_services(&self, company_id: Uuid, active_only: bool) -> Result<Vec<Service>>;
}

#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn insert_plan(&self, plan: &Plan) -> Result<()>;
    async fn update_plan(&self, plan: &Plan) -> Result<()>;
    async fn get_plan(&self, company_id: Uuid, id: Uuid) -> Result<Option<Plan>>;
    async fn list_plans(&self, company_id: Uuid, active_only: bool) -> Result<Vec<Plan>>;
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()>;
    async fn update_subscription(&self, subscription: &Subscription) -> Result<()>;
    async fn get_subscription(&self, company_id: Uuid, id: Uuid) -> Result<Option<Subscription>>;
    async fn list_subscriptions(
        &self,
        company_id: Uuid,
        filter: &ListSubscriptionsFilter,
    ) -> Result<Vec<Subscription>>;
}

#[async_trait]
pub trait BillRepository: Send + Sync {
    async fn insert_bill(&self, bill: &Bill) -> Result<()>;
    async fn update_bill(&self, bill: &Bill) -> Result<()>;
    async fn delete_bill(&self, company_id: Uuid, id: Uuid) -> Result<bool>;
    async fn get_bill(&self, company_id: Uuid, id: Uuid) -> Result<Option<Bill>>;
    async fn list_bills(&self, company_id: Uuid, filter: &ListBillsFilter) -> Result<Vec<Bill>>;
    /// Across every company; used by the sweeps.
    async fn list_bills_with_status(&self, statuses: &[BillStatus]) -> Result<Vec<Bill>>;
    /// Next value of the counter scoped to `prefix`, starting at 1.
    async fn next_bill_sequence(&self, prefix: &str) -> Result<u64>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert_payment(&self, payment: &Payment) -> Result<()>;
    async fn update_payment(&self, payment: &Payment) -> Result<()>;
    async fn delete_payment(&self, company_id: Uuid, id: Uuid) -> Result<bool>;
    async fn get_payment(&self, company_id: Uuid, id: Uuid) -> Result<Option<Payment>>;
    async fn list_payments(
        &self,
        company_id: Uuid,
        filter: &ListPaymentsFilter,
    ) -> Result<Vec<Payment>>;
    async fn payments_for_bill(&self, bill_id: Uuid) -> Result<Vec<Payment>>;
    /// Across every company; used by the sweeps.
    async fn list_payments_with_status(&self, statuses: &[PaymentStatus]) -> Result<Vec<Payment>>;
}

#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<()>;
    async fn get_invoice(&self, company_id: Uuid, id: Uuid) -> Result<Option<Invoice>>;
    async fn list_invoices(&self, company_id: Uuid, client_id: Option<Uuid>)
        -> Result<Vec<Invoice>>;
    async fn find_by_subscription_payment(
        &self,
        subscription_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Option<Invoice>>;
    async fn next_invoice_sequence(&self, prefix: &str) -> Result<u64>;
}

#[async_trait]
pub trait ClientRepository: Send + Sync {
    async fn upsert_client(&self, client: &Client) -> Result<()>;
    async fn get_client(&self, company_id: Uuid, id: Uuid) -> Result<Option<Client>>;
    async fn list_active_clients_with_plan_end(&self) -> Result<Vec<Client>>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Stores the notification unless one with the same dedup key exists.
    /// Returns whether it was stored.
    async fn insert_if_absent(&self, notification: &Notification) -> Result<bool>;
    async fn list_for_recipient(
        &self,
        company_id: Uuid,
        recipient_user_id: Uuid,
    ) -> Result<Vec<Notification>>;
    async fn mark_read(&self, company_id: Uuid, recipient_user_id: Uuid, id: Uuid)
        -> Result<bool>;
}

#[async_trait]
pub trait SweepRunRepository: Send + Sync {
    /// Claims the (kind, date) slot. `None` when it is already running or
    /// completed; a failed run may be claimed again.
    async fn try_begin(
        &self,
        kind: SweepKind,
        run_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Option<SweepRun>>;
    async fn finish(&self, run: &SweepRun) -> Result<()>;
    async fn get_run(&self, kind: SweepKind, run_date: NaiveDate) -> Result<Option<SweepRun>>;
}

#[async_trait]
pub trait StoreHealth: Send + Sync {
    async fn ping(&self) -> Result<()>;
}

/// Every repository the services consume, as shared trait objects.
#[derive(Clone)]
pub struct Repositories {
    pub services: Arc<dyn ServiceRepository>,
    pub plans: Arc<dyn PlanRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub bills: Arc<dyn BillRepository>,
    pub payments: Arc<dyn PaymentRepository>,
    pub invoices: Arc<dyn InvoiceRepository>,
    pub clients: Arc<dyn ClientRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub sweep_runs: Arc<dyn SweepRunRepository>,
    pub health: Arc<dyn StoreHealth>,
}

impl Repositories {
    /// Builds the bundle from one store implementing every trait.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: ServiceRepository
            + PlanRepository
            + SubscriptionRepository
            + BillRepository
            + PaymentRepository
            + InvoiceRepository
            + ClientRepository
            + NotificationRepository
            + SweepRunRepository
            + StoreHealth
            + 'static,
    {
        Self {
            services: store.clone(),
            plans: store.clone(),
            subscriptions: store.clone(),
            bills: store.clone(),
            payments: store.clone(),
            invoices: store.clone(),
            clients: store.clone(),
            notifications: store.clone(),
            sweep_runs: store.clone(),
            health: store,
        }
    }
}
