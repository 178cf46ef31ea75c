//! PostgreSQL store for billing-engine.
//!
//! Each record kind has its own table holding the columns lookups and
//! sweeps filter on, plus the full record as JSONB.

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
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

fn storage_err(context: &str, e: sqlx::Error) -> BillingError {
    BillingError::Storage(anyhow::anyhow!("{}: {}", context, e))
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "billing-engine"))]
    pub async fn new(database_url: &str, max_connections: u32, min_connections: u32) -> Result<Self> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| storage_err("Failed to connect", e))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| BillingError::Storage(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn fetch_by_id<T>(&self, operation: &str, table: &str, company_id: Uuid, id: Uuid) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send + Unpin + 'static,
    {
        let timer = DB_QUERY_DURATION.with_label_values(&[operation]).start_timer();
        let sql = format!("SELECT body FROM {} WHERE id = $1 AND company_id = $2", table);
        let row = sqlx::query_scalar::<_, Json<T>>(&sql)
            .bind(id)
            .bind(company_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_err(operation, e))?;
        timer.observe_duration();
        Ok(row.map(|Json(body)| body))
    }

    async fn delete_by_id(&self, operation: &str, table: &str, company_id: Uuid, id: Uuid) -> Result<bool> {
        let timer = DB_QUERY_DURATION.with_label_values(&[operation]).start_timer();
        let sql = format!("DELETE FROM {} WHERE id = $1 AND company_id = $2", table);
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(company_id)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err(operation, e))?;
        timer.observe_duration();
        Ok(result.rows_affected() > 0)
    }

    async fn next_sequence(&self, scope: String) -> Result<u64> {
        let timer = DB_QUERY_DURATION.with_label_values(&["next_sequence"]).start_timer();
        let value = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO sequences (scope, value) VALUES ($1, 1)
            ON CONFLICT (scope) DO UPDATE SET value = sequences.value + 1
            RETURNING value
            "#,
        )
        .bind(scope)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| storage_err("next_sequence", e))?;
        timer.observe_duration();
        Ok(value.max(0) as u64)
    }
}

fn ensure_updated(result: sqlx::postgres::PgQueryResult, entity: &'static str, id: Uuid) -> Result<()> {
    if result.rows_affected() == 0 {
        return Err(BillingError::not_found(entity, id));
    }
    Ok(())
}

fn bodies<T>(rows: Vec<Json<T>>) -> Vec<T> {
    rows.into_iter().map(|Json(body)| body).collect()
}

#[async_trait]
impl ServiceRepository for Database {
    #[instrument(skip(self, service), fields(service_id = %service.id))]
    async fn insert_service(&self, service: &Service) -> Result<()> {
        let timer = DB_QUERY_DURATION.with_label_values(&["insert_service"]).start_timer();
        sqlx::query(
            r#"
            INSERT INTO services (id, company_id, name, is_active, body, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(service.id)
        .bind(service.company_id)
        .bind(&service.name)
        .bind(service.is_active)
        .bind(Json(service))
        .bind(service.created_utc)
        .bind(service.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to insert service", e))?;
        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self, service), fields(service_id = %service.id))]
    async fn update_service(&self, service: &Service) -> Result<()> {
        let timer = DB_QUERY_DURATION.with_label_values(&["update_service"]).start_timer();
        let result = sqlx::query(
            r#"
            UPDATE services SET name = $3, is_active = $4, body = $5, updated_utc = $6
            WHERE id = $1 AND company_id = $2
            "#,
        )
        .bind(service.id)
        .bind(service.company_id)
        .bind(&service.name)
        .bind(service.is_active)
        .bind(Json(service))
        .bind(service.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to update service", e))?;
        timer.observe_duration();
        ensure_updated(result, "service", service.id)
    }

    async fn get_service(&self, company_id: Uuid, id: Uuid) -> Result<Option<Service>> {
        self.fetch_by_id("get_service", "services", company_id, id).await
    }

    #[instrument(skip(self, ids), fields(company_id = %company_id))]
    async fn get_services(&self, company_id: Uuid, ids: &[Uuid]) -> Result<Vec<Service>> {
        let timer = DB_QUERY_DURATION.with_label_values(&["get_services"]).start_timer();
        let rows = sqlx::query_scalar::<_, Json<Service>>(
            "SELECT body FROM services WHERE company_id = $1 AND id = ANY($2)",
        )
        .bind(company_id)
        .bind(ids.to_vec())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to get services", e))?;
        timer.observe_duration();
        Ok(bodies(rows))
    }

    #[instrument(skip(self), fields(company_id = %company_id))]
    async fn list_services(&self, company_id: Uuid, active_only: bool) -> Result<Vec<Service>> {
        let timer = DB_QUERY_DURATION.with_label_values(&["list_services"]).start_timer();
        let rows = sqlx::query_scalar::<_, Json<Service>>(
            r#"
            SELECT body FROM services
            WHERE company_id = $1 AND ($2::bool = FALSE OR is_active = TRUE)
            ORDER BY name
            "#,
        )
        .bind(company_id)
        .bind(active_only)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to list services", e))?;
        timer.observe_duration();
        Ok(bodies(rows))
    }
}

#[async_trait]
impl PlanRepository for Database {
    #[instrument(skip(self, plan), fields(plan_id = %plan.id))]
    async fn insert_plan(&self, plan: &Plan) -> Result<()> {
        let timer = DB_QUERY_DURATION.with_label_values(&["insert_plan"]).start_timer();
        sqlx::query(
            r#"
            INSERT INTO plans (id, company_id, name, is_active, body, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(plan.id)
        .bind(plan.company_id)
        .bind(&plan.name)
        .bind(plan.is_active)
        .bind(Json(plan))
        .bind(plan.created_utc)
        .bind(plan.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to insert plan", e))?;
        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self, plan), fields(plan_id = %plan.id))]
    async fn update_plan(&self, plan: &Plan) -> Result<()> {
        let timer = DB_QUERY_DURATION.with_label_values(&["update_plan"]).start_timer();
        let result = sqlx::query(
            r#"
            UPDATE plans SET name = $3, is_active = $4, body = $5, updated_utc = $6
            WHERE id = $1 AND company_id = $2
            "#,
        )
        .bind(plan.id)
        .bind(plan.company_id)
        .bind(&plan.name)
        .bind(plan.is_active)
        .bind(Json(plan))
        .bind(plan.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to update plan", e))?;
        timer.observe_duration();
        ensure_updated(result, "plan", plan.id)
    }

    async fn get_plan(&self, company_id: Uuid, id: Uuid) -> Result<Option<Plan>> {
        self.fetch_by_id("get_plan", "plans", company_id, id).await
    }

    #[instrument(skip(self), fields(company_id = %company_id))]
    async fn list_plans(&self, company_id: Uuid, active_only: bool) -> Result<Vec<Plan>> {
        let timer = DB_QUERY_DURATION.with_label_values(&["list_plans"]).start_timer();
        let rows = sqlx::query_scalar::<_, Json<Plan>>(
            r#"
            SELECT body FROM plans
            WHERE company_id = $1 AND ($2::bool = FALSE OR is_active = TRUE)
            ORDER BY name
            "#,
        )
        .bind(company_id)
        .bind(active_only)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to list plans", e))?;
        timer.observe_duration();
        Ok(bodies(rows))
    }
}

#[async_trait]
impl SubscriptionRepository for Database {
    #[instrument(skip(self, subscription), fields(subscription_id = %subscription.id))]
    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_subscription"])
            .start_timer();
        sqlx::query(
            r#"
            INSERT INTO subscriptions (id, company_id, client_id, plan_id, status, body, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.company_id)
        .bind(subscription.client_id)
        .bind(subscription.plan_id)
        .bind(subscription.status.as_str())
        .bind(Json(subscription))
        .bind(subscription.created_utc)
        .bind(subscription.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to insert subscription", e))?;
        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self, subscription), fields(subscription_id = %subscription.id))]
    async fn update_subscription(&self, subscription: &Subscription) -> Result<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_subscription"])
            .start_timer();
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET status = $3, body = $4, updated_utc = $5
            WHERE id = $1 AND company_id = $2
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.company_id)
        .bind(subscription.status.as_str())
        .bind(Json(subscription))
        .bind(subscription.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to update subscription", e))?;
        timer.observe_duration();
        ensure_updated(result, "subscription", subscription.id)
    }

    async fn get_subscription(&self, company_id: Uuid, id: Uuid) -> Result<Option<Subscription>> {
        self.fetch_by_id("get_subscription", "subscriptions", company_id, id)
            .await
    }

    #[instrument(skip(self, filter), fields(company_id = %company_id))]
    async fn list_subscriptions(
        &self,
        company_id: Uuid,
        filter: &ListSubscriptionsFilter,
    ) -> Result<Vec<Subscription>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_subscriptions"])
            .start_timer();
        let rows = sqlx::query_scalar::<_, Json<Subscription>>(
            r#"
            SELECT body FROM subscriptions
            WHERE company_id = $1
              AND ($2::uuid IS NULL OR client_id = $2)
              AND ($3::text IS NULL OR status = $3)
            ORDER BY created_utc DESC
            "#,
        )
        .bind(company_id)
        .bind(filter.client_id)
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to list subscriptions", e))?;
        timer.observe_duration();
        Ok(bodies(rows))
    }
}

#[async_trait]
impl BillRepository for Database {
    #[instrument(skip(self, bill), fields(bill_id = %bill.id))]
    async fn insert_bill(&self, bill: &Bill) -> Result<()> {
        let timer = DB_QUERY_DURATION.with_label_values(&["insert_bill"]).start_timer();
        sqlx::query(
            r#"
            INSERT INTO bills (id, company_id, client_id, bill_number, status, due_date, body, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(bill.id)
        .bind(bill.company_id)
        .bind(bill.client_id)
        .bind(&bill.bill_number)
        .bind(bill.status.as_str())
        .bind(bill.due_date)
        .bind(Json(bill))
        .bind(bill.created_utc)
        .bind(bill.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to insert bill", e))?;
        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self, bill), fields(bill_id = %bill.id))]
    async fn update_bill(&self, bill: &Bill) -> Result<()> {
        let timer = DB_QUERY_DURATION.with_label_values(&["update_bill"]).start_timer();
        let result = sqlx::query(
            r#"
            UPDATE bills SET status = $3, due_date = $4, body = $5, updated_utc = $6
            WHERE id = $1 AND company_id = $2
            "#,
        )
        .bind(bill.id)
        .bind(bill.company_id)
        .bind(bill.status.as_str())
        .bind(bill.due_date)
        .bind(Json(bill))
        .bind(bill.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to update bill", e))?;
        timer.observe_duration();
        ensure_updated(result, "bill", bill.id)
    }

    async fn delete_bill(&self, company_id: Uuid, id: Uuid) -> Result<bool> {
        self.delete_by_id("delete_bill", "bills", company_id, id).await
    }

    async fn get_bill(&self, company_id: Uuid, id: Uuid) -> Result<Option<Bill>> {
        self.fetch_by_id("get_bill", "bills", company_id, id).await
    }

    #[instrument(skip(self, filter), fields(company_id = %company_id))]
    async fn list_bills(&self, company_id: Uuid, filter: &ListBillsFilter) -> Result<Vec<Bill>> {
        let timer = DB_QUERY_DURATION.with_label_values(&["list_bills"]).start_timer();
        let rows = sqlx::query_scalar::<_, Json<Bill>>(
            r#"
            SELECT body FROM bills
            WHERE company_id = $1
              AND ($2::uuid IS NULL OR client_id = $2)
              AND ($3::text IS NULL OR status = $3)
            ORDER BY created_utc DESC
            "#,
        )
        .bind(company_id)
        .bind(filter.client_id)
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to list bills", e))?;
        timer.observe_duration();
        Ok(bodies(rows))
    }

    #[instrument(skip(self))]
    async fn list_bills_with_status(&self, statuses: &[BillStatus]) -> Result<Vec<Bill>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_bills_with_status"])
            .start_timer();
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let rows = sqlx::query_scalar::<_, Json<Bill>>(
            "SELECT body FROM bills WHERE status = ANY($1) ORDER BY due_date",
        )
        .bind(statuses)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to list bills by status", e))?;
        timer.observe_duration();
        Ok(bodies(rows))
    }

    async fn next_bill_sequence(&self, prefix: &str) -> Result<u64> {
        self.next_sequence(format!("bill:{}", prefix)).await
    }
}

#[async_trait]
impl PaymentRepository for Database {
    #[instrument(skip(self, payment), fields(payment_id = %payment.id))]
    async fn insert_payment(&self, payment: &Payment) -> Result<()> {
        let timer = DB_QUERY_DURATION.with_label_values(&["insert_payment"]).start_timer();
        sqlx::query(
            r#"
            INSERT INTO payments (id, company_id, client_id, bill_id, subscription_id, status, due_date, body, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(payment.id)
        .bind(payment.company_id)
        .bind(payment.client_id)
        .bind(payment.bill_id)
        .bind(payment.subscription_id)
        .bind(payment.status.as_str())
        .bind(payment.due_date)
        .bind(Json(payment))
        .bind(payment.created_utc)
        .bind(payment.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to insert payment", e))?;
        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self, payment), fields(payment_id = %payment.id))]
    async fn update_payment(&self, payment: &Payment) -> Result<()> {
        let timer = DB_QUERY_DURATION.with_label_values(&["update_payment"]).start_timer();
        let result = sqlx::query(
            r#"
            UPDATE payments SET status = $3, due_date = $4, body = $5, updated_utc = $6
            WHERE id = $1 AND company_id = $2
            "#,
        )
        .bind(payment.id)
        .bind(payment.company_id)
        .bind(payment.status.as_str())
        .bind(payment.due_date)
        .bind(Json(payment))
        .bind(payment.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to update payment", e))?;
        timer.observe_duration();
        ensure_updated(result, "payment", payment.id)
    }

    async fn delete_payment(&self, company_id: Uuid, id: Uuid) -> Result<bool> {
        self.delete_by_id("delete_payment", "payments", company_id, id)
            .await
    }

    async fn get_payment(&self, company_id: Uuid, id: Uuid) -> Result<Option<Payment>> {
        self.fetch_by_id("get_payment", "payments", company_id, id).await
    }

    #[instrument(skip(self, filter), fields(company_id = %company_id))]
    async fn list_payments(
        &self,
        company_id: Uuid,
        filter: &ListPaymentsFilter,
    ) -> Result<Vec<Payment>> {
        let timer = DB_QUERY_DURATION.with_label_values(&["list_payments"]).start_timer();
        let rows = sqlx::query_scalar::<_, Json<Payment>>(
            r#"
            SELECT body FROM payments
            WHERE company_id = $1
              AND ($2::uuid IS NULL OR client_id = $2)
              AND ($3::uuid IS NULL OR bill_id = $3)
              AND ($4::uuid IS NULL OR subscription_id = $4)
              AND ($5::text IS NULL OR status = $5)
            ORDER BY created_utc DESC
            "#,
        )
        .bind(company_id)
        .bind(filter.client_id)
        .bind(filter.bill_id)
        .bind(filter.subscription_id)
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to list payments", e))?;
        timer.observe_duration();
        Ok(bodies(rows))
    }

    #[instrument(skip(self), fields(bill_id = %bill_id))]
    async fn payments_for_bill(&self, bill_id: Uuid) -> Result<Vec<Payment>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["payments_for_bill"])
            .start_timer();
        let rows = sqlx::query_scalar::<_, Json<Payment>>(
            "SELECT body FROM payments WHERE bill_id = $1 ORDER BY created_utc",
        )
        .bind(bill_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to load bill payments", e))?;
        timer.observe_duration();
        Ok(bodies(rows))
    }

    #[instrument(skip(self))]
    async fn list_payments_with_status(&self, statuses: &[PaymentStatus]) -> Result<Vec<Payment>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payments_with_status"])
            .start_timer();
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let rows = sqlx::query_scalar::<_, Json<Payment>>(
            "SELECT body FROM payments WHERE status = ANY($1) ORDER BY due_date NULLS LAST",
        )
        .bind(statuses)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to list payments by status", e))?;
        timer.observe_duration();
        Ok(bodies(rows))
    }
}

#[async_trait]
impl InvoiceRepository for Database {
    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.id))]
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<()> {
        let timer = DB_QUERY_DURATION.with_label_values(&["insert_invoice"]).start_timer();
        sqlx::query(
            r#"
            INSERT INTO invoices (id, company_id, client_id, subscription_id, payment_id, invoice_number, body, issued_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(invoice.id)
        .bind(invoice.company_id)
        .bind(invoice.client_id)
        .bind(invoice.subscription_id)
        .bind(invoice.payment_id)
        .bind(&invoice.invoice_number)
        .bind(Json(invoice))
        .bind(invoice.issued_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to insert invoice", e))?;
        timer.observe_duration();
        Ok(())
    }

    async fn get_invoice(&self, company_id: Uuid, id: Uuid) -> Result<Option<Invoice>> {
        self.fetch_by_id("get_invoice", "invoices", company_id, id).await
    }

    #[instrument(skip(self), fields(company_id = %company_id))]
    async fn list_invoices(
        &self,
        company_id: Uuid,
        client_id: Option<Uuid>,
    ) -> Result<Vec<Invoice>> {
        let timer = DB_QUERY_DURATION.with_label_values(&["list_invoices"]).start_timer();
        let rows = sqlx::query_scalar::<_, Json<Invoice>>(
            r#"
            SELECT body FROM invoices
            WHERE company_id = $1 AND ($2::uuid IS NULL OR client_id = $2)
            ORDER BY issued_utc DESC
            "#,
        )
        .bind(company_id)
        .bind(client_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to list invoices", e))?;
        timer.observe_duration();
        Ok(bodies(rows))
    }

    async fn find_by_subscription_payment(
        &self,
        subscription_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Option<Invoice>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_invoice_by_subscription_payment"])
            .start_timer();
        let row = sqlx::query_scalar::<_, Json<Invoice>>(
            "SELECT body FROM invoices WHERE subscription_id = $1 AND payment_id = $2",
        )
        .bind(subscription_id)
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to look up invoice", e))?;
        timer.observe_duration();
        Ok(row.map(|Json(body)| body))
    }

    async fn next_invoice_sequence(&self, prefix: &str) -> Result<u64> {
        self.next_sequence(format!("invoice:{}", prefix)).await
    }
}

#[async_trait]
impl ClientRepository for Database {
    #[instrument(skip(self, client), fields(client_id = %client.id))]
    async fn upsert_client(&self, client: &Client) -> Result<()> {
        let timer = DB_QUERY_DURATION.with_label_values(&["upsert_client"]).start_timer();
        sqlx::query(
            r#"
            INSERT INTO clients (id, company_id, is_active, plan_end_date, body, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET is_active = EXCLUDED.is_active,
                plan_end_date = EXCLUDED.plan_end_date,
                body = EXCLUDED.body,
                updated_utc = EXCLUDED.updated_utc
            "#,
        )
        .bind(client.id)
        .bind(client.company_id)
        .bind(client.is_active)
        .bind(client.plan_end_date)
        .bind(Json(client))
        .bind(client.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to upsert client", e))?;
        timer.observe_duration();
        Ok(())
    }

    async fn get_client(&self, company_id: Uuid, id: Uuid) -> Result<Option<Client>> {
        self.fetch_by_id("get_client", "clients", company_id, id).await
    }

    async fn list_active_clients_with_plan_end(&self) -> Result<Vec<Client>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_active_clients_with_plan_end"])
            .start_timer();
        let rows = sqlx::query_scalar::<_, Json<Client>>(
            "SELECT body FROM clients WHERE is_active = TRUE AND plan_end_date IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to list clients", e))?;
        timer.observe_duration();
        Ok(bodies(rows))
    }
}

#[async_trait]
impl NotificationRepository for Database {
    #[instrument(skip(self, notification), fields(dedup_key = %notification.dedup_key))]
    async fn insert_if_absent(&self, notification: &Notification) -> Result<bool> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_notification"])
            .start_timer();
        let result = sqlx::query(
            r#"
            INSERT INTO notifications (id, company_id, recipient_user_id, dedup_key, is_read, body, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (dedup_key) DO NOTHING
            "#,
        )
        .bind(notification.id)
        .bind(notification.company_id)
        .bind(notification.recipient_user_id)
        .bind(&notification.dedup_key)
        .bind(notification.is_read)
        .bind(Json(notification))
        .bind(notification.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to insert notification", e))?;
        timer.observe_duration();
        Ok(result.rows_affected() == 1)
    }

    async fn list_for_recipient(
        &self,
        company_id: Uuid,
        recipient_user_id: Uuid,
    ) -> Result<Vec<Notification>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_notifications"])
            .start_timer();
        let rows = sqlx::query_scalar::<_, Json<Notification>>(
            r#"
            SELECT body FROM notifications
            WHERE company_id = $1 AND recipient_user_id = $2
            ORDER BY created_utc DESC
            "#,
        )
        .bind(company_id)
        .bind(recipient_user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to list notifications", e))?;
        timer.observe_duration();
        Ok(bodies(rows))
    }

    async fn mark_read(
        &self,
        company_id: Uuid,
        recipient_user_id: Uuid,
        id: Uuid,
    ) -> Result<bool> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_notification_read"])
            .start_timer();
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET is_read = TRUE, body = jsonb_set(body, '{isRead}', 'true'::jsonb)
            WHERE id = $1 AND company_id = $2 AND recipient_user_id = $3
            "#,
        )
        .bind(id)
        .bind(company_id)
        .bind(recipient_user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to mark notification read", e))?;
        timer.observe_duration();
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SweepRunRepository for Database {
    #[instrument(skip(self, now), fields(kind = kind.as_str(), run_date = %run_date))]
    async fn try_begin(
        &self,
        kind: SweepKind,
        run_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Option<SweepRun>> {
        let timer = DB_QUERY_DURATION.with_label_values(&["begin_sweep_run"]).start_timer();
        let run = SweepRun {
            id: Uuid::new_v4(),
            kind,
            run_date,
            status: SweepRunStatus::Running,
            started_utc: now,
            finished_utc: None,
            report: None,
            error_message: None,
        };

        // A failed run may be reclaimed; running and completed ones may not.
        let claimed = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO sweep_runs (kind, run_date, id, status, body)
            VALUES ($1, $2, $3, 'running', $4)
            ON CONFLICT (kind, run_date) DO UPDATE
            SET id = EXCLUDED.id, status = 'running', body = EXCLUDED.body
            WHERE sweep_runs.status = 'failed'
            RETURNING id
            "#,
        )
        .bind(kind.as_str())
        .bind(run_date)
        .bind(run.id)
        .bind(Json(&run))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to claim sweep run", e))?;
        timer.observe_duration();

        Ok(claimed.map(|_| run))
    }

    async fn finish(&self, run: &SweepRun) -> Result<()> {
        let timer = DB_QUERY_DURATION.with_label_values(&["finish_sweep_run"]).start_timer();
        sqlx::query(
            "UPDATE sweep_runs SET status = $3, body = $4 WHERE kind = $1 AND run_date = $2",
        )
        .bind(run.kind.as_str())
        .bind(run.run_date)
        .bind(run.status.as_str())
        .bind(Json(run))
        .execute(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to finish sweep run", e))?;
        timer.observe_duration();
        Ok(())
    }

    async fn get_run(&self, kind: SweepKind, run_date: NaiveDate) -> Result<Option<SweepRun>> {
        let row = sqlx::query_scalar::<_, Json<SweepRun>>(
            "SELECT body FROM sweep_runs WHERE kind = $1 AND run_date = $2",
        )
        .bind(kind.as_str())
        .bind(run_date)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to load sweep run", e))?;
        Ok(row.map(|Json(body)| body))
    }
}

#[async_trait]
impl StoreHealth for Database {
    async fn ping(&self) -> Result<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err("Health check failed", e))?;

        timer.observe_duration();
        Ok(())
    }
}
