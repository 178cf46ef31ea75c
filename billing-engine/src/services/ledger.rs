//! Payment ledger: payment transitions and the fold of payments into bills.

use crate::clock::Clock;
use crate::error::{BillingError, Result};
use crate::models::{
    Bill, BillStatus, CreatePayment, Invoice, ListPaymentsFilter, NewNotification,
    NotificationKind, Payment, PaymentMethod, PaymentStats, PaymentStatus, Priority, StatusBucket,
    Subscription, SubscriptionStatus, UpdatePayment,
};
use crate::services::billing_document::{company_code, finalize_bill};
use crate::services::locks::{RecordGuard, RecordLocks};
use crate::services::metrics::{
    record_payment_amount, record_payment_operation, record_reconcile_fold,
};
use crate::services::notifier::Notifier;
use crate::services::pricing::round_money;
use crate::services::repository::Repositories;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Re-derives a payment's balance and status. Verified, rejected and
/// cancelled payments keep their status. A submission awaiting verification
/// stays pending past its due date.
pub fn finalize_payment(mut payment: Payment, today: NaiveDate) -> Payment {
    payment.paid_amount = round_money(payment.paid_amount.max(Decimal::ZERO));
    payment.balance_amount = (payment.amount - payment.paid_amount).max(Decimal::ZERO);

    if payment.status.is_final() {
        return payment;
    }

    if payment.paid_amount >= payment.amount {
        payment.status = PaymentStatus::Paid;
        payment.balance_amount = Decimal::ZERO;
        return payment;
    }

    payment.status = if payment.paid_amount.is_zero() {
        PaymentStatus::Pending
    } else {
        PaymentStatus::Partial
    };
    if payment.submitted_utc.is_none() && payment.due_date.is_some_and(|due| due < today) {
        payment.status = PaymentStatus::Overdue;
    }
    payment
}

/// Sum of `paid_amount` over every payment that is not cancelled.
pub fn fold_paid(payments: &[Payment]) -> Decimal {
    payments
        .iter()
        .filter(|p| p.status != PaymentStatus::Cancelled)
        .map(|p| p.paid_amount)
        .sum()
}

pub fn invoice_number_prefix(company_id: Uuid, at: DateTime<Utc>) -> String {
    format!("INV-{}-{}", company_code(company_id), at.format("%Y%m"))
}

pub fn compute_stats(payments: &[Payment]) -> PaymentStats {
    let by_status = PaymentStatus::ALL
        .iter()
        .map(|status| {
            let matching = payments.iter().filter(|p| p.status == *status);
            StatusBucket {
                status: *status,
                count: matching.clone().count() as u64,
                amount: matching.map(|p| p.amount).sum(),
            }
        })
        .collect();

    let total_received = payments
        .iter()
        .filter(|p| !matches!(p.status, PaymentStatus::Cancelled | PaymentStatus::Rejected))
        .map(|p| p.paid_amount)
        .sum();
    let total_outstanding = payments
        .iter()
        .filter(|p| {
            matches!(
                p.status,
                PaymentStatus::Pending | PaymentStatus::Partial | PaymentStatus::Overdue
            )
        })
        .map(|p| p.balance_amount)
        .sum();
    let pending_verification = payments
        .iter()
        .filter(|p| p.status == PaymentStatus::Pending && p.submitted_utc.is_some())
        .count() as u64;

    PaymentStats {
        total_payments: payments.len() as u64,
        by_status,
        total_received,
        total_outstanding,
        pending_verification,
    }
}

fn ensure_open(payment: &Payment, action: &str) -> Result<()> {
    if payment.status.is_final() {
        return Err(BillingError::conflict(format!(
            "payment {} is {}; {} requires a payment that is not verified, rejected or cancelled",
            payment.id,
            payment.status.as_str(),
            action
        )));
    }
    Ok(())
}

fn ensure_pending(payment: &Payment, action: &str) -> Result<()> {
    if payment.status != PaymentStatus::Pending {
        return Err(BillingError::conflict(format!(
            "payment {} is {}; {} requires status pending",
            payment.id,
            payment.status.as_str(),
            action
        )));
    }
    Ok(())
}

/// Details recorded alongside a partial payment.
#[derive(Debug, Clone, Default)]
pub struct PartialPayment {
    pub amount: Decimal,
    pub method: Option<PaymentMethod>,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

#[derive(Clone)]
pub struct LedgerService {
    repos: Repositories,
    clock: Arc<dyn Clock>,
    locks: RecordLocks,
    notifier: Notifier,
}

impl LedgerService {
    pub fn new(repos: Repositories, clock: Arc<dyn Clock>, locks: RecordLocks, notifier: Notifier) -> Self {
        Self {
            repos,
            clock,
            locks,
            notifier,
        }
    }

    /// Serialises on the bill when there is one, otherwise on the payment.
    async fn lock_for(&self, payment: &Payment) -> RecordGuard {
        self.locks.lock(payment.bill_id.unwrap_or(payment.id)).await
    }

    async fn load_bill(&self, company_id: Uuid, id: Uuid) -> Result<Bill> {
        self.repos
            .bills
            .get_bill(company_id, id)
            .await?
            .ok_or_else(|| BillingError::not_found("bill", id))
    }

    async fn load_subscription(&self, company_id: Uuid, id: Uuid) -> Result<Subscription> {
        self.repos
            .subscriptions
            .get_subscription(company_id, id)
            .await?
            .ok_or_else(|| BillingError::not_found("subscription", id))
    }

    pub async fn get(&self, company_id: Uuid, id: Uuid) -> Result<Payment> {
        self.repos
            .payments
            .get_payment(company_id, id)
            .await?
            .ok_or_else(|| BillingError::not_found("payment", id))
    }

    pub async fn list(&self, company_id: Uuid, filter: &ListPaymentsFilter) -> Result<Vec<Payment>> {
        self.repos.payments.list_payments(company_id, filter).await
    }

    /// Folds the bill's payments into it under the bill lock.
    pub async fn reconcile_bill(&self, company_id: Uuid, bill_id: Uuid) -> Result<Bill> {
        let _guard = self.locks.lock(bill_id).await;
        self.reconcile_locked(company_id, bill_id).await
    }

    /// Caller holds the bill lock. Writes only when something changed, so
    /// a second fold over the same payments is a no-op.
    #[instrument(skip(self), fields(bill_id = %bill_id))]
    async fn reconcile_locked(&self, company_id: Uuid, bill_id: Uuid) -> Result<Bill> {
        let bill = self.load_bill(company_id, bill_id).await?;
        let payments = self.repos.payments.payments_for_bill(bill_id).await?;

        let now = self.clock.now();
        let mut folded = bill.clone();
        folded.paid_amount = fold_paid(&payments);
        let mut folded = finalize_bill(folded, now);

        record_reconcile_fold(folded.status.as_str());
        if folded == bill {
            return Ok(bill);
        }

        folded.updated_utc = now;
        self.repos.bills.update_bill(&folded).await?;
        info!(
            bill_id = %bill_id,
            paid_amount = %folded.paid_amount,
            balance_amount = %folded.balance_amount,
            status = folded.status.as_str(),
            "Bill reconciled"
        );
        Ok(folded)
    }

    #[instrument(skip(self, input), fields(company_id = %input.company_id, client_id = %input.client_id))]
    pub async fn create(&self, input: CreatePayment) -> Result<Payment> {
        if input.amount <= Decimal::ZERO {
            return Err(BillingError::validation("amount must be greater than 0"));
        }
        if input.paid_amount < Decimal::ZERO {
            return Err(BillingError::validation("paidAmount must not be negative"));
        }

        if let Some(subscription_id) = input.subscription_id {
            let subscription = self.load_subscription(input.company_id, subscription_id).await?;
            if subscription.client_id != input.client_id {
                return Err(BillingError::validation(format!(
                    "subscription {} does not belong to client {}",
                    subscription_id, input.client_id
                )));
            }
            if subscription.status == SubscriptionStatus::Cancelled {
                return Err(BillingError::conflict(format!(
                    "subscription {} is cancelled; payments require status pending or active",
                    subscription_id
                )));
            }
        }

        let now = self.clock.now();
        let id = Uuid::new_v4();
        let _guard = self.locks.lock(input.bill_id.unwrap_or(id)).await;

        if let Some(bill_id) = input.bill_id {
            let bill = self.load_bill(input.company_id, bill_id).await?;
            if bill.client_id != input.client_id {
                return Err(BillingError::validation(format!(
                    "bill {} does not belong to client {}",
                    bill.bill_number, input.client_id
                )));
            }
            if bill.status == BillStatus::Cancelled {
                return Err(BillingError::conflict(format!(
                    "bill {} is cancelled; payments require a bill that is not cancelled",
                    bill.bill_number
                )));
            }
        }

        let payment = finalize_payment(
            Payment {
                id,
                company_id: input.company_id,
                client_id: input.client_id,
                bill_id: input.bill_id,
                subscription_id: input.subscription_id,
                amount: round_money(input.amount),
                paid_amount: input.paid_amount,
                balance_amount: Decimal::ZERO,
                status: PaymentStatus::Pending,
                due_date: input.due_date,
                method: input.method,
                reference: input.reference,
                notes: input.notes,
                payment_date: (input.paid_amount > Decimal::ZERO).then_some(now),
                submitted_utc: input.submitted.then_some(now),
                verified_by: None,
                verified_utc: None,
                rejected_by: None,
                rejected_utc: None,
                rejection_reason: None,
                created_by: input.created_by,
                created_utc: now,
                updated_utc: now,
            },
            now.date_naive(),
        );
        self.repos.payments.insert_payment(&payment).await?;

        if let Some(bill_id) = payment.bill_id {
            self.reconcile_locked(payment.company_id, bill_id).await?;
        }

        let company = payment.company_id.to_string();
        record_payment_operation(&company, if input.submitted { "submit" } else { "create" });
        record_payment_amount(&company, payment.paid_amount.to_f64().unwrap_or_default());
        info!(
            payment_id = %payment.id,
            amount = %payment.amount,
            paid_amount = %payment.paid_amount,
            status = payment.status.as_str(),
            "Payment recorded"
        );
        Ok(payment)
    }

    /// A client submits proof of payment; an operator verifies it later.
    pub async fn submit_for_verification(&self, mut input: CreatePayment) -> Result<Payment> {
        if input.bill_id.is_none() && input.subscription_id.is_none() {
            return Err(BillingError::validation(
                "a submitted payment must reference a bill or a subscription",
            ));
        }
        input.paid_amount = Decimal::ZERO;
        input.submitted = true;
        self.create(input).await
    }

    #[instrument(skip(self, input), fields(payment_id = %id))]
    pub async fn update(&self, company_id: Uuid, id: Uuid, input: UpdatePayment) -> Result<Payment> {
        let current = self.get(company_id, id).await?;
        let _guard = self.lock_for(&current).await;
        let mut payment = self.get(company_id, id).await?;
        ensure_open(&payment, "editing")?;

        if let Some(paid) = input.paid_amount {
            if paid < Decimal::ZERO {
                return Err(BillingError::validation("paidAmount must not be negative"));
            }
            payment.paid_amount = paid;
        }
        if let Some(due_date) = input.due_date {
            payment.due_date = Some(due_date);
        }
        if let Some(method) = input.method {
            payment.method = method;
        }
        if let Some(reference) = input.reference {
            payment.reference = Some(reference);
        }
        if let Some(notes) = input.notes {
            payment.notes = Some(notes);
        }

        let payment = self.save_and_fold(payment, "update").await?;
        Ok(payment)
    }

    /// Administrative removal; the bill is re-folded without it.
    #[instrument(skip(self), fields(payment_id = %id))]
    pub async fn delete(&self, company_id: Uuid, id: Uuid) -> Result<()> {
        let current = self.get(company_id, id).await?;
        let _guard = self.lock_for(&current).await;
        if !self.repos.payments.delete_payment(company_id, id).await? {
            return Err(BillingError::not_found("payment", id));
        }
        if let Some(bill_id) = current.bill_id {
            self.reconcile_locked(company_id, bill_id).await?;
        }

        record_payment_operation(&company_id.to_string(), "delete");
        info!(payment_id = %id, "Payment deleted");
        Ok(())
    }

    #[instrument(skip(self), fields(payment_id = %id))]
    pub async fn cancel(&self, company_id: Uuid, id: Uuid) -> Result<Payment> {
        let current = self.get(company_id, id).await?;
        let _guard = self.lock_for(&current).await;
        let mut payment = self.get(company_id, id).await?;
        ensure_open(&payment, "cancellation")?;

        payment.status = PaymentStatus::Cancelled;
        self.save_and_fold(payment, "cancel").await
    }

    /// `pending -> verified`. Issues the subscription invoice if none exists
    /// for this payment yet, then activates a pending subscription.
    ///
    /// The invoice is written before the payment, so a failed invoice leaves
    /// the payment pending and the call can be retried.
    #[instrument(skip(self), fields(payment_id = %id))]
    pub async fn verify(&self, company_id: Uuid, id: Uuid, actor: Uuid) -> Result<Payment> {
        let current = self.get(company_id, id).await?;
        let guard = self.lock_for(&current).await;
        let mut payment = self.get(company_id, id).await?;
        ensure_pending(&payment, "verification")?;

        let now = self.clock.now();
        payment.paid_amount = payment.amount;
        payment.balance_amount = Decimal::ZERO;
        payment.status = PaymentStatus::Verified;
        payment.verified_by = Some(actor);
        payment.verified_utc = Some(now);
        payment.payment_date.get_or_insert(now);

        if let Some(subscription_id) = payment.subscription_id {
            let subscription = self.load_subscription(company_id, subscription_id).await?;
            self.ensure_invoice(&subscription, &payment).await?;
        }

        let payment = self.save_and_fold(payment, "verify").await?;
        drop(guard);

        record_payment_amount(
            &company_id.to_string(),
            payment.paid_amount.to_f64().unwrap_or_default(),
        );

        if let Some(subscription_id) = payment.subscription_id {
            if let Err(e) = self.activate_subscription(company_id, subscription_id, actor).await {
                warn!(
                    subscription_id = %subscription_id,
                    error = %e,
                    "Subscription activation after verification failed"
                );
            }
        }

        let payment_id = payment.id;
        let amount = payment.amount;
        self.notifier
            .notify_client_quietly(company_id, payment.client_id, |recipient| NewNotification {
                company_id,
                recipient_user_id: recipient,
                kind: NotificationKind::PaymentVerified,
                priority: Priority::Medium,
                title: "Payment verified".to_string(),
                message: format!("Your payment of {} has been verified.", amount),
                entity_type: "payment",
                entity_id: payment_id,
                dedup_key: Notifier::dedup_key("payment_verified", payment_id, "once"),
            })
            .await;

        Ok(payment)
    }

    /// `pending -> rejected`. Touches nothing but the payment.
    #[instrument(skip(self, reason), fields(payment_id = %id))]
    pub async fn reject(&self, company_id: Uuid, id: Uuid, actor: Uuid, reason: &str) -> Result<Payment> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(BillingError::validation("rejection reason is required"));
        }
        let current = self.get(company_id, id).await?;
        let guard = self.lock_for(&current).await;
        let mut payment = self.get(company_id, id).await?;
        ensure_pending(&payment, "rejection")?;

        let now = self.clock.now();
        payment.status = PaymentStatus::Rejected;
        payment.rejected_by = Some(actor);
        payment.rejected_utc = Some(now);
        payment.rejection_reason = Some(reason.to_string());
        payment.updated_utc = now;
        self.repos.payments.update_payment(&payment).await?;
        drop(guard);

        record_payment_operation(&company_id.to_string(), "reject");
        info!(payment_id = %id, "Payment rejected");

        let payment_id = payment.id;
        let message = format!("Your payment was rejected: {}", reason);
        self.notifier
            .notify_client_quietly(company_id, payment.client_id, |recipient| NewNotification {
                company_id,
                recipient_user_id: recipient,
                kind: NotificationKind::PaymentRejected,
                priority: Priority::High,
                title: "Payment rejected".to_string(),
                message,
                entity_type: "payment",
                entity_id: payment_id,
                dedup_key: Notifier::dedup_key("payment_rejected", payment_id, "once"),
            })
            .await;

        Ok(payment)
    }

    /// Adds `amount` to what has been paid and re-folds the bill.
    #[instrument(skip(self, partial), fields(payment_id = %id, amount = %partial.amount))]
    pub async fn record_partial(&self, company_id: Uuid, id: Uuid, partial: PartialPayment) -> Result<Payment> {
        if partial.amount <= Decimal::ZERO {
            return Err(BillingError::validation("amountPaid must be greater than 0"));
        }
        let current = self.get(company_id, id).await?;
        let _guard = self.lock_for(&current).await;
        let mut payment = self.get(company_id, id).await?;
        ensure_open(&payment, "recording a partial payment")?;

        payment.paid_amount += partial.amount;
        payment.payment_date = Some(self.clock.now());
        if let Some(method) = partial.method {
            payment.method = method;
        }
        if let Some(reference) = partial.reference {
            payment.reference = Some(reference);
        }
        if let Some(notes) = partial.notes {
            payment.notes = Some(notes);
        }

        let payment = self.save_and_fold(payment, "partial").await?;
        record_payment_amount(
            &company_id.to_string(),
            partial.amount.to_f64().unwrap_or_default(),
        );
        Ok(payment)
    }

    /// Records a payment for the bill's outstanding balance, already verified.
    #[instrument(skip(self, method, reference), fields(bill_id = %bill_id))]
    pub async fn mark_bill_paid(
        &self,
        company_id: Uuid,
        bill_id: Uuid,
        actor: Uuid,
        method: PaymentMethod,
        reference: Option<String>,
    ) -> Result<Bill> {
        let _guard = self.locks.lock(bill_id).await;
        let bill = self.load_bill(company_id, bill_id).await?;
        if bill.status.is_terminal() {
            return Err(BillingError::conflict(format!(
                "bill {} is {}; marking paid requires a bill that is not paid or cancelled",
                bill.bill_number,
                bill.status.as_str()
            )));
        }

        let now = self.clock.now();
        let balance = bill.balance_amount;
        if balance > Decimal::ZERO {
            let payment = Payment {
                id: Uuid::new_v4(),
                company_id,
                client_id: bill.client_id,
                bill_id: Some(bill_id),
                subscription_id: None,
                amount: balance,
                paid_amount: balance,
                balance_amount: Decimal::ZERO,
                status: PaymentStatus::Verified,
                due_date: Some(bill.due_date),
                method,
                reference,
                notes: Some(format!("Settlement of {}", bill.bill_number)),
                payment_date: Some(now),
                submitted_utc: None,
                verified_by: Some(actor),
                verified_utc: Some(now),
                rejected_by: None,
                rejected_utc: None,
                rejection_reason: None,
                created_by: actor,
                created_utc: now,
                updated_utc: now,
            };
            self.repos.payments.insert_payment(&payment).await?;
            record_payment_amount(&company_id.to_string(), balance.to_f64().unwrap_or_default());
        }

        let bill = self.reconcile_locked(company_id, bill_id).await?;
        record_payment_operation(&company_id.to_string(), "mark_bill_paid");
        info!(bill_id = %bill_id, settled = %balance, "Bill marked paid");
        Ok(bill)
    }

    pub async fn pending_verification(&self, company_id: Uuid) -> Result<Vec<Payment>> {
        let filter = ListPaymentsFilter {
            status: Some(PaymentStatus::Pending),
            ..Default::default()
        };
        let mut payments = self.repos.payments.list_payments(company_id, &filter).await?;
        payments.retain(|p| p.submitted_utc.is_some());
        Ok(payments)
    }

    pub async fn stats(&self, company_id: Uuid) -> Result<PaymentStats> {
        let payments = self
            .repos
            .payments
            .list_payments(company_id, &ListPaymentsFilter::default())
            .await?;
        Ok(compute_stats(&payments))
    }

    /// A client's payments, newest first.
    pub async fn history(&self, company_id: Uuid, client_id: Uuid) -> Result<Vec<Payment>> {
        let filter = ListPaymentsFilter {
            client_id: Some(client_id),
            ..Default::default()
        };
        let mut payments = self.repos.payments.list_payments(company_id, &filter).await?;
        payments.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(payments)
    }

    pub async fn overdue(&self, company_id: Uuid, client_id: Option<Uuid>) -> Result<Vec<Payment>> {
        let filter = ListPaymentsFilter {
            client_id,
            status: Some(PaymentStatus::Overdue),
            ..Default::default()
        };
        self.repos.payments.list_payments(company_id, &filter).await
    }

    pub async fn get_invoice(&self, company_id: Uuid, id: Uuid) -> Result<Invoice> {
        self.repos
            .invoices
            .get_invoice(company_id, id)
            .await?
            .ok_or_else(|| BillingError::not_found("invoice", id))
    }

    pub async fn list_invoices(&self, company_id: Uuid, client_id: Option<Uuid>) -> Result<Vec<Invoice>> {
        self.repos.invoices.list_invoices(company_id, client_id).await
    }

    /// Caller holds the payment's lock.
    async fn save_and_fold(&self, payment: Payment, operation: &str) -> Result<Payment> {
        let now = self.clock.now();
        let mut payment = finalize_payment(payment, now.date_naive());
        payment.updated_utc = now;
        self.repos.payments.update_payment(&payment).await?;

        if let Some(bill_id) = payment.bill_id {
            self.reconcile_locked(payment.company_id, bill_id).await?;
        }

        record_payment_operation(&payment.company_id.to_string(), operation);
        info!(
            payment_id = %payment.id,
            status = payment.status.as_str(),
            paid_amount = %payment.paid_amount,
            operation = operation,
            "Payment saved"
        );
        Ok(payment)
    }

    /// Activates a subscription that is still pending. Re-reads under the
    /// subscription's lock so a concurrent cancel is never overwritten.
    async fn activate_subscription(&self, company_id: Uuid, id: Uuid, actor: Uuid) -> Result<()> {
        let _guard = self.locks.lock(id).await;
        let mut subscription = self.load_subscription(company_id, id).await?;
        if subscription.status != SubscriptionStatus::Pending {
            return Ok(());
        }
        subscription.activate(actor, self.clock.now())?;
        self.repos
            .subscriptions
            .update_subscription(&subscription)
            .await?;
        info!(subscription_id = %id, "Subscription activated by payment");
        Ok(())
    }

    async fn ensure_invoice(&self, subscription: &Subscription, payment: &Payment) -> Result<()> {
        if self
            .repos
            .invoices
            .find_by_subscription_payment(subscription.id, payment.id)
            .await?
            .is_some()
        {
            return Ok(());
        }

        let now = self.clock.now();
        let prefix = invoice_number_prefix(subscription.company_id, now);
        let sequence = self.repos.invoices.next_invoice_sequence(&prefix).await?;
        let invoice = Invoice {
            id: Uuid::new_v4(),
            company_id: subscription.company_id,
            client_id: subscription.client_id,
            subscription_id: subscription.id,
            payment_id: payment.id,
            invoice_number: format!("{}-{:04}", prefix, sequence),
            plan_name: subscription.plan_snapshot.name.clone(),
            billing_cycle: subscription.billing_cycle,
            subtotal: subscription.subtotal,
            tax_amount: subscription.tax_amount,
            total_amount: subscription.total_amount,
            amount_paid: payment.paid_amount,
            period_start: subscription.start_date,
            period_end: subscription.end_date,
            issued_utc: now,
        };

        if let Err(e) = self.repos.invoices.insert_invoice(&invoice).await {
            // A concurrent verify of the same pair may have won the unique index.
            if self
                .repos
                .invoices
                .find_by_subscription_payment(subscription.id, payment.id)
                .await?
                .is_some()
            {
                return Ok(());
            }
            warn!(payment_id = %payment.id, error = %e, "Invoice creation failed");
            return Err(e);
        }

        info!(
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            "Invoice issued"
        );
        Ok(())
    }
}
