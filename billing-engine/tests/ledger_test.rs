//! Payment ledger integration tests.

mod common;

use async_trait::async_trait;
use billing_engine::clock::FixedClock;
use billing_engine::error::{BillingError, Result};
use billing_engine::models::{
    BillStatus, BillingCycle, Client, CreatePayment, CreateSubscription, Invoice,
    ListPaymentsFilter, NotificationKind, PaymentMethod, PaymentStatus, Plan, Subscription,
    SubscriptionStatus,
};
use billing_engine::services::ledger::PartialPayment;
use billing_engine::services::repository::InvoiceRepository;
use billing_engine::services::{MemoryStore, Repositories};
use common::{date, dec, Harness};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Invoice store whose inserts fail while `down` is set.
struct FailingInvoices {
    inner: Arc<MemoryStore>,
    down: AtomicBool,
}

#[async_trait]
impl InvoiceRepository for FailingInvoices {
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(BillingError::Storage(anyhow::anyhow!("invoice table locked")));
        }
        self.inner.insert_invoice(invoice).await
    }

    async fn get_invoice(&self, company_id: Uuid, id: Uuid) -> Result<Option<Invoice>> {
        self.inner.get_invoice(company_id, id).await
    }

    async fn list_invoices(&self, company_id: Uuid, client_id: Option<Uuid>) -> Result<Vec<Invoice>> {
        self.inner.list_invoices(company_id, client_id).await
    }

    async fn find_by_subscription_payment(
        &self,
        subscription_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Option<Invoice>> {
        self.inner
            .find_by_subscription_payment(subscription_id, payment_id)
            .await
    }

    async fn next_invoice_sequence(&self, prefix: &str) -> Result<u64> {
        self.inner.next_invoice_sequence(prefix).await
    }
}

fn payment(h: &Harness, client_id: Uuid, bill_id: Option<Uuid>, amount: &str) -> CreatePayment {
    CreatePayment {
        company_id: h.company_id,
        client_id,
        bill_id,
        subscription_id: None,
        amount: dec(amount),
        paid_amount: Decimal::ZERO,
        due_date: None,
        method: PaymentMethod::BankTransfer,
        reference: None,
        notes: None,
        submitted: false,
        created_by: h.operator_id,
    }
}

async fn starter_plan(h: &Harness) -> Plan {
    let hosting = h.service("Hosting", "1000", &[BillingCycle::Monthly]).await;
    h.plan("Starter", &[&hosting]).await
}

/// A pending monthly subscription to `plan`.
async fn subscribe(h: &Harness, client: &Client, plan: &Plan) -> Subscription {
    h.state
        .subscriptions
        .create(CreateSubscription {
            company_id: h.company_id,
            client_id: client.id,
            plan_id: plan.id,
            add_ons: vec![],
            billing_cycle: BillingCycle::Monthly,
            discount: Decimal::ZERO,
            start_date: None,
            end_date: None,
            created_by: h.operator_id,
        })
        .await
        .unwrap()
}

/// A client's proof of payment for `subscription`.
fn submission_for(h: &Harness, client: &Client, subscription: &Subscription) -> CreatePayment {
    let mut submission = payment(h, client.id, None, "1180");
    submission.subscription_id = Some(subscription.id);
    submission.created_by = client.user_id;
    submission
}

fn partial(amount: &str) -> PartialPayment {
    PartialPayment {
        amount: dec(amount),
        ..Default::default()
    }
}

#[tokio::test]
async fn partial_payment_settles_the_bill() {
    let h = Harness::new(date(2024, 3, 1));
    let client = h.client().await;
    let bill = h.simple_bill(client.id, "1000", date(2024, 3, 31)).await;

    let recorded = h
        .state
        .ledger
        .create(payment(&h, client.id, Some(bill.id), "1000"))
        .await
        .unwrap();
    assert_eq!(recorded.status, PaymentStatus::Pending);
    assert_eq!(recorded.due_date, None);

    let paid = h
        .state
        .ledger
        .record_partial(h.company_id, recorded.id, partial("1000"))
        .await
        .unwrap();
    assert_eq!(paid.status, PaymentStatus::Paid);
    assert_eq!(paid.balance_amount, Decimal::ZERO);

    let bill = h.state.bills.get(h.company_id, bill.id).await.unwrap();
    assert_eq!(bill.status, BillStatus::Paid);
    assert_eq!(bill.paid_amount, dec("1000"));
    assert_eq!(bill.balance_amount, Decimal::ZERO);
    assert!(bill.paid_utc.is_some());
}

#[tokio::test]
async fn partial_amounts_accumulate() {
    let h = Harness::new(date(2024, 3, 1));
    let client = h.client().await;
    let bill = h.simple_bill(client.id, "1000", date(2024, 3, 31)).await;
    let recorded = h
        .state
        .ledger
        .create(payment(&h, client.id, Some(bill.id), "1000"))
        .await
        .unwrap();

    h.state
        .ledger
        .record_partial(h.company_id, recorded.id, partial("250"))
        .await
        .unwrap();
    let second = h
        .state
        .ledger
        .record_partial(h.company_id, recorded.id, partial("250"))
        .await
        .unwrap();
    assert_eq!(second.status, PaymentStatus::Partial);
    assert_eq!(second.paid_amount, dec("500"));

    let bill = h.state.bills.get(h.company_id, bill.id).await.unwrap();
    assert_eq!(bill.status, BillStatus::Partial);
    assert_eq!(bill.balance_amount, dec("500"));

    let err = h
        .state
        .ledger
        .record_partial(h.company_id, recorded.id, partial("0"))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Validation(_)));
}

#[tokio::test]
async fn payment_for_another_clients_bill_is_rejected() {
    let h = Harness::new(date(2024, 3, 1));
    let owner = h.client().await;
    let stranger = h.client().await;
    let bill = h.simple_bill(owner.id, "100", date(2024, 3, 31)).await;

    let err = h
        .state
        .ledger
        .create(payment(&h, stranger.id, Some(bill.id), "100"))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Validation(_)));
}

#[tokio::test]
async fn reconciling_twice_changes_nothing() {
    let h = Harness::new(date(2024, 3, 1));
    let client = h.client().await;
    let bill = h.simple_bill(client.id, "400", date(2024, 3, 31)).await;
    let recorded = h
        .state
        .ledger
        .create(payment(&h, client.id, Some(bill.id), "400"))
        .await
        .unwrap();
    h.state
        .ledger
        .record_partial(h.company_id, recorded.id, partial("150"))
        .await
        .unwrap();

    let first = h.state.ledger.reconcile_bill(h.company_id, bill.id).await.unwrap();
    h.clock.advance(chrono::Duration::hours(2));
    let second = h.state.ledger.reconcile_bill(h.company_id, bill.id).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(second.paid_amount, dec("150"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_payments_on_one_bill_are_both_counted() {
    let h = Harness::new(date(2024, 3, 1));
    let client = h.client().await;
    let bill = h.simple_bill(client.id, "1000", date(2024, 3, 31)).await;

    let first = h
        .state
        .ledger
        .create(payment(&h, client.id, Some(bill.id), "500"))
        .await
        .unwrap();
    let second = h
        .state
        .ledger
        .create(payment(&h, client.id, Some(bill.id), "500"))
        .await
        .unwrap();

    for _ in 0..10 {
        let tasks: Vec<_> = [first.id, second.id]
            .into_iter()
            .map(|id| {
                let ledger = h.state.ledger.clone();
                let company_id = h.company_id;
                tokio::spawn(async move {
                    ledger
                        .record_partial(company_id, id, partial("10"))
                        .await
                        .unwrap()
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
    }

    let bill = h.state.bills.get(h.company_id, bill.id).await.unwrap();
    assert_eq!(bill.paid_amount, dec("200"));
    assert_eq!(bill.balance_amount, dec("800"));
    assert_eq!(bill.status, BillStatus::Partial);
}

#[tokio::test]
async fn verification_activates_the_subscription_and_issues_one_invoice() {
    let h = Harness::new(date(2024, 3, 1));
    let client = h.client().await;
    let hosting = h.service("Hosting", "1000", &[BillingCycle::Monthly]).await;
    let plan = h.plan("Starter", &[&hosting]).await;
    let subscription = h
        .state
        .subscriptions
        .create(CreateSubscription {
            company_id: h.company_id,
            client_id: client.id,
            plan_id: plan.id,
            add_ons: vec![],
            billing_cycle: BillingCycle::Monthly,
            discount: Decimal::ZERO,
            start_date: None,
            end_date: None,
            created_by: h.operator_id,
        })
        .await
        .unwrap();

    let mut submission = payment(&h, client.id, None, "1180");
    submission.subscription_id = Some(subscription.id);
    submission.created_by = client.user_id;
    let submitted = h
        .state
        .ledger
        .submit_for_verification(submission)
        .await
        .unwrap();
    assert!(submitted.submitted_utc.is_some());

    let pending = h.state.ledger.pending_verification(h.company_id).await.unwrap();
    assert_eq!(pending.len(), 1);

    let verified = h
        .state
        .ledger
        .verify(h.company_id, submitted.id, h.operator_id)
        .await
        .unwrap();
    assert_eq!(verified.status, PaymentStatus::Verified);
    assert_eq!(verified.paid_amount, dec("1180"));
    assert_eq!(verified.verified_by, Some(h.operator_id));

    let again = h
        .state
        .ledger
        .verify(h.company_id, submitted.id, h.operator_id)
        .await
        .unwrap_err();
    assert!(matches!(again, BillingError::StateConflict(_)));

    let subscription = h
        .state
        .subscriptions
        .get(h.company_id, subscription.id)
        .await
        .unwrap();
    assert_eq!(subscription.status, SubscriptionStatus::Active);

    let invoices = h
        .state
        .ledger
        .list_invoices(h.company_id, Some(client.id))
        .await
        .unwrap();
    assert_eq!(invoices.len(), 1);
    assert!(invoices[0].invoice_number.starts_with("INV-"));
    assert_eq!(invoices[0].payment_id, submitted.id);
    assert_eq!(invoices[0].total_amount, subscription.total_amount);

    let fetched = h
        .state
        .ledger
        .get_invoice(h.company_id, invoices[0].id)
        .await
        .unwrap();
    assert_eq!(fetched, invoices[0]);

    let notices: Vec<_> = h
        .store
        .all_notifications()
        .into_iter()
        .filter(|n| n.kind == NotificationKind::PaymentVerified)
        .collect();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].recipient_user_id, client.user_id);
}

#[tokio::test]
async fn submissions_must_reference_something() {
    let h = Harness::new(date(2024, 3, 1));
    let client = h.client().await;

    let err = h
        .state
        .ledger
        .submit_for_verification(payment(&h, client.id, None, "50"))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Validation(_)));
}

#[tokio::test]
async fn rejection_needs_a_reason_and_leaves_the_bill_alone() {
    let h = Harness::new(date(2024, 3, 1));
    let client = h.client().await;
    let bill = h.simple_bill(client.id, "300", date(2024, 3, 31)).await;
    let mut submission = payment(&h, client.id, Some(bill.id), "300");
    submission.submitted = true;
    let submitted = h.state.ledger.create(submission).await.unwrap();

    let blank = h
        .state
        .ledger
        .reject(h.company_id, submitted.id, h.operator_id, "   ")
        .await
        .unwrap_err();
    assert!(matches!(blank, BillingError::Validation(_)));

    let rejected = h
        .state
        .ledger
        .reject(h.company_id, submitted.id, h.operator_id, "reference not found")
        .await
        .unwrap();
    assert_eq!(rejected.status, PaymentStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("reference not found"));

    let bill = h.state.bills.get(h.company_id, bill.id).await.unwrap();
    assert_eq!(bill.paid_amount, Decimal::ZERO);
    assert_eq!(bill.status, BillStatus::Draft);

    let verify = h
        .state
        .ledger
        .verify(h.company_id, submitted.id, h.operator_id)
        .await
        .unwrap_err();
    assert!(matches!(verify, BillingError::StateConflict(_)));

    assert!(h
        .store
        .all_notifications()
        .iter()
        .any(|n| n.kind == NotificationKind::PaymentRejected));
}

#[tokio::test]
async fn mark_paid_settles_the_remaining_balance() {
    let h = Harness::new(date(2024, 3, 1));
    let client = h.client().await;
    let bill = h.simple_bill(client.id, "500", date(2024, 3, 31)).await;
    let recorded = h
        .state
        .ledger
        .create(payment(&h, client.id, Some(bill.id), "200"))
        .await
        .unwrap();
    h.state
        .ledger
        .record_partial(h.company_id, recorded.id, partial("200"))
        .await
        .unwrap();

    let settled = h
        .state
        .ledger
        .mark_bill_paid(
            h.company_id,
            bill.id,
            h.operator_id,
            PaymentMethod::Cash,
            Some("receipt 42".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(settled.status, BillStatus::Paid);
    assert_eq!(settled.paid_amount, dec("500"));

    let payments = h
        .state
        .ledger
        .list(
            h.company_id,
            &ListPaymentsFilter {
                bill_id: Some(bill.id),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(payments.len(), 2);
    let settlement = payments
        .iter()
        .find(|p| p.status == PaymentStatus::Verified)
        .unwrap();
    assert_eq!(settlement.amount, dec("300"));
    assert_eq!(settlement.method, PaymentMethod::Cash);

    let twice = h
        .state
        .ledger
        .mark_bill_paid(h.company_id, bill.id, h.operator_id, PaymentMethod::Cash, None)
        .await
        .unwrap_err();
    assert!(matches!(twice, BillingError::StateConflict(_)));
}

#[tokio::test]
async fn cancelling_a_payment_removes_it_from_the_bill() {
    let h = Harness::new(date(2024, 3, 1));
    let client = h.client().await;
    let bill = h.simple_bill(client.id, "500", date(2024, 3, 31)).await;
    let recorded = h
        .state
        .ledger
        .create(payment(&h, client.id, Some(bill.id), "500"))
        .await
        .unwrap();
    h.state
        .ledger
        .record_partial(h.company_id, recorded.id, partial("100"))
        .await
        .unwrap();

    let cancelled = h.state.ledger.cancel(h.company_id, recorded.id).await.unwrap();
    assert_eq!(cancelled.status, PaymentStatus::Cancelled);

    let bill = h.state.bills.get(h.company_id, bill.id).await.unwrap();
    assert_eq!(bill.paid_amount, Decimal::ZERO);
    assert_eq!(bill.status, BillStatus::Draft);
}

#[tokio::test]
async fn stats_summarise_the_company_ledger() {
    let h = Harness::new(date(2024, 3, 1));
    let client = h.client().await;
    let bill = h.simple_bill(client.id, "1000", date(2024, 3, 31)).await;

    let open = h
        .state
        .ledger
        .create(payment(&h, client.id, Some(bill.id), "600"))
        .await
        .unwrap();
    h.state
        .ledger
        .record_partial(h.company_id, open.id, partial("100"))
        .await
        .unwrap();
    let mut submission = payment(&h, client.id, Some(bill.id), "400");
    submission.submitted = true;
    h.state.ledger.create(submission).await.unwrap();

    let stats = h.state.ledger.stats(h.company_id).await.unwrap();
    assert_eq!(stats.total_payments, 2);
    assert_eq!(stats.total_received, dec("100"));
    assert_eq!(stats.total_outstanding, dec("900"));
    assert_eq!(stats.pending_verification, 1);
    let partial_bucket = stats
        .by_status
        .iter()
        .find(|b| b.status == PaymentStatus::Partial)
        .unwrap();
    assert_eq!(partial_bucket.count, 1);
}

#[tokio::test]
async fn history_is_newest_first() {
    let h = Harness::new(date(2024, 3, 1));
    let client = h.client().await;
    let bill = h.simple_bill(client.id, "1000", date(2024, 3, 31)).await;

    let older = h
        .state
        .ledger
        .create(payment(&h, client.id, Some(bill.id), "100"))
        .await
        .unwrap();
    h.clock.advance(chrono::Duration::minutes(5));
    let newer = h
        .state
        .ledger
        .create(payment(&h, client.id, Some(bill.id), "200"))
        .await
        .unwrap();

    let history = h.state.ledger.history(h.company_id, client.id).await.unwrap();
    assert_eq!(
        history.iter().map(|p| p.id).collect::<Vec<_>>(),
        vec![newer.id, older.id]
    );
}

#[tokio::test]
async fn submission_against_an_overdue_bill_can_be_verified() {
    let h = Harness::new(date(2024, 1, 20));
    let client = h.client().await;
    let bill = h.simple_bill(client.id, "400", date(2024, 1, 10)).await;
    assert_eq!(bill.status, BillStatus::Overdue);

    let mut submission = payment(&h, client.id, Some(bill.id), "400");
    submission.created_by = client.user_id;
    let submitted = h
        .state
        .ledger
        .submit_for_verification(submission)
        .await
        .unwrap();
    assert_eq!(submitted.status, PaymentStatus::Pending);
    assert_eq!(submitted.due_date, None);

    let pending = h.state.ledger.pending_verification(h.company_id).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, submitted.id);

    // The overdue pass must not pull the submission out of the queue.
    h.state.sweeps().run_overdue(date(2024, 1, 21)).await.unwrap();
    let still_pending = h.state.ledger.get(h.company_id, submitted.id).await.unwrap();
    assert_eq!(still_pending.status, PaymentStatus::Pending);

    let verified = h
        .state
        .ledger
        .verify(h.company_id, submitted.id, h.operator_id)
        .await
        .unwrap();
    assert_eq!(verified.status, PaymentStatus::Verified);

    let bill = h.state.bills.get(h.company_id, bill.id).await.unwrap();
    assert_eq!(bill.status, BillStatus::Paid);
    assert_eq!(bill.balance_amount, Decimal::ZERO);
}

#[tokio::test]
async fn failed_invoice_leaves_the_payment_pending_for_retry() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(FixedClock::at_date(date(2024, 3, 1)));
    let invoices = Arc::new(FailingInvoices {
        inner: store.clone(),
        down: AtomicBool::new(true),
    });
    let mut repos = Repositories::from_store(store.clone());
    repos.invoices = invoices.clone();
    let h = Harness::with_repos(repos, store, clock);

    let client = h.client().await;
    let plan = starter_plan(&h).await;
    let subscription = subscribe(&h, &client, &plan).await;
    let submitted = h
        .state
        .ledger
        .submit_for_verification(submission_for(&h, &client, &subscription))
        .await
        .unwrap();

    let err = h
        .state
        .ledger
        .verify(h.company_id, submitted.id, h.operator_id)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Storage(_)));

    let untouched = h.state.ledger.get(h.company_id, submitted.id).await.unwrap();
    assert_eq!(untouched.status, PaymentStatus::Pending);
    assert_eq!(untouched.paid_amount, Decimal::ZERO);
    let subscription_now = h
        .state
        .subscriptions
        .get(h.company_id, subscription.id)
        .await
        .unwrap();
    assert_eq!(subscription_now.status, SubscriptionStatus::Pending);

    invoices.down.store(false, Ordering::SeqCst);
    let verified = h
        .state
        .ledger
        .verify(h.company_id, submitted.id, h.operator_id)
        .await
        .unwrap();
    assert_eq!(verified.status, PaymentStatus::Verified);

    let issued = h
        .state
        .ledger
        .list_invoices(h.company_id, Some(client.id))
        .await
        .unwrap();
    assert_eq!(issued.len(), 1);
    assert_eq!(issued[0].payment_id, submitted.id);
    let subscription_now = h
        .state
        .subscriptions
        .get(h.company_id, subscription.id)
        .await
        .unwrap();
    assert_eq!(subscription_now.status, SubscriptionStatus::Active);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn verification_racing_a_cancel_never_reactivates() {
    let h = Harness::new(date(2024, 3, 1));
    let client = h.client().await;
    let plan = starter_plan(&h).await;

    for _ in 0..25 {
        let subscription = subscribe(&h, &client, &plan).await;
        let submitted = h
            .state
            .ledger
            .submit_for_verification(submission_for(&h, &client, &subscription))
            .await
            .unwrap();

        let (company_id, operator_id) = (h.company_id, h.operator_id);
        let (payment_id, subscription_id) = (submitted.id, subscription.id);
        let verify = {
            let ledger = h.state.ledger.clone();
            tokio::spawn(async move { ledger.verify(company_id, payment_id, operator_id).await })
        };
        let cancel = {
            let subscriptions = h.state.subscriptions.clone();
            tokio::spawn(async move {
                subscriptions
                    .cancel(company_id, subscription_id, operator_id, "client churned")
                    .await
            })
        };
        verify.await.unwrap().unwrap();
        cancel.await.unwrap().unwrap();

        let stored = h
            .state
            .subscriptions
            .get(h.company_id, subscription.id)
            .await
            .unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Cancelled);
    }
}
