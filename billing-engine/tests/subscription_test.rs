//! Subscription lifecycle integration tests.

mod common;

use billing_engine::error::BillingError;
use billing_engine::models::{
    AddOn, BillingCycle, CreateSubscription, ListSubscriptionsFilter, SubscriptionStatus,
    UpdateService,
};
use common::{date, dec, Harness};
use uuid::Uuid;

fn request(h: &Harness, client_id: Uuid, plan_id: Uuid, cycle: BillingCycle) -> CreateSubscription {
    CreateSubscription {
        company_id: h.company_id,
        client_id,
        plan_id,
        add_ons: vec![],
        billing_cycle: cycle,
        discount: dec("0"),
        start_date: None,
        end_date: None,
        created_by: h.operator_id,
    }
}

#[tokio::test]
async fn monthly_subscription_ends_one_month_after_start() {
    let h = Harness::new(date(2024, 1, 10));
    let client = h.client().await;
    let hosting = h
        .service("Hosting", "1000", &[BillingCycle::Monthly, BillingCycle::Yearly])
        .await;
    let plan = h.plan("Starter", &[&hosting]).await;

    let mut req = request(&h, client.id, plan.id, BillingCycle::Monthly);
    req.start_date = Some(date(2024, 1, 15));
    let subscription = h.state.subscriptions.create(req).await.unwrap();

    assert_eq!(subscription.start_date, date(2024, 1, 15));
    assert_eq!(subscription.end_date, Some(date(2024, 2, 15)));
    assert_eq!(subscription.next_billing_date, Some(date(2024, 2, 15)));
    assert_eq!(subscription.status, SubscriptionStatus::Pending);
    assert_eq!(subscription.created_by, h.operator_id);
}

#[tokio::test]
async fn amounts_include_add_ons_discount_and_tax() {
    let h = Harness::new(date(2024, 1, 10));
    let client = h.client().await;
    let hosting = h.service("Hosting", "1000", &[BillingCycle::Monthly]).await;
    let plan = h.plan("Starter", &[&hosting]).await;

    let mut req = request(&h, client.id, plan.id, BillingCycle::Monthly);
    req.add_ons = vec![
        AddOn {
            name: "Backups".to_string(),
            price: dec("200"),
            is_active: true,
        },
        AddOn {
            name: "Legacy".to_string(),
            price: dec("999"),
            is_active: false,
        },
    ];
    req.discount = dec("100");
    let subscription = h.state.subscriptions.create(req).await.unwrap();

    assert_eq!(subscription.plan_amount, dec("1000"));
    assert_eq!(subscription.add_ons_amount, dec("200"));
    assert_eq!(subscription.subtotal, dec("1100"));
    assert_eq!(subscription.tax_amount, dec("198"));
    assert_eq!(subscription.total_amount, dec("1298"));
}

#[tokio::test]
async fn cycle_outside_the_plan_is_rejected_naming_allowed_cycles() {
    let h = Harness::new(date(2024, 1, 10));
    let client = h.client().await;
    let hosting = h
        .service("Hosting", "600", &[BillingCycle::Monthly, BillingCycle::Yearly])
        .await;
    let support = h
        .service("Support", "400", &[BillingCycle::Monthly, BillingCycle::Quarterly])
        .await;
    let plan = h.plan("Starter", &[&hosting, &support]).await;

    let err = h
        .state
        .subscriptions
        .create(request(&h, client.id, plan.id, BillingCycle::Yearly))
        .await
        .unwrap_err();

    match err {
        BillingError::StateConflict(msg) => assert!(msg.contains("monthly"), "{}", msg),
        other => panic!("expected a state conflict, got {:?}", other),
    }
}

#[tokio::test]
async fn inactive_plans_cannot_be_subscribed() {
    let h = Harness::new(date(2024, 1, 10));
    let client = h.client().await;
    let hosting = h.service("Hosting", "600", &[BillingCycle::Monthly]).await;
    let plan = h.plan("Starter", &[&hosting]).await;
    h.state
        .catalog
        .set_plan_active(h.company_id, plan.id, false)
        .await
        .unwrap();

    let err = h
        .state
        .subscriptions
        .create(request(&h, client.id, plan.id, BillingCycle::Monthly))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::StateConflict(_)));
}

#[tokio::test]
async fn plan_snapshot_survives_later_catalog_edits() {
    let h = Harness::new(date(2024, 1, 10));
    let client = h.client().await;
    let hosting = h.service("Hosting", "600", &[BillingCycle::Monthly]).await;
    let plan = h.plan("Starter", &[&hosting]).await;
    let subscription = h
        .state
        .subscriptions
        .create(request(&h, client.id, plan.id, BillingCycle::Monthly))
        .await
        .unwrap();

    h.state
        .catalog
        .update_service(
            h.company_id,
            hosting.id,
            UpdateService {
                base_price: Some(dec("5000")),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    h.state
        .catalog
        .update_service_price(h.company_id, plan.id, hosting.id, Some(dec("50")))
        .await
        .unwrap();

    let stored = h
        .state
        .subscriptions
        .get(h.company_id, subscription.id)
        .await
        .unwrap();
    assert_eq!(stored.plan_snapshot.price, dec("600"));
    assert_eq!(stored.plan_amount, dec("600"));
}

#[tokio::test]
async fn lifecycle_runs_pending_active_cancelled() {
    let h = Harness::new(date(2024, 1, 10));
    let client = h.client().await;
    let hosting = h.service("Hosting", "600", &[BillingCycle::Monthly]).await;
    let plan = h.plan("Starter", &[&hosting]).await;
    let subscription = h
        .state
        .subscriptions
        .create(request(&h, client.id, plan.id, BillingCycle::Monthly))
        .await
        .unwrap();

    let active = h
        .state
        .subscriptions
        .activate(h.company_id, subscription.id, h.operator_id)
        .await
        .unwrap();
    assert_eq!(active.status, SubscriptionStatus::Active);

    let again = h
        .state
        .subscriptions
        .activate(h.company_id, subscription.id, h.operator_id)
        .await
        .unwrap_err();
    assert!(matches!(again, BillingError::StateConflict(_)));

    let blank = h
        .state
        .subscriptions
        .cancel(h.company_id, subscription.id, h.operator_id, "  ")
        .await
        .unwrap_err();
    assert!(matches!(blank, BillingError::Validation(_)));

    let cancelled = h
        .state
        .subscriptions
        .cancel(h.company_id, subscription.id, h.operator_id, "moved to annual billing")
        .await
        .unwrap();
    assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
    assert_eq!(
        cancelled.cancellation_reason.as_deref(),
        Some("moved to annual billing")
    );

    let reactivate = h
        .state
        .subscriptions
        .activate(h.company_id, subscription.id, h.operator_id)
        .await
        .unwrap_err();
    assert!(matches!(reactivate, BillingError::StateConflict(_)));
}

#[tokio::test]
async fn listing_filters_by_client_and_status() {
    let h = Harness::new(date(2024, 1, 10));
    let alice = h.client().await;
    let bob = h.client().await;
    let hosting = h.service("Hosting", "600", &[BillingCycle::Monthly]).await;
    let plan = h.plan("Starter", &[&hosting]).await;

    for client in [&alice, &alice, &bob] {
        h.state
            .subscriptions
            .create(request(&h, client.id, plan.id, BillingCycle::Monthly))
            .await
            .unwrap();
    }

    let alices = h
        .state
        .subscriptions
        .list(
            h.company_id,
            &ListSubscriptionsFilter {
                client_id: Some(alice.id),
                status: Some(SubscriptionStatus::Pending),
            },
        )
        .await
        .unwrap();
    assert_eq!(alices.len(), 2);
    assert!(alices.iter().all(|s| s.client_id == alice.id));
}
