//! Plan pricing and catalog integration tests.

mod common;

use billing_engine::error::BillingError;
use billing_engine::models::{BillingCycle, Discount, UpdatePlan, UpdateService};
use common::{date, dec, Harness};
use std::collections::BTreeSet;

fn cycles(list: &[BillingCycle]) -> BTreeSet<BillingCycle> {
    list.iter().copied().collect()
}

#[tokio::test]
async fn plan_cycles_are_the_intersection_of_its_services() {
    let h = Harness::new(date(2024, 1, 10));
    let hosting = h
        .service("Hosting", "600", &[BillingCycle::Monthly, BillingCycle::Yearly])
        .await;
    let support = h
        .service("Support", "400", &[BillingCycle::Monthly, BillingCycle::Quarterly])
        .await;

    let plan = h.plan("Starter", &[&hosting, &support]).await;

    assert_eq!(plan.allowed_cycles, cycles(&[BillingCycle::Monthly]));
    assert_eq!(plan.auto_price, dec("1000"));
    assert_eq!(plan.final_price, dec("1000"));
}

#[tokio::test]
async fn removing_the_only_yearly_service_drops_yearly() {
    let h = Harness::new(date(2024, 1, 10));
    let hosting = h
        .service("Hosting", "600", &[BillingCycle::Monthly, BillingCycle::Yearly])
        .await;
    let support = h
        .service("Support", "400", &[BillingCycle::Monthly, BillingCycle::Quarterly])
        .await;
    let plan = h.plan("Starter", &[&hosting, &support]).await;

    let plan = h
        .state
        .catalog
        .remove_service(h.company_id, plan.id, support.id)
        .await
        .unwrap();
    assert_eq!(
        plan.allowed_cycles,
        cycles(&[BillingCycle::Monthly, BillingCycle::Yearly])
    );
    assert_eq!(plan.auto_price, dec("600"));

    let plan = h
        .state
        .catalog
        .remove_service(h.company_id, plan.id, hosting.id)
        .await
        .unwrap();
    assert!(!plan.allowed_cycles.contains(&BillingCycle::Yearly));
    assert!(plan.allowed_cycles.is_empty());
    assert_eq!(plan.final_price, dec("0"));
}

#[tokio::test]
async fn adding_an_included_service_is_rejected() {
    let h = Harness::new(date(2024, 1, 10));
    let hosting = h.service("Hosting", "600", &[BillingCycle::Monthly]).await;
    let plan = h.plan("Starter", &[&hosting]).await;

    let err = h
        .state
        .catalog
        .add_services(h.company_id, plan.id, &[hosting.id], &[])
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Validation(_)));
}

#[tokio::test]
async fn removing_an_absent_service_is_not_found() {
    let h = Harness::new(date(2024, 1, 10));
    let hosting = h.service("Hosting", "600", &[BillingCycle::Monthly]).await;
    let support = h.service("Support", "400", &[BillingCycle::Monthly]).await;
    let plan = h.plan("Starter", &[&hosting]).await;

    let err = h
        .state
        .catalog
        .remove_service(h.company_id, plan.id, support.id)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::NotFound { .. }));
}

#[tokio::test]
async fn inactive_services_cannot_join_a_plan() {
    let h = Harness::new(date(2024, 1, 10));
    let hosting = h.service("Hosting", "600", &[BillingCycle::Monthly]).await;
    h.state
        .catalog
        .set_service_active(h.company_id, hosting.id, false)
        .await
        .unwrap();

    let plan = h.plan("Empty", &[]).await;
    let err = h
        .state
        .catalog
        .add_services(h.company_id, plan.id, &[hosting.id], &[])
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Validation(_)));
}

#[tokio::test]
async fn custom_price_and_plan_discount_drive_final_price() {
    let h = Harness::new(date(2024, 1, 10));
    let hosting = h.service("Hosting", "600", &[BillingCycle::Monthly]).await;
    let support = h.service("Support", "400", &[BillingCycle::Monthly]).await;
    let plan = h.plan("Starter", &[&hosting, &support]).await;

    let plan = h
        .state
        .catalog
        .update_service_price(h.company_id, plan.id, support.id, Some(dec("150")))
        .await
        .unwrap();
    assert_eq!(plan.auto_price, dec("750"));

    let plan = h
        .state
        .catalog
        .update_plan(
            h.company_id,
            plan.id,
            UpdatePlan {
                discount: Some(Some(Discount::percentage(dec("10")))),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(plan.final_price, dec("675"));

    let plan = h
        .state
        .catalog
        .update_plan(
            h.company_id,
            plan.id,
            UpdatePlan {
                override_price: Some(Some(dec("500"))),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(plan.final_price, dec("500"));

    let plan = h
        .state
        .catalog
        .update_service_price(h.company_id, plan.id, support.id, None)
        .await
        .unwrap();
    assert_eq!(plan.auto_price, dec("1000"));
}

#[tokio::test]
async fn editing_a_service_leaves_plan_snapshots_alone() {
    let h = Harness::new(date(2024, 1, 10));
    let hosting = h.service("Hosting", "600", &[BillingCycle::Monthly]).await;
    let plan = h.plan("Starter", &[&hosting]).await;

    h.state
        .catalog
        .update_service(
            h.company_id,
            hosting.id,
            UpdateService {
                base_price: Some(dec("900")),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let plan = h.state.catalog.get_plan(h.company_id, plan.id).await.unwrap();
    assert_eq!(plan.services[0].base_price, dec("600"));
    assert_eq!(plan.final_price, dec("600"));
}

#[tokio::test]
async fn comparison_builds_a_feature_matrix() {
    let h = Harness::new(date(2024, 1, 10));
    let hosting = h.service("Hosting", "600", &[BillingCycle::Monthly]).await;
    let support = h.service("Support", "400", &[BillingCycle::Monthly]).await;
    let basic = h.plan("Basic", &[&hosting]).await;
    let pro = h.plan("Pro", &[&hosting, &support]).await;

    let comparison = h
        .state
        .catalog
        .compare_plans(h.company_id, &[basic.id, pro.id])
        .await
        .unwrap();

    assert_eq!(comparison.plans.len(), 2);
    assert_eq!(comparison.plans[1].final_price, dec("1000"));
    let support_row = comparison
        .features
        .iter()
        .find(|row| row.name == "Support")
        .unwrap();
    assert_eq!(support_row.included, vec![false, true]);
}

#[tokio::test]
async fn plans_are_scoped_to_their_company() {
    let h = Harness::new(date(2024, 1, 10));
    let hosting = h.service("Hosting", "600", &[BillingCycle::Monthly]).await;
    let plan = h.plan("Starter", &[&hosting]).await;

    let err = h
        .state
        .catalog
        .get_plan(uuid::Uuid::new_v4(), plan.id)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::NotFound { .. }));
}
