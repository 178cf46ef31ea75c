//! Subscription handlers. Client callers subscribe themselves and may cancel
//! their own subscriptions; activation is operator-only.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{present, CancelRequest, CreateSubscriptionRequest, SubscriptionListParams},
    middleware::CallerContext,
    models::{CreateSubscription, ListSubscriptionsFilter, Subscription},
    AppState,
};

pub async fn create_subscription(
    State(state): State<AppState>,
    caller: CallerContext,
    Json(payload): Json<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<Subscription>), AppError> {
    payload.validate()?;

    let client_id = match caller.client_id {
        Some(own) => own,
        None => present(payload.client_id, "clientId")?,
    };
    let plan_id = present(payload.plan_id, "planId")?;
    let billing_cycle = present(payload.billing_cycle, "billingCycle")?;

    tracing::info!(
        company_id = %caller.company_id,
        client_id = %client_id,
        plan_id = %plan_id,
        billing_cycle = %billing_cycle,
        "Creating subscription"
    );

    let subscription = state
        .subscriptions
        .create(CreateSubscription {
            company_id: caller.company_id,
            client_id,
            plan_id,
            add_ons: payload.add_ons,
            billing_cycle,
            discount: payload.discount.unwrap_or_default(),
            start_date: payload.start_date,
            end_date: payload.end_date,
            created_by: caller.user_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(subscription)))
}

pub async fn list_subscriptions(
    State(state): State<AppState>,
    caller: CallerContext,
    Query(params): Query<SubscriptionListParams>,
) -> Result<Json<Vec<Subscription>>, AppError> {
    let filter = ListSubscriptionsFilter {
        client_id: caller.scope_client(params.client_id)?,
        status: params.status,
    };
    Ok(Json(state.subscriptions.list(caller.company_id, &filter).await?))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Subscription>, AppError> {
    let subscription = state.subscriptions.get(caller.company_id, id).await?;
    caller.ensure_can_access(subscription.client_id)?;
    Ok(Json(subscription))
}

pub async fn activate_subscription(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Subscription>, AppError> {
    caller.require_operator()?;
    let subscription = state
        .subscriptions
        .activate(caller.company_id, id, caller.user_id)
        .await?;
    Ok(Json(subscription))
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelRequest>,
) -> Result<Json<Subscription>, AppError> {
    payload.validate()?;
    if caller.is_client() {
        let existing = state.subscriptions.get(caller.company_id, id).await?;
        caller.ensure_can_access(existing.client_id)?;
    }

    let subscription = state
        .subscriptions
        .cancel(caller.company_id, id, caller.user_id, &payload.reason)
        .await?;
    Ok(Json(subscription))
}
