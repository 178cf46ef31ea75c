//! Service catalog and plan handlers. Reads are open to every caller of the
//! company; mutations are operator-only.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use std::collections::BTreeSet;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{
        custom_price_pairs, parse_id_list, ActiveOnlyParams, AddPlanServicesRequest,
        ComparisonParams, CreatePlanRequest, CreateServiceRequest, SetActiveRequest,
        UpdatePlanRequest, UpdateServicePriceRequest, UpdateServiceRequest,
    },
    middleware::CallerContext,
    models::{CreatePlan, CreateService, Plan, PlanComparison, Service, UpdatePlan, UpdateService},
    AppState,
};

pub async fn create_service(
    State(state): State<AppState>,
    caller: CallerContext,
    Json(payload): Json<CreateServiceRequest>,
) -> Result<(StatusCode, Json<Service>), AppError> {
    caller.require_operator()?;
    payload.validate()?;

    tracing::info!(company_id = %caller.company_id, name = %payload.name, "Creating service");

    let service = state
        .catalog
        .create_service(CreateService {
            company_id: caller.company_id,
            name: payload.name,
            description: payload.description,
            base_price: payload.base_price,
            allowed_cycles: payload.allowed_cycles.into_iter().collect(),
            features: payload.features,
            created_by: caller.user_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(service)))
}

pub async fn list_services(
    State(state): State<AppState>,
    caller: CallerContext,
    Query(params): Query<ActiveOnlyParams>,
) -> Result<Json<Vec<Service>>, AppError> {
    let services = state
        .catalog
        .list_services(caller.company_id, params.active_only || caller.is_client())
        .await?;
    Ok(Json(services))
}

pub async fn get_service(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Service>, AppError> {
    Ok(Json(state.catalog.get_service(caller.company_id, id).await?))
}

pub async fn update_service(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateServiceRequest>,
) -> Result<Json<Service>, AppError> {
    caller.require_operator()?;
    payload.validate()?;

    let service = state
        .catalog
        .update_service(
            caller.company_id,
            id,
            UpdateService {
                name: payload.name,
                description: payload.description,
                base_price: payload.base_price,
                allowed_cycles: payload
                    .allowed_cycles
                    .map(|c| c.into_iter().collect::<BTreeSet<_>>()),
                features: payload.features,
            },
        )
        .await?;
    Ok(Json(service))
}

pub async fn set_service_status(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetActiveRequest>,
) -> Result<Json<Service>, AppError> {
    caller.require_operator()?;
    let service = state
        .catalog
        .set_service_active(caller.company_id, id, payload.is_active)
        .await?;
    Ok(Json(service))
}

pub async fn create_plan(
    State(state): State<AppState>,
    caller: CallerContext,
    Json(payload): Json<CreatePlanRequest>,
) -> Result<(StatusCode, Json<Plan>), AppError> {
    caller.require_operator()?;
    payload.validate()?;

    tracing::info!(
        company_id = %caller.company_id,
        name = %payload.name,
        services = payload.service_ids.len(),
        "Creating plan"
    );

    let plan = state
        .catalog
        .create_plan(CreatePlan {
            company_id: caller.company_id,
            name: payload.name,
            description: payload.description,
            service_ids: payload.service_ids,
            custom_prices: custom_price_pairs(payload.custom_prices),
            override_price: payload.override_price,
            discount: payload.discount.map(Into::into),
            created_by: caller.user_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(plan)))
}

pub async fn list_plans(
    State(state): State<AppState>,
    caller: CallerContext,
    Query(params): Query<ActiveOnlyParams>,
) -> Result<Json<Vec<Plan>>, AppError> {
    let plans = state
        .catalog
        .list_plans(caller.company_id, params.active_only || caller.is_client())
        .await?;
    Ok(Json(plans))
}

pub async fn get_plan(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Plan>, AppError> {
    Ok(Json(state.catalog.get_plan(caller.company_id, id).await?))
}

pub async fn update_plan(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePlanRequest>,
) -> Result<Json<Plan>, AppError> {
    caller.require_operator()?;
    payload.validate()?;

    let plan = state
        .catalog
        .update_plan(
            caller.company_id,
            id,
            UpdatePlan {
                name: payload.name,
                description: payload.description,
                override_price: payload.override_price,
                discount: payload.discount.map(|d| d.map(Into::into)),
            },
        )
        .await?;
    Ok(Json(plan))
}

pub async fn set_plan_status(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetActiveRequest>,
) -> Result<Json<Plan>, AppError> {
    caller.require_operator()?;
    let plan = state
        .catalog
        .set_plan_active(caller.company_id, id, payload.is_active)
        .await?;
    Ok(Json(plan))
}

pub async fn add_plan_services(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddPlanServicesRequest>,
) -> Result<Json<Plan>, AppError> {
    caller.require_operator()?;
    payload.validate()?;

    let custom_prices = custom_price_pairs(payload.custom_prices);
    let plan = state
        .catalog
        .add_services(caller.company_id, id, &payload.service_ids, &custom_prices)
        .await?;
    Ok(Json(plan))
}

pub async fn remove_plan_service(
    State(state): State<AppState>,
    caller: CallerContext,
    Path((id, service_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Plan>, AppError> {
    caller.require_operator()?;
    let plan = state
        .catalog
        .remove_service(caller.company_id, id, service_id)
        .await?;
    Ok(Json(plan))
}

pub async fn update_plan_service_price(
    State(state): State<AppState>,
    caller: CallerContext,
    Path((id, service_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateServicePriceRequest>,
) -> Result<Json<Plan>, AppError> {
    caller.require_operator()?;
    payload.validate()?;

    let plan = state
        .catalog
        .update_service_price(caller.company_id, id, service_id, payload.custom_price)
        .await?;
    Ok(Json(plan))
}

pub async fn compare_plans(
    State(state): State<AppState>,
    caller: CallerContext,
    Query(params): Query<ComparisonParams>,
) -> Result<Json<PlanComparison>, AppError> {
    let ids = parse_id_list(&params.ids)?;
    Ok(Json(state.catalog.compare_plans(caller.company_id, &ids).await?))
}
