//! Client records are owned by the CRM; this endpoint only seeds the local
//! copy the sweeps and notifications read.

use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{dtos::UpsertClientRequest, middleware::CallerContext, models::Client, AppState};

pub async fn upsert_client(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpsertClientRequest>,
) -> Result<Json<Client>, AppError> {
    caller.require_operator()?;
    payload.validate()?;

    let client = state
        .subscriptions
        .upsert_client(Client {
            id,
            company_id: caller.company_id,
            user_id: payload.user_id,
            name: payload.name,
            email: payload.email,
            is_active: payload.is_active,
            plan_id: payload.plan_id,
            plan_end_date: payload.plan_end_date,
            updated_utc: state.clock.now(),
        })
        .await?;
    Ok(Json(client))
}

pub async fn get_client(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Client>, AppError> {
    caller.ensure_can_access(id)?;
    Ok(Json(state.subscriptions.get_client(caller.company_id, id).await?))
}
