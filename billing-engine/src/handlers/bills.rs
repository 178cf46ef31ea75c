//! Bill handlers. Clients may read their own bills and download statements;
//! every mutation is operator-only.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{
        line_items, present, ApplyDiscountRequest, BillListParams, ClientScopeParams,
        CreateBillRequest, MarkPaidRequest, UpdateBillRequest,
    },
    middleware::CallerContext,
    models::{Bill, CreateBill, ListBillsFilter, UpdateBill},
    AppState,
};

pub async fn create_bill(
    State(state): State<AppState>,
    caller: CallerContext,
    Json(payload): Json<CreateBillRequest>,
) -> Result<(StatusCode, Json<Bill>), AppError> {
    caller.require_operator()?;
    payload.validate()?;

    let client_id = present(payload.client_id, "clientId")?;
    let items = present(payload.items, "items")?;
    let due_date = present(payload.due_date, "dueDate")?;

    tracing::info!(
        company_id = %caller.company_id,
        client_id = %client_id,
        items = items.len(),
        "Creating bill"
    );

    let bill = state
        .bills
        .create(CreateBill {
            company_id: caller.company_id,
            client_id,
            items: line_items(items),
            due_date,
            tax_rate: payload.tax_rate,
            discount: payload.discount.map(Into::into),
            notes: payload.notes,
            created_by: caller.user_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(bill)))
}

pub async fn list_bills(
    State(state): State<AppState>,
    caller: CallerContext,
    Query(params): Query<BillListParams>,
) -> Result<Json<Vec<Bill>>, AppError> {
    let filter = ListBillsFilter {
        client_id: caller.scope_client(params.client_id)?,
        status: params.status,
    };
    Ok(Json(state.bills.list(caller.company_id, &filter).await?))
}

pub async fn list_overdue_bills(
    State(state): State<AppState>,
    caller: CallerContext,
    Query(params): Query<ClientScopeParams>,
) -> Result<Json<Vec<Bill>>, AppError> {
    let client_id = caller.scope_client(params.client_id)?;
    Ok(Json(state.bills.list_overdue(caller.company_id, client_id).await?))
}

pub async fn get_bill(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Bill>, AppError> {
    let bill = state.bills.get(caller.company_id, id).await?;
    caller.ensure_can_access(bill.client_id)?;
    Ok(Json(bill))
}

pub async fn update_bill(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateBillRequest>,
) -> Result<Json<Bill>, AppError> {
    caller.require_operator()?;
    payload.validate()?;

    let bill = state
        .bills
        .update(
            caller.company_id,
            id,
            UpdateBill {
                items: payload.items.map(line_items),
                due_date: payload.due_date,
                tax_rate: payload.tax_rate,
                notes: payload.notes,
            },
        )
        .await?;
    Ok(Json(bill))
}

pub async fn delete_bill(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    caller.require_operator()?;
    state.bills.delete(caller.company_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn send_bill(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Bill>, AppError> {
    caller.require_operator()?;
    Ok(Json(state.bills.send(caller.company_id, id).await?))
}

pub async fn cancel_bill(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Bill>, AppError> {
    caller.require_operator()?;
    Ok(Json(state.bills.cancel(caller.company_id, id).await?))
}

pub async fn apply_discount(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<ApplyDiscountRequest>,
) -> Result<Json<Bill>, AppError> {
    caller.require_operator()?;
    let bill = state
        .bills
        .apply_discount(caller.company_id, id, payload.into_discount())
        .await?;
    Ok(Json(bill))
}

/// Settles the outstanding balance. The body is optional.
pub async fn mark_bill_paid(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
    payload: Option<Json<MarkPaidRequest>>,
) -> Result<Json<Bill>, AppError> {
    caller.require_operator()?;
    let Json(payload) = payload.unwrap_or_default();

    tracing::info!(company_id = %caller.company_id, bill_id = %id, "Marking bill paid");

    let bill = state
        .ledger
        .mark_bill_paid(
            caller.company_id,
            id,
            caller.user_id,
            payload.method.unwrap_or_default(),
            payload.reference,
        )
        .await?;
    Ok(Json(bill))
}

pub async fn download_bill(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let bill = state.bills.get(caller.company_id, id).await?;
    caller.ensure_can_access(bill.client_id)?;

    let (content_type, file_name, body) = state.bills.render(caller.company_id, id).await?;
    let disposition = format!("attachment; filename=\"{}\"", file_name);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}
