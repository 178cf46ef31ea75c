//! Payment and invoice handlers.
//!
//! Client callers may submit payments for verification and read their own
//! payments and invoices. Recording, editing, verifying and rejecting
//! payments is operator-only.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{
        present, ClientScopeParams, CreatePaymentRequest, PartialPaymentRequest,
        PaymentListParams, RejectPaymentRequest, SubmitVerificationRequest, UpdatePaymentRequest,
    },
    middleware::CallerContext,
    models::{CreatePayment, Invoice, ListPaymentsFilter, Payment, PaymentStats, UpdatePayment},
    services::ledger::PartialPayment,
    AppState,
};

pub async fn create_payment(
    State(state): State<AppState>,
    caller: CallerContext,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<Payment>), AppError> {
    caller.require_operator()?;
    payload.validate()?;
    let client_id = present(payload.client_id, "clientId")?;

    tracing::info!(
        company_id = %caller.company_id,
        client_id = %client_id,
        bill_id = ?payload.bill_id,
        amount = %payload.amount,
        "Recording payment"
    );

    let payment = state
        .ledger
        .create(CreatePayment {
            company_id: caller.company_id,
            client_id,
            bill_id: payload.bill_id,
            subscription_id: payload.subscription_id,
            amount: payload.amount,
            paid_amount: payload.paid_amount.unwrap_or_default(),
            due_date: payload.due_date,
            method: payload.method.unwrap_or_default(),
            reference: payload.reference,
            notes: payload.notes,
            submitted: false,
            created_by: caller.user_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(payment)))
}

pub async fn submit_for_verification(
    State(state): State<AppState>,
    caller: CallerContext,
    Json(payload): Json<SubmitVerificationRequest>,
) -> Result<(StatusCode, Json<Payment>), AppError> {
    payload.validate()?;
    let client_id = match caller.client_id {
        Some(own) => own,
        None => present(payload.client_id, "clientId")?,
    };

    tracing::info!(
        company_id = %caller.company_id,
        client_id = %client_id,
        amount = %payload.amount,
        "Payment submitted for verification"
    );

    let payment = state
        .ledger
        .submit_for_verification(CreatePayment {
            company_id: caller.company_id,
            client_id,
            bill_id: payload.bill_id,
            subscription_id: payload.subscription_id,
            amount: payload.amount,
            paid_amount: Default::default(),
            due_date: None,
            method: payload.method.unwrap_or_default(),
            reference: payload.reference,
            notes: payload.notes,
            submitted: true,
            created_by: caller.user_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(payment)))
}

pub async fn list_payments(
    State(state): State<AppState>,
    caller: CallerContext,
    Query(params): Query<PaymentListParams>,
) -> Result<Json<Vec<Payment>>, AppError> {
    let filter = ListPaymentsFilter {
        client_id: caller.scope_client(params.client_id)?,
        bill_id: params.bill_id,
        subscription_id: params.subscription_id,
        status: params.status,
    };
    Ok(Json(state.ledger.list(caller.company_id, &filter).await?))
}

pub async fn get_payment(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    let payment = state.ledger.get(caller.company_id, id).await?;
    caller.ensure_can_access(payment.client_id)?;
    Ok(Json(payment))
}

pub async fn update_payment(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePaymentRequest>,
) -> Result<Json<Payment>, AppError> {
    caller.require_operator()?;
    payload.validate()?;

    let payment = state
        .ledger
        .update(
            caller.company_id,
            id,
            UpdatePayment {
                paid_amount: payload.paid_amount,
                due_date: payload.due_date,
                method: payload.method,
                reference: payload.reference,
                notes: payload.notes,
            },
        )
        .await?;
    Ok(Json(payment))
}

pub async fn delete_payment(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    caller.require_operator()?;
    state.ledger.delete(caller.company_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn cancel_payment(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    caller.require_operator()?;
    Ok(Json(state.ledger.cancel(caller.company_id, id).await?))
}

pub async fn verify_payment(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    caller.require_operator()?;
    tracing::info!(company_id = %caller.company_id, payment_id = %id, "Verifying payment");
    let payment = state
        .ledger
        .verify(caller.company_id, id, caller.user_id)
        .await?;
    Ok(Json(payment))
}

pub async fn reject_payment(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectPaymentRequest>,
) -> Result<Json<Payment>, AppError> {
    caller.require_operator()?;
    payload.validate()?;
    tracing::info!(company_id = %caller.company_id, payment_id = %id, "Rejecting payment");
    let payment = state
        .ledger
        .reject(caller.company_id, id, caller.user_id, &payload.reason)
        .await?;
    Ok(Json(payment))
}

pub async fn record_partial_payment(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<PartialPaymentRequest>,
) -> Result<Json<Payment>, AppError> {
    caller.require_operator()?;
    payload.validate()?;

    let payment = state
        .ledger
        .record_partial(
            caller.company_id,
            id,
            PartialPayment {
                amount: payload.amount_paid,
                method: payload.method,
                reference: payload.reference,
                notes: payload.notes,
            },
        )
        .await?;
    Ok(Json(payment))
}

pub async fn pending_verification(
    State(state): State<AppState>,
    caller: CallerContext,
) -> Result<Json<Vec<Payment>>, AppError> {
    caller.require_operator()?;
    Ok(Json(state.ledger.pending_verification(caller.company_id).await?))
}

pub async fn payment_stats(
    State(state): State<AppState>,
    caller: CallerContext,
) -> Result<Json<PaymentStats>, AppError> {
    caller.require_operator()?;
    Ok(Json(state.ledger.stats(caller.company_id).await?))
}

/// Client callers are pinned to themselves; operators must name a client.
pub async fn payment_history(
    State(state): State<AppState>,
    caller: CallerContext,
    Query(params): Query<ClientScopeParams>,
) -> Result<Json<Vec<Payment>>, AppError> {
    let client_id = present(caller.scope_client(params.client_id)?, "clientId")?;
    Ok(Json(state.ledger.history(caller.company_id, client_id).await?))
}

pub async fn overdue_payments(
    State(state): State<AppState>,
    caller: CallerContext,
    Query(params): Query<ClientScopeParams>,
) -> Result<Json<Vec<Payment>>, AppError> {
    let client_id = caller.scope_client(params.client_id)?;
    Ok(Json(state.ledger.overdue(caller.company_id, client_id).await?))
}

pub async fn list_invoices(
    State(state): State<AppState>,
    caller: CallerContext,
    Query(params): Query<ClientScopeParams>,
) -> Result<Json<Vec<Invoice>>, AppError> {
    let client_id = caller.scope_client(params.client_id)?;
    Ok(Json(state.ledger.list_invoices(caller.company_id, client_id).await?))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Invoice>, AppError> {
    let invoice = state.ledger.get_invoice(caller.company_id, id).await?;
    caller.ensure_can_access(invoice.client_id)?;
    Ok(Json(invoice))
}
