use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{middleware::CallerContext, models::Notification, AppState};

/// The caller's own notifications, newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    caller: CallerContext,
) -> Result<Json<Vec<Notification>>, AppError> {
    let items = state
        .notifier
        .inbox(caller.company_id, caller.user_id)
        .await?;
    Ok(Json(items))
}

pub async fn mark_notification_read(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state
        .notifier
        .mark_read(caller.company_id, caller.user_id, id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
