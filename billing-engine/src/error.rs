//! Domain error type and its mapping onto HTTP errors.

use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("{0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("{0}")]
    StateConflict(String),

    #[error("{0}")]
    AccessDenied(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BillingError>;

impl BillingError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        BillingError::NotFound { entity, id }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        BillingError::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        BillingError::StateConflict(msg.into())
    }

    pub fn denied(msg: impl Into<String>) -> Self {
        BillingError::AccessDenied(msg.into())
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Storage(anyhow::Error::new(err))
    }
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            e @ BillingError::NotFound { .. } => AppError::NotFound(anyhow::anyhow!(e.to_string())),
            BillingError::StateConflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            BillingError::AccessDenied(msg) => AppError::Forbidden(anyhow::anyhow!(msg)),
            BillingError::Storage(e) => AppError::DatabaseError(e),
        }
    }
}
