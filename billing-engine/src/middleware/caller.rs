//! Caller context for company scoping and client-level access checks.
//!
//! Extracts the caller (company, user, role, client) from request headers.
//! These headers are set by the gateway after authenticating the user; this
//! service does no authentication of its own.

use crate::error::BillingError;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

pub const COMPANY_HEADER: &str = "X-Company-ID";
pub const USER_HEADER: &str = "X-User-ID";
pub const ROLE_HEADER: &str = "X-Role";
pub const CLIENT_HEADER: &str = "X-Client-ID";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Operator,
    Client,
}

impl Role {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "operator" => Some(Role::Operator),
            "client" => Some(Role::Client),
            _ => None,
        }
    }
}

/// Who is calling, scoped to one company.
#[derive(Debug, Clone)]
pub struct CallerContext {
    pub company_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    /// Present only for client callers.
    pub client_id: Option<Uuid>,
}

impl CallerContext {
    pub fn is_client(&self) -> bool {
        self.role == Role::Client
    }

    /// Operator mutations are closed to client callers.
    pub fn require_operator(&self) -> Result<(), BillingError> {
        if self.is_client() {
            return Err(BillingError::denied(
                "client accounts may not perform this operation",
            ));
        }
        Ok(())
    }

    /// A client caller may only touch records that carry its own client id.
    pub fn ensure_can_access(&self, owner_client_id: Uuid) -> Result<(), BillingError> {
        match self.client_id {
            Some(own) if self.is_client() && own != owner_client_id => Err(BillingError::denied(
                "record belongs to another client",
            )),
            _ => Ok(()),
        }
    }

    /// Narrows an optional client filter: client callers are pinned to
    /// themselves, operators get whatever they asked for.
    pub fn scope_client(&self, requested: Option<Uuid>) -> Result<Option<Uuid>, BillingError> {
        if !self.is_client() {
            return Ok(requested);
        }
        if let Some(requested) = requested {
            self.ensure_can_access(requested)?;
        }
        Ok(self.client_id)
    }
}

fn header_uuid(parts: &Parts, name: &str) -> Result<Option<Uuid>, AppError> {
    match parts.headers.get(name).and_then(|v| v.to_str().ok()) {
        Some(raw) => Uuid::parse_str(raw.trim())
            .map(Some)
            .map_err(|_| AppError::BadRequest(anyhow::anyhow!("{} must be a UUID", name))),
        None => Ok(None),
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CallerContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let company_id = header_uuid(parts, COMPANY_HEADER)?.ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing {} header", COMPANY_HEADER))
        })?;
        let user_id = header_uuid(parts, USER_HEADER)?.ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing {} header", USER_HEADER))
        })?;

        let role = match parts.headers.get(ROLE_HEADER).and_then(|v| v.to_str().ok()) {
            Some(raw) => Role::parse(raw).ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!(
                    "{} must be one of admin, operator, client",
                    ROLE_HEADER
                ))
            })?,
            None => Role::Operator,
        };

        let client_id = header_uuid(parts, CLIENT_HEADER)?;
        if role == Role::Client && client_id.is_none() {
            return Err(AppError::Unauthorized(anyhow::anyhow!(
                "Missing {} header for client caller",
                CLIENT_HEADER
            )));
        }

        let span = tracing::Span::current();
        span.record("company_id", company_id.to_string().as_str());
        span.record("user_id", user_id.to_string().as_str());

        Ok(CallerContext {
            company_id,
            user_id,
            role,
            client_id: if role == Role::Client { client_id } else { None },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(role: Role, client_id: Option<Uuid>) -> CallerContext {
        CallerContext {
            company_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            role,
            client_id,
        }
    }

    #[test]
    fn client_is_pinned_to_itself() {
        let own = Uuid::new_v4();
        let c = caller(Role::Client, Some(own));
        assert_eq!(c.scope_client(None).unwrap(), Some(own));
        assert!(c.scope_client(Some(Uuid::new_v4())).is_err());
        assert!(c.ensure_can_access(own).is_ok());
        assert!(c.require_operator().is_err());
    }

    #[test]
    fn operators_see_everything() {
        let c = caller(Role::Operator, None);
        let other = Uuid::new_v4();
        assert_eq!(c.scope_client(Some(other)).unwrap(), Some(other));
        assert!(c.ensure_can_access(other).is_ok());
        assert!(c.require_operator().is_ok());
    }

    #[test]
    fn roles_parse_case_insensitively() {
        assert_eq!(Role::parse("Admin"), Some(Role::Admin));
        assert_eq!(Role::parse("client"), Some(Role::Client));
        assert_eq!(Role::parse("root"), None);
    }
}
