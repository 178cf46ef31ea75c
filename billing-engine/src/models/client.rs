//! Client record as seen by billing. Owned by the CRM side.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: Uuid,
    pub company_id: Uuid,
    /// The client's own user account; notifications are addressed to it.
    pub user_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub is_active: bool,
    pub plan_id: Option<Uuid>,
    pub plan_end_date: Option<NaiveDate>,
    pub updated_utc: DateTime<Utc>,
}
