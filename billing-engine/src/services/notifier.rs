//! Notification emission. Records are stored with insert-if-absent on their
//! dedup key; delivery happens elsewhere.

use crate::clock::Clock;
use crate::error::{BillingError, Result};
use crate::models::{NewNotification, Notification};
use crate::services::metrics::record_notification;
use crate::services::repository::Repositories;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome of a single emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emission {
    Stored,
    Duplicate,
}

#[derive(Clone)]
pub struct Notifier {
    repos: Repositories,
    clock: Arc<dyn Clock>,
}

impl Notifier {
    pub fn new(repos: Repositories, clock: Arc<dyn Clock>) -> Self {
        Self { repos, clock }
    }

    pub fn dedup_key(kind: &str, entity_id: Uuid, window: impl std::fmt::Display) -> String {
        format!("{}:{}:{}", kind, entity_id, window)
    }

    /// The user account a client's notifications go to.
    pub async fn recipient_for_client(&self, company_id: Uuid, client_id: Uuid) -> Result<Option<Uuid>> {
        Ok(self
            .repos
            .clients
            .get_client(company_id, client_id)
            .await?
            .map(|c| c.user_id))
    }

    pub async fn emit(&self, new: NewNotification) -> Result<Emission> {
        let kind = new.kind;
        let notification = Notification {
            id: Uuid::new_v4(),
            company_id: new.company_id,
            recipient_user_id: new.recipient_user_id,
            kind: new.kind,
            priority: new.priority,
            title: new.title,
            message: new.message,
            entity_type: new.entity_type.to_string(),
            entity_id: new.entity_id,
            dedup_key: new.dedup_key,
            is_read: false,
            created_utc: self.clock.now(),
        };

        match self.repos.notifications.insert_if_absent(&notification).await {
            Ok(true) => {
                record_notification(kind.as_str(), "stored");
                debug!(
                    kind = kind.as_str(),
                    dedup_key = %notification.dedup_key,
                    "Notification stored"
                );
                Ok(Emission::Stored)
            }
            Ok(false) => {
                record_notification(kind.as_str(), "duplicate");
                Ok(Emission::Duplicate)
            }
            Err(e) => {
                record_notification(kind.as_str(), "failed");
                Err(e)
            }
        }
    }

    /// A user's notifications, newest first.
    pub async fn inbox(&self, company_id: Uuid, user_id: Uuid) -> Result<Vec<Notification>> {
        let mut items = self
            .repos
            .notifications
            .list_for_recipient(company_id, user_id)
            .await?;
        items.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(items)
    }

    pub async fn mark_read(&self, company_id: Uuid, user_id: Uuid, id: Uuid) -> Result<()> {
        if !self
            .repos
            .notifications
            .mark_read(company_id, user_id, id)
            .await?
        {
            return Err(BillingError::not_found("notification", id));
        }
        Ok(())
    }

    /// Emits to the client's user account, logging instead of failing.
    /// Used on the write path where a mutation must not fail because of
    /// a notification.
    pub async fn notify_client_quietly(
        &self,
        company_id: Uuid,
        client_id: Uuid,
        build: impl FnOnce(Uuid) -> NewNotification,
    ) {
        let recipient = match self.recipient_for_client(company_id, client_id).await {
            Ok(Some(user_id)) => user_id,
            Ok(None) => {
                warn!(client_id = %client_id, "No client record; notification skipped");
                return;
            }
            Err(e) => {
                warn!(client_id = %client_id, error = %e, "Client lookup failed; notification skipped");
                return;
            }
        };

        let new = build(recipient);
        let kind = new.kind;
        if let Err(e) = self.emit(new).await {
            warn!(kind = kind.as_str(), error = %e, "Failed to emit notification");
        }
    }
}
