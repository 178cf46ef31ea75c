//! Daily sweeps: due-soon reminders, overdue flips and plan renewal notices.
//!
//! A sweep never aborts on a bad record. Each record is handled on its own
//! and counted into the [`SweepReport`]; only failing to load the record set
//! fails the sweep.

use crate::clock::Clock;
use crate::error::Result;
use crate::models::{
    Bill, BillStatus, Client, NewNotification, NotificationKind, Payment, PaymentStatus,
    Priority, SweepReport,
};
use crate::services::billing_document::finalize_bill;
use crate::services::ledger::finalize_payment;
use crate::services::locks::RecordLocks;
use crate::services::notifier::{Emission, Notifier};
use crate::services::repository::Repositories;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// What happened to one scanned record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOutcome {
    /// Not in any window.
    Ignored,
    /// Eligible but nothing new to do (duplicate notification, no recipient).
    Skipped,
    Notified { updated: bool },
    UpdatedOnly,
}

impl SweepReport {
    fn absorb(&mut self, outcome: Result<RecordOutcome>) {
        match outcome {
            Ok(RecordOutcome::Ignored) => {}
            Ok(RecordOutcome::Skipped) => self.skipped += 1,
            Ok(RecordOutcome::Notified { updated }) => {
                self.notified += 1;
                if updated {
                    self.updated += 1;
                }
            }
            Ok(RecordOutcome::UpdatedOnly) => self.updated += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Due-soon window for a bill due in `days_left` days.
pub fn due_soon_window(days_left: i64) -> Option<(Priority, &'static str)> {
    match days_left {
        7 => Some((Priority::Medium, "d7")),
        3 => Some((Priority::High, "d3")),
        _ => None,
    }
}

/// Renewal notice for a plan ending in `days_left` days.
pub fn renewal_window(days_left: i64) -> Option<(NotificationKind, Priority, &'static str)> {
    match days_left {
        30 => Some((NotificationKind::PlanRenewalReminder, Priority::Medium, "d30")),
        7 => Some((NotificationKind::PlanExpiring, Priority::High, "d7")),
        d if d < 0 => Some((NotificationKind::PlanExpired, Priority::Urgent, "expired")),
        _ => None,
    }
}

fn bill_is_overdue_candidate(bill: &Bill, today: NaiveDate) -> bool {
    matches!(
        bill.status,
        BillStatus::Draft | BillStatus::Sent | BillStatus::Partial | BillStatus::Overdue
    ) && bill.due_date < today
        && bill.balance_amount > Decimal::ZERO
}

/// Only standalone payments the operator is collecting. A bill-linked
/// payment is covered by its bill's notice, and a client submission waits
/// on verification rather than its due date.
fn payment_is_overdue_candidate(payment: &Payment, today: NaiveDate) -> bool {
    payment.bill_id.is_none()
        && payment.submitted_utc.is_none()
        && matches!(
        payment.status,
        PaymentStatus::Pending | PaymentStatus::Partial | PaymentStatus::Overdue
    ) && payment.due_date.is_some_and(|due| due < today)
        && payment.balance_amount > Decimal::ZERO
}

#[derive(Clone)]
pub struct ScheduledReconciliation {
    repos: Repositories,
    clock: Arc<dyn Clock>,
    locks: RecordLocks,
    notifier: Notifier,
}

impl ScheduledReconciliation {
    pub fn new(repos: Repositories, clock: Arc<dyn Clock>, locks: RecordLocks, notifier: Notifier) -> Self {
        Self {
            repos,
            clock,
            locks,
            notifier,
        }
    }

    #[instrument(skip(self), fields(today = %today))]
    pub async fn run_due_soon(&self, today: NaiveDate) -> Result<SweepReport> {
        let bills = self
            .repos
            .bills
            .list_bills_with_status(&[BillStatus::Draft, BillStatus::Sent, BillStatus::Partial])
            .await?;

        let mut report = SweepReport::default();
        for bill in &bills {
            report.scanned += 1;
            let outcome = self.due_soon_for_bill(bill, today).await;
            if let Err(e) = &outcome {
                warn!(bill_id = %bill.id, error = %e, "Due-soon record failed; skipping");
            }
            report.absorb(outcome);
        }

        info!(?report, "Due-soon sweep finished");
        Ok(report)
    }

    async fn due_soon_for_bill(&self, bill: &Bill, today: NaiveDate) -> Result<RecordOutcome> {
        if bill.balance_amount <= Decimal::ZERO {
            return Ok(RecordOutcome::Ignored);
        }
        let Some((priority, window)) = due_soon_window((bill.due_date - today).num_days()) else {
            return Ok(RecordOutcome::Ignored);
        };

        let Some(recipient) = self.recipient(bill.company_id, bill.client_id).await? else {
            return Ok(RecordOutcome::Skipped);
        };
        let emission = self
            .notifier
            .emit(NewNotification {
                company_id: bill.company_id,
                recipient_user_id: recipient,
                kind: NotificationKind::BillDueSoon,
                priority,
                title: format!("Bill {} is due soon", bill.bill_number),
                message: format!(
                    "Bill {} for {} is due on {}.",
                    bill.bill_number, bill.balance_amount, bill.due_date
                ),
                entity_type: "bill",
                entity_id: bill.id,
                dedup_key: Notifier::dedup_key(
                    "bill_due_soon",
                    bill.id,
                    format!("{}-{}", bill.due_date, window),
                ),
            })
            .await?;

        Ok(match emission {
            Emission::Stored => RecordOutcome::Notified { updated: false },
            Emission::Duplicate => RecordOutcome::Skipped,
        })
    }

    /// Flips past-due bills and payments to overdue and notifies urgently.
    #[instrument(skip(self), fields(today = %today))]
    pub async fn run_overdue(&self, today: NaiveDate) -> Result<SweepReport> {
        let bills = self
            .repos
            .bills
            .list_bills_with_status(&[
                BillStatus::Draft,
                BillStatus::Sent,
                BillStatus::Partial,
                BillStatus::Overdue,
            ])
            .await?;
        let payments = self
            .repos
            .payments
            .list_payments_with_status(&[
                PaymentStatus::Pending,
                PaymentStatus::Partial,
                PaymentStatus::Overdue,
            ])
            .await?;

        let mut report = SweepReport::default();
        for bill in bills.iter().filter(|b| bill_is_overdue_candidate(b, today)) {
            report.scanned += 1;
            let outcome = self.overdue_bill(bill.company_id, bill.id, today).await;
            if let Err(e) = &outcome {
                warn!(bill_id = %bill.id, error = %e, "Overdue bill record failed; skipping");
            }
            report.absorb(outcome);
        }
        for payment in payments
            .iter()
            .filter(|p| payment_is_overdue_candidate(p, today))
        {
            report.scanned += 1;
            let outcome = self.overdue_payment(payment, today).await;
            if let Err(e) = &outcome {
                warn!(payment_id = %payment.id, error = %e, "Overdue payment record failed; skipping");
            }
            report.absorb(outcome);
        }

        info!(?report, "Overdue sweep finished");
        Ok(report)
    }

    /// The sweep's instant: the clock, but never earlier than the start of the
    /// day being swept.
    fn sweep_instant(&self, today: NaiveDate) -> DateTime<Utc> {
        today.and_time(NaiveTime::MIN).and_utc().max(self.clock.now())
    }

    async fn overdue_bill(&self, company_id: Uuid, bill_id: Uuid, today: NaiveDate) -> Result<RecordOutcome> {
        let (bill, was_updated) = {
            let _guard = self.locks.lock(bill_id).await;
            // Re-read under the lock; a payment may have landed since the scan.
            let Some(bill) = self.repos.bills.get_bill(company_id, bill_id).await? else {
                return Ok(RecordOutcome::Ignored);
            };
            if !bill_is_overdue_candidate(&bill, today) {
                return Ok(RecordOutcome::Ignored);
            }
            let mut refreshed = finalize_bill(bill.clone(), self.sweep_instant(today));
            if refreshed == bill {
                (bill, false)
            } else {
                refreshed.updated_utc = self.clock.now();
                self.repos.bills.update_bill(&refreshed).await?;
                info!(bill_id = %refreshed.id, status = refreshed.status.as_str(), "Bill marked overdue");
                (refreshed, true)
            }
        };

        let Some(recipient) = self.recipient(bill.company_id, bill.client_id).await? else {
            return Ok(if was_updated {
                RecordOutcome::UpdatedOnly
            } else {
                RecordOutcome::Skipped
            });
        };
        let emission = self
            .notifier
            .emit(NewNotification {
                company_id: bill.company_id,
                recipient_user_id: recipient,
                kind: NotificationKind::BillOverdue,
                priority: Priority::Urgent,
                title: format!("Bill {} is overdue", bill.bill_number),
                message: format!(
                    "Bill {} was due on {}; {} is outstanding.",
                    bill.bill_number, bill.due_date, bill.balance_amount
                ),
                entity_type: "bill",
                entity_id: bill.id,
                dedup_key: Notifier::dedup_key("bill_overdue", bill.id, bill.due_date),
            })
            .await;

        finish_outcome(was_updated, emission)
    }

    async fn overdue_payment(&self, scanned: &Payment, today: NaiveDate) -> Result<RecordOutcome> {
        let company_id = scanned.company_id;
        let (payment, was_updated) = {
            let _guard = self.locks.lock(scanned.id).await;
            let Some(payment) = self.repos.payments.get_payment(company_id, scanned.id).await?
            else {
                return Ok(RecordOutcome::Ignored);
            };
            if !payment_is_overdue_candidate(&payment, today) {
                return Ok(RecordOutcome::Ignored);
            }
            let mut refreshed = finalize_payment(payment.clone(), today);
            if refreshed == payment {
                (payment, false)
            } else {
                refreshed.updated_utc = self.clock.now();
                self.repos.payments.update_payment(&refreshed).await?;
                info!(payment_id = %refreshed.id, status = refreshed.status.as_str(), "Payment marked overdue");
                (refreshed, true)
            }
        };

        let Some(recipient) = self.recipient(company_id, payment.client_id).await? else {
            return Ok(if was_updated {
                RecordOutcome::UpdatedOnly
            } else {
                RecordOutcome::Skipped
            });
        };
        let due = payment.due_date.unwrap_or(today);
        let emission = self
            .notifier
            .emit(NewNotification {
                company_id,
                recipient_user_id: recipient,
                kind: NotificationKind::PaymentOverdue,
                priority: Priority::Urgent,
                title: "Payment overdue".to_string(),
                message: format!(
                    "A payment of {} was due on {}; {} is outstanding.",
                    payment.amount, due, payment.balance_amount
                ),
                entity_type: "payment",
                entity_id: payment.id,
                dedup_key: Notifier::dedup_key("payment_overdue", payment.id, due),
            })
            .await;

        finish_outcome(was_updated, emission)
    }

    #[instrument(skip(self), fields(today = %today))]
    pub async fn run_renewals(&self, today: NaiveDate) -> Result<SweepReport> {
        let clients = self.repos.clients.list_active_clients_with_plan_end().await?;

        let mut report = SweepReport::default();
        for client in &clients {
            report.scanned += 1;
            let outcome = self.renewal_for_client(client, today).await;
            if let Err(e) = &outcome {
                warn!(client_id = %client.id, error = %e, "Renewal record failed; skipping");
            }
            report.absorb(outcome);
        }

        info!(?report, "Renewal sweep finished");
        Ok(report)
    }

    async fn renewal_for_client(&self, client: &Client, today: NaiveDate) -> Result<RecordOutcome> {
        let Some(plan_end) = client.plan_end_date else {
            return Ok(RecordOutcome::Ignored);
        };
        let Some((kind, priority, window)) = renewal_window((plan_end - today).num_days()) else {
            return Ok(RecordOutcome::Ignored);
        };

        let (title, message) = match kind {
            NotificationKind::PlanRenewalReminder => (
                "Plan renewal coming up".to_string(),
                format!("Your plan ends on {}. Renew to keep your services.", plan_end),
            ),
            NotificationKind::PlanExpiring => (
                "Plan expiring soon".to_string(),
                format!("Your plan expires on {}.", plan_end),
            ),
            _ => (
                "Plan expired".to_string(),
                format!("Your plan expired on {}.", plan_end),
            ),
        };

        let emission = self
            .notifier
            .emit(NewNotification {
                company_id: client.company_id,
                recipient_user_id: client.user_id,
                kind,
                priority,
                title,
                message,
                entity_type: "client",
                entity_id: client.id,
                dedup_key: Notifier::dedup_key(
                    kind.as_str(),
                    client.id,
                    format!("{}-{}", plan_end, window),
                ),
            })
            .await?;

        Ok(match emission {
            Emission::Stored => RecordOutcome::Notified { updated: false },
            Emission::Duplicate => RecordOutcome::Skipped,
        })
    }

    async fn recipient(&self, company_id: Uuid, client_id: Uuid) -> Result<Option<Uuid>> {
        let recipient = self.notifier.recipient_for_client(company_id, client_id).await?;
        if recipient.is_none() {
            warn!(client_id = %client_id, "No client record; notification skipped");
        }
        Ok(recipient)
    }
}

/// A status flip that already persisted still counts when the
/// notification afterwards fails; the failure is logged, not counted.
fn finish_outcome(was_updated: bool, emission: Result<Emission>) -> Result<RecordOutcome> {
    match emission {
        Ok(Emission::Stored) => Ok(RecordOutcome::Notified {
            updated: was_updated,
        }),
        Ok(Emission::Duplicate) if was_updated => Ok(RecordOutcome::UpdatedOnly),
        Ok(Emission::Duplicate) => Ok(RecordOutcome::Skipped),
        Err(e) if was_updated => {
            warn!(error = %e, "Notification failed after status update");
            Ok(RecordOutcome::UpdatedOnly)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_soon_windows_are_exact_days() {
        assert_eq!(due_soon_window(7), Some((Priority::Medium, "d7")));
        assert_eq!(due_soon_window(3), Some((Priority::High, "d3")));
        assert_eq!(due_soon_window(5), None);
        assert_eq!(due_soon_window(0), None);
    }

    #[test]
    fn renewal_windows() {
        assert_eq!(renewal_window(30).map(|w| w.0), Some(NotificationKind::PlanRenewalReminder));
        assert_eq!(renewal_window(7).map(|w| w.1), Some(Priority::High));
        assert_eq!(renewal_window(-1).map(|w| w.0), Some(NotificationKind::PlanExpired));
        assert_eq!(renewal_window(0), None);
        assert_eq!(renewal_window(12), None);
    }

    #[test]
    fn report_counts_each_outcome() {
        let mut report = SweepReport::default();
        report.absorb(Ok(RecordOutcome::Ignored));
        report.absorb(Ok(RecordOutcome::Skipped));
        report.absorb(Ok(RecordOutcome::Notified { updated: true }));
        report.absorb(Ok(RecordOutcome::UpdatedOnly));
        report.absorb(Err(crate::error::BillingError::validation("boom")));
        assert_eq!(
            report,
            SweepReport {
                scanned: 0,
                updated: 2,
                notified: 1,
                skipped: 1,
                failed: 1,
            }
        );
    }
}
