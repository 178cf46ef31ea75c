//! Billing documents. Amounts and status are always re-derived by
//! [`finalize_bill`] before a bill is persisted.

use crate::clock::Clock;
use crate::error::{BillingError, Result};
use crate::models::{
    Bill, BillStatus, CreateBill, Discount, LineItem, ListBillsFilter, UpdateBill,
};
use crate::services::locks::RecordLocks;
use crate::services::metrics::record_bill_operation;
use crate::services::pricing::{round_money, validate_discount};
use crate::services::render::BillRenderer;
use crate::services::repository::Repositories;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Recomputes every derived field of a bill.
///
/// Order: line amounts, subtotal, discount, tax, total, balance, then
/// status. A bill is paid once `paid >= total`; otherwise partial if
/// anything was paid; otherwise it stays draft or sent. A past due date
/// turns anything but paid or cancelled into overdue.
pub fn finalize_bill(mut bill: Bill, now: DateTime<Utc>) -> Bill {
    for item in &mut bill.items {
        item.amount = round_money(item.quantity * item.rate);
    }

    let subtotal: Decimal = bill.items.iter().map(|i| i.amount).sum();
    let discount_amount = bill
        .discount
        .map(|d| round_money(d.amount_off(subtotal)))
        .unwrap_or(Decimal::ZERO);
    let taxable = subtotal - discount_amount;
    let tax_amount = round_money(taxable * bill.tax_rate / Decimal::ONE_HUNDRED);
    let total_amount = taxable + tax_amount;

    bill.subtotal = subtotal;
    bill.discount_amount = discount_amount;
    bill.tax_amount = tax_amount;
    bill.total_amount = total_amount;
    bill.paid_amount = round_money(bill.paid_amount.max(Decimal::ZERO));
    bill.balance_amount = (total_amount - bill.paid_amount).max(Decimal::ZERO);

    if bill.status == BillStatus::Cancelled {
        return bill;
    }

    if bill.paid_amount >= total_amount {
        bill.status = BillStatus::Paid;
        bill.balance_amount = Decimal::ZERO;
        bill.paid_utc.get_or_insert(now);
        return bill;
    }

    bill.paid_utc = None;
    bill.status = if bill.paid_amount > Decimal::ZERO {
        BillStatus::Partial
    } else if bill.sent_utc.is_some() {
        BillStatus::Sent
    } else {
        BillStatus::Draft
    };

    if bill.due_date < now.date_naive() {
        bill.status = BillStatus::Overdue;
    }
    bill
}

/// `BILL-{COMPANY}-{YYYYMM}`; COMPANY is the first eight hex digits of the company id.
pub fn bill_number_prefix(company_id: Uuid, at: DateTime<Utc>) -> String {
    format!("BILL-{}-{}", company_code(company_id), at.format("%Y%m"))
}

pub fn format_bill_number(prefix: &str, sequence: u64) -> String {
    format!("{}-{:04}", prefix, sequence)
}

pub(crate) fn company_code(company_id: Uuid) -> String {
    company_id.simple().to_string()[..8].to_uppercase()
}

fn validate_items(items: &[LineItem]) -> Result<()> {
    if items.is_empty() {
        return Err(BillingError::validation("at least one line item is required"));
    }
    for (index, item) in items.iter().enumerate() {
        if item.description.trim().is_empty() {
            return Err(BillingError::validation(format!(
                "items[{}].description is required",
                index
            )));
        }
        if item.quantity <= Decimal::ZERO {
            return Err(BillingError::validation(format!(
                "items[{}].quantity must be greater than 0",
                index
            )));
        }
        if item.rate < Decimal::ZERO {
            return Err(BillingError::validation(format!(
                "items[{}].rate must not be negative",
                index
            )));
        }
    }
    Ok(())
}

fn validate_tax_rate(rate: Decimal) -> Result<()> {
    if rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED {
        return Err(BillingError::validation("taxRate must be between 0 and 100"));
    }
    Ok(())
}

fn ensure_editable(bill: &Bill, action: &str) -> Result<()> {
    if bill.status.is_terminal() {
        return Err(BillingError::conflict(format!(
            "bill {} is {}; {} requires a bill that is not paid or cancelled",
            bill.bill_number,
            bill.status.as_str(),
            action
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct BillingDocumentService {
    repos: Repositories,
    clock: Arc<dyn Clock>,
    locks: RecordLocks,
    renderer: Arc<dyn BillRenderer>,
    default_tax_rate: Decimal,
}

impl BillingDocumentService {
    pub fn new(
        repos: Repositories,
        clock: Arc<dyn Clock>,
        locks: RecordLocks,
        renderer: Arc<dyn BillRenderer>,
        default_tax_rate: Decimal,
    ) -> Self {
        Self {
            repos,
            clock,
            locks,
            renderer,
            default_tax_rate,
        }
    }

    #[instrument(skip(self, input), fields(company_id = %input.company_id, client_id = %input.client_id))]
    pub async fn create(&self, input: CreateBill) -> Result<Bill> {
        validate_items(&input.items)?;
        let tax_rate = input.tax_rate.unwrap_or(self.default_tax_rate);
        validate_tax_rate(tax_rate)?;
        if let Some(discount) = &input.discount {
            validate_discount(discount)?;
        }

        let now = self.clock.now();
        let prefix = bill_number_prefix(input.company_id, now);
        let sequence = self.repos.bills.next_bill_sequence(&prefix).await?;

        let bill = finalize_bill(
            Bill {
                id: Uuid::new_v4(),
                company_id: input.company_id,
                client_id: input.client_id,
                bill_number: format_bill_number(&prefix, sequence),
                items: input.items,
                discount: input.discount,
                tax_rate,
                subtotal: Decimal::ZERO,
                discount_amount: Decimal::ZERO,
                tax_amount: Decimal::ZERO,
                total_amount: Decimal::ZERO,
                paid_amount: Decimal::ZERO,
                balance_amount: Decimal::ZERO,
                status: BillStatus::Draft,
                due_date: input.due_date,
                notes: input.notes,
                sent_utc: None,
                paid_utc: None,
                cancelled_utc: None,
                created_by: input.created_by,
                created_utc: now,
                updated_utc: now,
            },
            now,
        );
        self.repos.bills.insert_bill(&bill).await?;

        record_bill_operation(&bill.company_id.to_string(), "create");
        info!(
            bill_id = %bill.id,
            bill_number = %bill.bill_number,
            total_amount = %bill.total_amount,
            "Bill created"
        );
        Ok(bill)
    }

    pub async fn get(&self, company_id: Uuid, id: Uuid) -> Result<Bill> {
        self.repos
            .bills
            .get_bill(company_id, id)
            .await?
            .ok_or_else(|| BillingError::not_found("bill", id))
    }

    pub async fn list(&self, company_id: Uuid, filter: &ListBillsFilter) -> Result<Vec<Bill>> {
        self.repos.bills.list_bills(company_id, filter).await
    }

    pub async fn list_overdue(&self, company_id: Uuid, client_id: Option<Uuid>) -> Result<Vec<Bill>> {
        let filter = ListBillsFilter {
            client_id,
            status: Some(BillStatus::Overdue),
        };
        self.repos.bills.list_bills(company_id, &filter).await
    }

    #[instrument(skip(self, input), fields(bill_id = %id))]
    pub async fn update(&self, company_id: Uuid, id: Uuid, input: UpdateBill) -> Result<Bill> {
        let _guard = self.locks.lock(id).await;
        let mut bill = self.get(company_id, id).await?;
        ensure_editable(&bill, "editing")?;

        if let Some(items) = input.items {
            validate_items(&items)?;
            bill.items = items;
        }
        if let Some(due_date) = input.due_date {
            bill.due_date = due_date;
        }
        if let Some(tax_rate) = input.tax_rate {
            validate_tax_rate(tax_rate)?;
            bill.tax_rate = tax_rate;
        }
        if let Some(notes) = input.notes {
            bill.notes = Some(notes);
        }

        self.save(bill, "update").await
    }

    /// Only drafts may be deleted.
    #[instrument(skip(self), fields(bill_id = %id))]
    pub async fn delete(&self, company_id: Uuid, id: Uuid) -> Result<()> {
        let _guard = self.locks.lock(id).await;
        let bill = self.get(company_id, id).await?;
        if bill.status != BillStatus::Draft {
            return Err(BillingError::conflict(format!(
                "bill {} is {}; only draft bills can be deleted",
                bill.bill_number,
                bill.status.as_str()
            )));
        }
        self.repos.bills.delete_bill(company_id, id).await?;

        record_bill_operation(&company_id.to_string(), "delete");
        info!(bill_id = %id, "Bill deleted");
        Ok(())
    }

    #[instrument(skip(self), fields(bill_id = %id))]
    pub async fn send(&self, company_id: Uuid, id: Uuid) -> Result<Bill> {
        let _guard = self.locks.lock(id).await;
        let mut bill = self.get(company_id, id).await?;
        ensure_editable(&bill, "sending")?;

        bill.sent_utc.get_or_insert(self.clock.now());
        self.save(bill, "send").await
    }

    #[instrument(skip(self), fields(bill_id = %id))]
    pub async fn cancel(&self, company_id: Uuid, id: Uuid) -> Result<Bill> {
        let _guard = self.locks.lock(id).await;
        let mut bill = self.get(company_id, id).await?;
        ensure_editable(&bill, "cancellation")?;

        bill.status = BillStatus::Cancelled;
        bill.cancelled_utc = Some(self.clock.now());
        self.save(bill, "cancel").await
    }

    /// Replaces the discount (`None` removes it) and re-derives the totals.
    #[instrument(skip(self, discount), fields(bill_id = %id))]
    pub async fn apply_discount(
        &self,
        company_id: Uuid,
        id: Uuid,
        discount: Option<Discount>,
    ) -> Result<Bill> {
        if let Some(discount) = &discount {
            validate_discount(discount)?;
        }
        let _guard = self.locks.lock(id).await;
        let mut bill = self.get(company_id, id).await?;
        ensure_editable(&bill, "discounting")?;

        bill.discount = discount;
        self.save(bill, "discount").await
    }

    /// Returns `(content_type, file_name, bytes)`.
    pub async fn render(&self, company_id: Uuid, id: Uuid) -> Result<(&'static str, String, Vec<u8>)> {
        let bill = self.get(company_id, id).await?;
        let body = self.renderer.render(&bill)?;
        let file_name = format!("{}.{}", bill.bill_number, self.renderer.file_extension());
        Ok((self.renderer.content_type(), file_name, body))
    }

    /// Caller must hold the bill's lock.
    async fn save(&self, bill: Bill, operation: &str) -> Result<Bill> {
        let now = self.clock.now();
        let mut bill = finalize_bill(bill, now);
        bill.updated_utc = now;
        self.repos.bills.update_bill(&bill).await?;

        record_bill_operation(&bill.company_id.to_string(), operation);
        info!(
            bill_id = %bill.id,
            status = bill.status.as_str(),
            balance_amount = %bill.balance_amount,
            operation = operation,
            "Bill saved"
        );
        Ok(bill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn bill(items: Vec<LineItem>, due: NaiveDate) -> Bill {
        let now = at(2024, 1, 1);
        Bill {
            id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            bill_number: "BILL-TEST-202401-0001".into(),
            items,
            discount: None,
            tax_rate: Decimal::ZERO,
            subtotal: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            paid_amount: Decimal::ZERO,
            balance_amount: Decimal::ZERO,
            status: BillStatus::Draft,
            due_date: due,
            notes: None,
            sent_utc: None,
            paid_utc: None,
            cancelled_utc: None,
            created_by: Uuid::new_v4(),
            created_utc: now,
            updated_utc: now,
        }
    }

    fn future() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()
    }

    #[test]
    fn percentage_discount_and_tax() {
        let mut b = bill(
            vec![LineItem::new("Consulting", Decimal::from(2), Decimal::from(100))],
            future(),
        );
        b.tax_rate = Decimal::from(18);
        b.discount = Some(Discount::percentage(Decimal::from(10)));

        let b = finalize_bill(b, at(2024, 1, 2));
        assert_eq!(b.items[0].amount, Decimal::from(200));
        assert_eq!(b.subtotal, Decimal::from(200));
        assert_eq!(b.discount_amount, Decimal::from(20));
        assert_eq!(b.tax_amount, Decimal::new(324, 1));
        assert_eq!(b.total_amount, Decimal::new(2124, 1));
        assert_eq!(b.balance_amount, Decimal::new(2124, 1));
        assert_eq!(b.status, BillStatus::Draft);
    }

    #[test]
    fn client_supplied_amounts_are_ignored() {
        let mut item = LineItem::new("Hours", Decimal::from(3), Decimal::from(50));
        item.amount = Decimal::from(9999);
        let b = finalize_bill(bill(vec![item], future()), at(2024, 1, 2));
        assert_eq!(b.subtotal, Decimal::from(150));
    }

    #[test]
    fn full_payment_marks_paid_once() {
        let mut b = bill(
            vec![LineItem::new("Setup", Decimal::ONE, Decimal::from(1000))],
            future(),
        );
        b.paid_amount = Decimal::from(1000);
        let first = finalize_bill(b, at(2024, 1, 2));
        assert_eq!(first.status, BillStatus::Paid);
        assert_eq!(first.balance_amount, Decimal::ZERO);
        assert_eq!(first.paid_utc, Some(at(2024, 1, 2)));

        let again = finalize_bill(first, at(2024, 2, 2));
        assert_eq!(again.paid_utc, Some(at(2024, 1, 2)));
    }

    #[test]
    fn overpayment_keeps_balance_at_zero() {
        let mut b = bill(
            vec![LineItem::new("Setup", Decimal::ONE, Decimal::from(100))],
            future(),
        );
        b.paid_amount = Decimal::from(150);
        let b = finalize_bill(b, at(2024, 1, 2));
        assert_eq!(b.status, BillStatus::Paid);
        assert_eq!(b.balance_amount, Decimal::ZERO);
    }

    #[test]
    fn partial_payment_then_due_date_passes() {
        let due = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let mut b = bill(vec![LineItem::new("Setup", Decimal::ONE, Decimal::from(100))], due);
        b.paid_amount = Decimal::from(40);

        let before = finalize_bill(b, at(2024, 1, 10));
        assert_eq!(before.status, BillStatus::Partial);
        assert_eq!(before.balance_amount, Decimal::from(60));

        let after = finalize_bill(before, at(2024, 1, 11));
        assert_eq!(after.status, BillStatus::Overdue);
    }

    #[test]
    fn sent_bill_keeps_sent_without_payments() {
        let mut b = bill(
            vec![LineItem::new("Setup", Decimal::ONE, Decimal::from(100))],
            future(),
        );
        b.sent_utc = Some(at(2024, 1, 1));
        b.status = BillStatus::Sent;
        let b = finalize_bill(b, at(2024, 1, 2));
        assert_eq!(b.status, BillStatus::Sent);
    }

    #[test]
    fn cancelled_bill_is_never_overdue() {
        let due = NaiveDate::from_ymd_opt(2023, 12, 1).unwrap();
        let mut b = bill(vec![LineItem::new("Setup", Decimal::ONE, Decimal::from(100))], due);
        b.status = BillStatus::Cancelled;
        let b = finalize_bill(b, at(2024, 1, 2));
        assert_eq!(b.status, BillStatus::Cancelled);
    }

    #[test]
    fn fixed_discount_is_capped_at_subtotal() {
        let mut b = bill(
            vec![LineItem::new("Setup", Decimal::ONE, Decimal::from(100))],
            future(),
        );
        b.discount = Some(Discount::fixed(Decimal::from(250)));
        b.paid_amount = Decimal::ZERO;
        let b = finalize_bill(b, at(2024, 1, 2));
        assert_eq!(b.discount_amount, Decimal::from(100));
        assert_eq!(b.total_amount, Decimal::ZERO);
    }

    #[test]
    fn bill_numbers_are_scoped_by_company_and_month() {
        let company = Uuid::parse_str("0a1b2c3d-0000-4000-8000-000000000000").unwrap();
        let prefix = bill_number_prefix(company, at(2024, 3, 5));
        assert_eq!(prefix, "BILL-0A1B2C3D-202403");
        assert_eq!(format_bill_number(&prefix, 7), "BILL-0A1B2C3D-202403-0007");
    }

    #[test]
    fn items_are_validated() {
        assert!(validate_items(&[]).is_err());
        assert!(validate_items(&[LineItem::new("x", Decimal::ZERO, Decimal::ONE)]).is_err());
        assert!(validate_items(&[LineItem::new("x", Decimal::ONE, Decimal::NEGATIVE_ONE)]).is_err());
        assert!(validate_items(&[LineItem::new("x", Decimal::ONE, Decimal::ZERO)]).is_ok());
    }
}
