//! Bill rendering. Real PDF generation lives outside this service.

use crate::error::Result;
use crate::models::Bill;

pub trait BillRenderer: Send + Sync {
    fn content_type(&self) -> &'static str;
    fn file_extension(&self) -> &'static str;
    fn render(&self, bill: &Bill) -> Result<Vec<u8>>;
}

/// Fixed-width plain-text statement.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextRenderer;

impl BillRenderer for PlainTextRenderer {
    fn content_type(&self) -> &'static str {
        "text/plain; charset=utf-8"
    }

    fn file_extension(&self) -> &'static str {
        "txt"
    }

    fn render(&self, bill: &Bill) -> Result<Vec<u8>> {
        let mut out = String::new();
        out.push_str(&format!("BILL {}\n", bill.bill_number));
        out.push_str(&format!("Status:   {}\n", bill.status.as_str()));
        out.push_str(&format!("Due date: {}\n", bill.due_date));
        out.push_str(&"-".repeat(64));
        out.push('\n');
        out.push_str(&format!(
            "{:<30} {:>8} {:>10} {:>12}\n",
            "Description", "Qty", "Rate", "Amount"
        ));
        for item in &bill.items {
            out.push_str(&format!(
                "{:<30} {:>8} {:>10} {:>12}\n",
                truncate(&item.description, 30),
                item.quantity,
                item.rate,
                item.amount
            ));
        }
        out.push_str(&"-".repeat(64));
        out.push('\n');

        let totals = [
            ("Subtotal", bill.subtotal),
            ("Discount", bill.discount_amount),
            ("Tax", bill.tax_amount),
            ("Total", bill.total_amount),
            ("Paid", bill.paid_amount),
            ("Balance", bill.balance_amount),
        ];
        for (label, amount) in totals {
            out.push_str(&format!("{:>51} {:>12}\n", label, amount));
        }
        if let Some(notes) = &bill.notes {
            out.push_str(&format!("\nNotes: {}\n", notes));
        }
        Ok(out.into_bytes())
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max - 1).chain(std::iter::once('~')).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_descriptions_are_cut() {
        assert_eq!(truncate("abcdef", 4), "abc~");
        assert_eq!(truncate("abc", 4), "abc");
    }
}
