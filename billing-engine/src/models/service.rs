//! Sellable service model and billing cycles.

use chrono::{DateTime, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Cadence at which a subscription rebills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BillingCycle {
    Monthly,
    Quarterly,
    HalfYearly,
    Yearly,
    OneTime,
}

impl BillingCycle {
    pub const ALL: [BillingCycle; 5] = [
        BillingCycle::Monthly,
        BillingCycle::Quarterly,
        BillingCycle::HalfYearly,
        BillingCycle::Yearly,
        BillingCycle::OneTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Quarterly => "quarterly",
            BillingCycle::HalfYearly => "half-yearly",
            BillingCycle::Yearly => "yearly",
            BillingCycle::OneTime => "one-time",
        }
    }

    /// Length of one period in months; `None` for one-time purchases.
    pub fn months(&self) -> Option<u32> {
        match self {
            BillingCycle::Monthly => Some(1),
            BillingCycle::Quarterly => Some(3),
            BillingCycle::HalfYearly => Some(6),
            BillingCycle::Yearly => Some(12),
            BillingCycle::OneTime => None,
        }
    }

    /// The date one full period after `start`, clamped to month end.
    pub fn advance(&self, start: NaiveDate) -> Option<NaiveDate> {
        self.months()
            .and_then(|m| start.checked_add_months(Months::new(m)))
    }
}

impl fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Renders a cycle set as `monthly, yearly` for error messages.
pub fn describe_cycles(cycles: &BTreeSet<BillingCycle>) -> String {
    if cycles.is_empty() {
        return "none".to_string();
    }
    cycles
        .iter()
        .map(BillingCycle::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// A sellable unit owned by a company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub base_price: Decimal,
    pub allowed_cycles: BTreeSet<BillingCycle>,
    #[serde(default)]
    pub features: Vec<String>,
    pub is_active: bool,
    pub created_by: Uuid,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for creating a service.
#[derive(Debug, Clone)]
pub struct CreateService {
    pub company_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub base_price: Decimal,
    pub allowed_cycles: BTreeSet<BillingCycle>,
    pub features: Vec<String>,
    pub created_by: Uuid,
}

/// Input for updating a service.
#[derive(Debug, Clone, Default)]
pub struct UpdateService {
    pub name: Option<String>,
    pub description: Option<String>,
    pub base_price: Option<Decimal>,
    pub allowed_cycles: Option<BTreeSet<BillingCycle>>,
    pub features: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn advance_adds_calendar_months() {
        let start = date(2024, 1, 15);
        assert_eq!(BillingCycle::Monthly.advance(start), Some(date(2024, 2, 15)));
        assert_eq!(BillingCycle::Quarterly.advance(start), Some(date(2024, 4, 15)));
        assert_eq!(BillingCycle::HalfYearly.advance(start), Some(date(2024, 7, 15)));
        assert_eq!(BillingCycle::Yearly.advance(start), Some(date(2025, 1, 15)));
        assert_eq!(BillingCycle::OneTime.advance(start), None);
    }

    #[test]
    fn advance_clamps_to_month_end() {
        assert_eq!(
            BillingCycle::Monthly.advance(date(2024, 1, 31)),
            Some(date(2024, 2, 29))
        );
    }

    #[test]
    fn cycles_use_kebab_case_on_the_wire() {
        let json = serde_json::to_string(&BillingCycle::HalfYearly).unwrap();
        assert_eq!(json, "\"half-yearly\"");
        let parsed: BillingCycle = serde_json::from_str("\"one-time\"").unwrap();
        assert_eq!(parsed, BillingCycle::OneTime);
    }
}
