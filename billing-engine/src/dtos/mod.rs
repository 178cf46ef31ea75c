//! Request bodies and query parameters. JSON is camelCase on the wire;
//! responses reuse the model types directly.

mod billing;
mod catalog;
mod payments;

pub use billing::*;
pub use catalog::*;
pub use payments::*;

use crate::error::BillingError;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use uuid::Uuid;
use validator::ValidationError;

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
pub(crate) fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

pub(crate) fn non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO {
        return Err(ValidationError::new("must_not_be_negative"));
    }
    Ok(())
}

pub(crate) fn positive(value: &Decimal) -> Result<(), ValidationError> {
    if *value <= Decimal::ZERO {
        return Err(ValidationError::new("must_be_positive"));
    }
    Ok(())
}

/// Pulls a `#[validate(required)]` field out after validation has run.
pub(crate) fn present<T>(value: Option<T>, field: &str) -> Result<T, BillingError> {
    value.ok_or_else(|| BillingError::validation(format!("{} is required", field)))
}

/// Parses `a,b,c` into ids, naming the first bad one.
pub fn parse_id_list(raw: &str) -> Result<Vec<Uuid>, BillingError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Uuid::parse_str(s).map_err(|_| BillingError::validation(format!("invalid id: {}", s)))
        })
        .collect()
}
