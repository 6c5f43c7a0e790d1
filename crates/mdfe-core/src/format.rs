//! # Canonical Field Formatting
//!
//! The transmission agent is order- and format-sensitive: every payload
//! must render a given value identically on every call. These helpers are
//! the single formatting path for the whole stack — builders must not
//! format dates or amounts by hand.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

/// Render a monetary amount with exactly two decimal places.
/// Midpoints round away from zero, per fiscal convention.
pub fn format_currency(value: Decimal) -> String {
    format!(
        "{:.2}",
        value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    )
}

/// Render a weight with exactly three decimal places.
pub fn format_weight(value: Decimal) -> String {
    format!(
        "{:.3}",
        value.round_dp_with_strategy(3, RoundingStrategy::MidpointAwayFromZero)
    )
}

/// Render a calendar date in the canonical `YYYY-MM-DD` form.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Render an instant in RFC 3339 with second precision, UTC.
pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}
