//! Field parsers shared by the providers.
//!
//! Statement exports disagree on formats, so these accept the common shapes:
//! `1,234.56`, `$-12.00`, `(12.00)` for amounts, and RFC 3339, `YYYY-MM-DD`
//! or `MM/DD/YYYY` for dates. Date-only values mean local midnight.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use reporter_core::{start_of_day_utc, ReportError, Result};
use rust_decimal::Decimal;
use std::str::FromStr;

pub fn parse_amount(raw: &str) -> Result<Decimal> {
    let trimmed = raw.trim();
    let (negated, body) = match trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => (true, inner),
        None => (false, trimmed),
    };
    let cleaned: String = body
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | '€' | '£' | ' '))
        .collect();
    if cleaned.is_empty() {
        return Err(ReportError::integrity(format!("empty amount: {raw:?}")));
    }

    let value = Decimal::from_str(&cleaned)
        .map_err(|e| ReportError::integrity(format!("unparseable amount {raw:?}: {e}")))?;
    Ok(if negated { -value } else { value })
}

pub fn parse_timestamp(raw: &str, tz: &Tz) -> Result<DateTime<Utc>> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(start_of_day_utc(d, tz));
        }
    }
    Err(ReportError::integrity(format!("unparseable date: {raw:?}")))
}

/// Convert integer minor units (cents) to a decimal amount.
pub fn from_minor_units(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}
