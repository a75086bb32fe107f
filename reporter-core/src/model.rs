//! Report data types: transactions in, report model and rendered report out.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::insights::{BudgetHealth, Insight};

/// A single ledger entry as returned by a data provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    /// Provider-assigned identifier, unique within a fetch
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Positive = income, negative = expense
    pub amount: Decimal,
    /// Raw category label; normalized during aggregation
    pub category: String,
    pub description: String,
}

impl Transaction {
    pub fn new(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        amount: Decimal,
        category: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            amount,
            category: category.into(),
            description: description.into(),
        }
    }

    /// Returns true if this is an expense (negative amount)
    pub fn is_expense(&self) -> bool {
        self.amount.is_sign_negative() && !self.amount.is_zero()
    }

    /// Returns true if this is income (positive amount)
    pub fn is_income(&self) -> bool {
        self.amount.is_sign_positive() && !self.amount.is_zero()
    }
}

/// Half-open reporting interval `[start, end)` and its idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// ISO week of the local start date, e.g. `2026-W42`
    pub period_id: String,
}

impl Window {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

/// Compact view of one transaction for the report body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionLine {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub amount: Decimal,
    pub category: String,
    pub description: String,
}

/// Aggregated figures for one window.
///
/// `total` always equals the sum of `by_category`, and `income + expenses`.
/// `delta` is present exactly when `prior_window_total` is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportModel {
    pub window: Window,
    pub total: Decimal,
    pub by_category: BTreeMap<String, Decimal>,
    pub prior_window_total: Option<Decimal>,
    pub delta: Option<Decimal>,

    pub income: Decimal,
    /// Sum of negative amounts (itself negative or zero)
    pub expenses: Decimal,
    pub transaction_count: usize,
    pub uncategorized_count: usize,
    /// Largest expenses, biggest first
    pub largest: Vec<TransactionLine>,
    /// Every transaction in the window, oldest first
    #[serde(default)]
    pub lines: Vec<TransactionLine>,

    #[serde(default)]
    pub insights: Vec<Insight>,
    #[serde(default)]
    pub budget: Option<BudgetHealth>,
}

impl ReportModel {
    pub fn is_empty(&self) -> bool {
        self.transaction_count == 0
    }

    /// Spending per category as positive numbers, for expense-only comparisons.
    pub fn spend_by_category(&self) -> BTreeMap<String, Decimal> {
        self.by_category
            .iter()
            .filter(|(_, v)| v.is_sign_negative() && !v.is_zero())
            .map(|(k, v)| (k.clone(), -*v))
            .collect()
    }
}

/// Formatted report ready for a delivery sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenderedReport {
    pub window: Window,
    pub body: String,
    /// Lowercase hex SHA-256 of `body`
    pub content_hash: String,
}

/// Acknowledgement returned by a sink after a successful delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub sink: String,
    /// Sink-specific handle (file path, message hash, ...)
    pub reference: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_transaction_sign_helpers() {
        let at = Utc.with_ymd_and_hms(2026, 2, 18, 12, 0, 0).unwrap();
        let spend = Transaction::new("t-1", at, dec!(-45.10), "Food", "Groceries");
        assert!(spend.is_expense());
        assert!(!spend.is_income());

        let zero = Transaction::new("t-2", at, dec!(0), "Food", "Voided");
        assert!(!zero.is_expense());
        assert!(!zero.is_income());
    }

    #[test]
    fn test_window_is_half_open() {
        let start = Utc.with_ymd_and_hms(2026, 2, 16, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 2, 23, 0, 0, 0).unwrap();
        let w = Window { start, end, period_id: "2026-W08".into() };
        assert!(w.contains(start));
        assert!(!w.contains(end));
    }
}
