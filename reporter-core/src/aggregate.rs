//! Aggregator: folds a window's transactions into a [`ReportModel`].
//!
//! Pure and deterministic. Money is summed with exact decimals; any overflow
//! or malformed record is a data-integrity failure rather than a silent drift.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};

use crate::category::{normalize_category, UNCATEGORIZED};
use crate::error::{ReportError, Result};
use crate::model::{ReportModel, Transaction, TransactionLine, Window};

/// How many of the biggest expenses the model keeps for the report body.
pub const LARGEST_EXPENSES: usize = 5;

pub fn aggregate(
    transactions: &[Transaction],
    window: &Window,
    prior_total: Option<Decimal>,
) -> Result<ReportModel> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut by_category: BTreeMap<String, Decimal> = BTreeMap::new();
    let mut total = Decimal::ZERO;
    let mut income = Decimal::ZERO;
    let mut expenses = Decimal::ZERO;
    let mut transaction_count = 0;
    let mut uncategorized_count = 0;
    let mut lines: Vec<TransactionLine> = Vec::new();

    // Providers should already filter by window; re-check so a sloppy adapter
    // cannot leak neighbouring weeks into the totals.
    for txn in transactions.iter().filter(|t| window.contains(t.timestamp)) {
        if txn.id.trim().is_empty() {
            return Err(ReportError::integrity(format!(
                "transaction at {} has no id",
                txn.timestamp.to_rfc3339()
            )));
        }
        if !seen.insert(txn.id.as_str()) {
            return Err(ReportError::integrity(format!(
                "duplicate transaction id: {}",
                txn.id
            )));
        }

        let key = normalize_category(&txn.category);
        if key == UNCATEGORIZED {
            uncategorized_count += 1;
        }

        let slot = by_category.entry(key.clone()).or_insert(Decimal::ZERO);
        *slot = checked_add(*slot, txn.amount, &txn.id)?;
        total = checked_add(total, txn.amount, &txn.id)?;

        if txn.is_income() {
            income = checked_add(income, txn.amount, &txn.id)?;
        } else if txn.is_expense() {
            expenses = checked_add(expenses, txn.amount, &txn.id)?;
        }

        lines.push(TransactionLine {
            id: txn.id.clone(),
            timestamp: txn.timestamp,
            amount: txn.amount,
            category: key,
            description: txn.description.trim().to_string(),
        });
        transaction_count += 1;
    }

    lines.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));

    // Biggest spend first; ties broken by time then id for a stable order.
    let mut largest: Vec<TransactionLine> = lines.iter().filter(|l| l.amount < Decimal::ZERO).cloned().collect();
    largest.sort_by(|a, b| {
        a.amount
            .cmp(&b.amount)
            .then(a.timestamp.cmp(&b.timestamp))
            .then(a.id.cmp(&b.id))
    });
    largest.truncate(LARGEST_EXPENSES);

    let delta = match prior_total {
        Some(prior) => Some(
            total
                .checked_sub(prior)
                .ok_or_else(|| ReportError::integrity("delta against prior window overflows"))?,
        ),
        None => None,
    };

    Ok(ReportModel {
        window: window.clone(),
        total,
        by_category,
        prior_window_total: prior_total,
        delta,
        income,
        expenses,
        transaction_count,
        uncategorized_count,
        largest,
        lines,
        insights: Vec::new(),
        budget: None,
    })
}

fn checked_add(acc: Decimal, amount: Decimal, id: &str) -> Result<Decimal> {
    acc.checked_add(amount)
        .ok_or_else(|| ReportError::integrity(format!("amount overflow while adding transaction {id}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn window() -> Window {
        Window {
            start: Utc.with_ymd_and_hms(2026, 2, 16, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 2, 23, 0, 0, 0).unwrap(),
            period_id: "2026-W08".to_string(),
        }
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, day, hour, 0, 0).unwrap()
    }

    fn txn(id: &str, when: DateTime<Utc>, amount: Decimal, category: &str) -> Transaction {
        Transaction::new(id, when, amount, category, format!("desc {id}"))
    }

    #[test]
    fn test_food_and_refund_scenario() {
        let txns = vec![
            txn("a", at(17, 10), dec!(50), "Food"),
            txn("b", at(18, 10), dec!(-20), "Refund"),
        ];
        let model = aggregate(&txns, &window(), None).unwrap();

        assert_eq!(model.total, dec!(30));
        assert_eq!(model.by_category.len(), 2);
        assert_eq!(model.by_category["food"], dec!(50));
        assert_eq!(model.by_category["refund"], dec!(-20));
        assert_eq!(model.prior_window_total, None);
        assert_eq!(model.delta, None);
        assert_eq!(model.income, dec!(50));
        assert_eq!(model.expenses, dec!(-20));
    }

    #[test]
    fn test_empty_input_is_zero_not_failure() {
        let model = aggregate(&[], &window(), None).unwrap();
        assert_eq!(model.total, Decimal::ZERO);
        assert!(model.by_category.is_empty());
        assert_eq!(model.delta, None);
        assert!(model.is_empty());
    }

    #[test]
    fn test_total_matches_category_sum() {
        let amounts = [
            dec!(12.34), dec!(-0.01), dec!(-999.99), dec!(0.10), dec!(0.20),
            dec!(-45.67), dec!(1500.00), dec!(-3.333), dec!(7),
        ];
        let cats = ["Food", "food ", "Rent", "", "Fun", "FUN", "Salary", "Misc", " misc"];
        let txns: Vec<Transaction> = amounts
            .iter()
            .zip(cats.iter())
            .enumerate()
            .map(|(i, (a, c))| txn(&format!("t{i}"), at(16, 0) + Duration::hours(i as i64 * 7), *a, c))
            .collect();

        let model = aggregate(&txns, &window(), Some(dec!(100))).unwrap();
        let sum: Decimal = model.by_category.values().copied().sum();
        assert_eq!(sum, model.total);
        assert_eq!(model.income + model.expenses, model.total);
        assert_eq!(model.delta, Some(model.total - dec!(100)));
        assert_eq!(model.by_category["fun"], dec!(-45.47));
        assert_eq!(model.uncategorized_count, 1);
    }

    #[test]
    fn test_out_of_window_transactions_are_excluded() {
        let w = window();
        let txns = vec![
            txn("before", w.start - Duration::seconds(1), dec!(-500), "Rent"),
            txn("first", w.start, dec!(-10), "Food"),
            txn("last", w.end - Duration::seconds(1), dec!(-5), "Food"),
            txn("after", w.end, dec!(-700), "Rent"),
        ];
        let model = aggregate(&txns, &w, None).unwrap();
        assert_eq!(model.transaction_count, 2);
        assert_eq!(model.total, dec!(-15));
        assert!(!model.by_category.contains_key("rent"));
    }

    #[test]
    fn test_delta_against_prior_total() {
        let txns = vec![txn("a", at(17, 9), dec!(-80), "Food")];
        let model = aggregate(&txns, &window(), Some(dec!(-100))).unwrap();
        assert_eq!(model.prior_window_total, Some(dec!(-100)));
        assert_eq!(model.delta, Some(dec!(20)));
    }

    #[test]
    fn test_largest_expenses_ordered() {
        let txns: Vec<Transaction> = (1..=7)
            .map(|i| txn(&format!("t{i}"), at(17, i), Decimal::from(-(i as i64) * 10), "Shop"))
            .chain(std::iter::once(txn("pay", at(18, 1), dec!(2000), "Salary")))
            .collect();
        let model = aggregate(&txns, &window(), None).unwrap();
        assert_eq!(model.largest.len(), LARGEST_EXPENSES);
        assert_eq!(model.largest[0].id, "t7");
        assert_eq!(model.largest[4].id, "t3");
        assert!(model.largest.iter().all(|l| l.amount < Decimal::ZERO));
        assert_eq!(model.lines.len(), 8);
    }

    #[test]
    fn test_duplicate_ids_are_integrity_errors() {
        let txns = vec![
            txn("dup", at(17, 1), dec!(-1), "Food"),
            txn("dup", at(17, 2), dec!(-1), "Food"),
        ];
        let err = aggregate(&txns, &window(), None).unwrap_err();
        assert!(matches!(err, ReportError::DataIntegrity(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_overflow_is_integrity_error() {
        let txns = vec![
            txn("a", at(17, 1), Decimal::MAX, "Food"),
            txn("b", at(17, 2), Decimal::MAX, "Food"),
        ];
        let err = aggregate(&txns, &window(), None).unwrap_err();
        assert!(matches!(err, ReportError::DataIntegrity(_)));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        const CATEGORIES: [&str; 5] = ["Food", " food", "Rent", "", "Salary"];

        fn transactions() -> impl Strategy<Value = Vec<Transaction>> {
            prop::collection::vec(
                (-5_000_000i64..5_000_000, 0..CATEGORIES.len(), -86_400i64..8 * 86_400),
                0..40,
            )
            .prop_map(|rows| {
                let start = window().start;
                rows.into_iter()
                    .enumerate()
                    .map(|(i, (cents, cat, secs))| {
                        txn(&format!("t{i}"), start + Duration::seconds(secs), Decimal::new(cents, 2), CATEGORIES[cat])
                    })
                    .collect()
            })
        }

        proptest! {
            #[test]
            fn totals_always_balance(
                txns in transactions(),
                prior in proptest::option::of(-5_000_000i64..5_000_000),
            ) {
                let w = window();
                let prior = prior.map(|c| Decimal::new(c, 2));
                let model = aggregate(&txns, &w, prior).unwrap();

                let sum: Decimal = model.by_category.values().copied().sum();
                prop_assert_eq!(sum, model.total);
                prop_assert_eq!(model.income + model.expenses, model.total);
                prop_assert_eq!(model.delta, prior.map(|p| model.total - p));
                prop_assert_eq!(
                    model.transaction_count,
                    txns.iter().filter(|t| w.contains(t.timestamp)).count()
                );
                prop_assert_eq!(model.lines.len(), model.transaction_count);
            }
        }
    }
}
