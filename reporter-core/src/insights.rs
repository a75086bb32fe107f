//! Rule-based insights layered on top of an aggregated week.
//!
//! Everything here is deterministic arithmetic over [`ReportModel`]s: week over
//! week spending swings, unusually large expenses, piles of uncategorized
//! transactions and a simple monthly budget projection.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::category::{display_category, normalize_category};
use crate::model::ReportModel;
use crate::render::format_money;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    SpendingSpike,
    SpendingDrop,
    CategorySpike,
    LargeTransaction,
    UncategorizedCluster,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Insight {
    pub kind: InsightKind,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BudgetStatus {
    Healthy,
    Warning,
    Critical,
    Unknown,
}

/// Monthly budget projection from one week of spending.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BudgetHealth {
    pub status: BudgetStatus,
    pub projected_monthly: Decimal,
    pub total_budget: Decimal,
    pub remaining: Decimal,
}

/// Thresholds and budget inputs for [`annotate`].
#[derive(Debug, Clone, PartialEq)]
pub struct InsightPolicy {
    /// Relative week-over-week change that counts as a spike or drop (0.30 = 30%)
    pub spike_ratio: Decimal,
    /// Absolute amount at or above which a single transaction is called out
    pub large_transaction: Decimal,
    /// More uncategorized transactions than this raises a warning
    pub uncategorized_limit: usize,
    /// Monthly budget per category (positive amounts); empty disables health
    pub monthly_budget: BTreeMap<String, Decimal>,
    pub currency_symbol: String,
}

impl Default for InsightPolicy {
    fn default() -> Self {
        Self {
            spike_ratio: Decimal::new(30, 2),
            large_transaction: Decimal::from(100),
            uncategorized_limit: 5,
            monthly_budget: BTreeMap::new(),
            currency_symbol: "$".to_string(),
        }
    }
}

/// Weeks per month used for the budget projection.
const WEEKS_PER_MONTH: i64 = 4;

/// Attach insights and budget health to an aggregated model.
pub fn annotate(mut model: ReportModel, prior: Option<&ReportModel>, policy: &InsightPolicy) -> ReportModel {
    model.insights = detect_anomalies(&model, prior, policy);
    model.budget = budget_health(-model.expenses, &policy.monthly_budget);
    model
}

pub fn detect_anomalies(current: &ReportModel, prior: Option<&ReportModel>, policy: &InsightPolicy) -> Vec<Insight> {
    let sym = policy.currency_symbol.as_str();
    let mut out = Vec::new();

    if current.uncategorized_count > policy.uncategorized_limit {
        out.push(Insight {
            kind: InsightKind::UncategorizedCluster,
            severity: Severity::Medium,
            message: format!(
                "{} uncategorized transactions this week, worth a review",
                current.uncategorized_count
            ),
        });
    }

    for line in current.lines.iter().filter(|l| l.amount.abs() >= policy.large_transaction) {
        let label = if line.amount < Decimal::ZERO { "expense" } else { "income" };
        out.push(Insight {
            kind: InsightKind::LargeTransaction,
            severity: Severity::Low,
            message: format!(
                "Large {label}: {} {}",
                line.description,
                format_money(line.amount.abs(), sym)
            ),
        });
    }

    let Some(prior) = prior else {
        return out;
    };

    let spend_now = -current.expenses;
    let spend_before = -prior.expenses;
    if let Some(ratio) = change_ratio(spend_now, spend_before) {
        if ratio > policy.spike_ratio {
            out.push(Insight {
                kind: InsightKind::SpendingSpike,
                severity: Severity::High,
                message: format!("Spending up {} versus last week", percent(ratio)),
            });
        } else if ratio < -policy.spike_ratio {
            out.push(Insight {
                kind: InsightKind::SpendingDrop,
                severity: Severity::Low,
                message: format!("Spending down {} versus last week", percent(-ratio)),
            });
        }
    }

    let before = prior.spend_by_category();
    for (category, now) in current.spend_by_category() {
        let Some(prev) = before.get(&category) else {
            continue;
        };
        if let Some(ratio) = change_ratio(now, *prev) {
            if ratio > policy.spike_ratio {
                out.push(Insight {
                    kind: InsightKind::CategorySpike,
                    severity: Severity::Medium,
                    message: format!(
                        "{} spending jumped: {} vs {} last week",
                        display_category(&category),
                        format_money(now, sym),
                        format_money(*prev, sym)
                    ),
                });
            }
        }
    }

    out
}

/// Project a week of spending to a month and compare with the budget.
///
/// Figures too large for a `Decimal` give `BudgetStatus::Unknown` with
/// zeroed amounts instead of a partial projection.
pub fn budget_health(weekly_spend: Decimal, monthly_budget: &BTreeMap<String, Decimal>) -> Option<BudgetHealth> {
    if monthly_budget.is_empty() {
        return None;
    }

    let projection = monthly_budget
        .values()
        .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(*v))
        .and_then(|total_budget| {
            let projected = weekly_spend.checked_mul(Decimal::from(WEEKS_PER_MONTH))?;
            let remaining = total_budget.checked_sub(projected)?;
            Some((total_budget, projected, remaining))
        });
    let Some((total_budget, projected_monthly, remaining)) = projection else {
        return Some(BudgetHealth {
            status: BudgetStatus::Unknown,
            projected_monthly: Decimal::ZERO,
            total_budget: Decimal::ZERO,
            remaining: Decimal::ZERO,
        });
    };

    let status = match projected_monthly.checked_div(total_budget) {
        _ if total_budget <= Decimal::ZERO => BudgetStatus::Unknown,
        Some(r) if r < Decimal::new(8, 1) => BudgetStatus::Healthy,
        Some(r) if r < Decimal::ONE => BudgetStatus::Warning,
        Some(_) => BudgetStatus::Critical,
        None => BudgetStatus::Unknown,
    };

    Some(BudgetHealth {
        status,
        projected_monthly,
        total_budget,
        remaining,
    })
}

/// Normalize budget keys the same way transaction categories are.
///
/// Keys that merge into an overflowing sum are saturated at `Decimal::MAX`.
pub fn normalize_budget(raw: BTreeMap<String, Decimal>) -> BTreeMap<String, Decimal> {
    let mut out = BTreeMap::new();
    for (k, v) in raw {
        let slot = out.entry(normalize_category(&k)).or_insert(Decimal::ZERO);
        *slot = slot.saturating_add(v);
    }
    out
}

fn change_ratio(now: Decimal, before: Decimal) -> Option<Decimal> {
    if before <= Decimal::ZERO {
        return None;
    }
    now.checked_sub(before)?.checked_div(before)
}

fn percent(ratio: Decimal) -> String {
    match ratio.checked_mul(Decimal::ONE_HUNDRED) {
        Some(p) => format!("{}%", p.round()),
        None => format!("{}x", ratio.round()),
    }
}
