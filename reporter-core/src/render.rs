//! Renderer: turns a [`ReportModel`] into Markdown suited to a chat webhook.
//!
//! Output is byte-for-byte deterministic for equal models, so the SHA-256 of
//! the body can be used downstream to deduplicate deliveries.

use chrono::Duration;
use chrono_tz::Tz;
use rust_decimal::{Decimal, RoundingStrategy};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

use crate::category::display_category;
use crate::insights::BudgetStatus;
use crate::model::{RenderedReport, ReportModel};

#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub title: String,
    pub currency_symbol: String,
    /// Zone used to print the window's calendar dates
    pub timezone: Tz,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            title: "Weekly budget report".to_string(),
            currency_symbol: "$".to_string(),
            timezone: Tz::UTC,
        }
    }
}

pub const EMPTY_PERIOD_LINE: &str = "No transactions recorded this period.";

pub fn render(model: &ReportModel, opts: &RenderOptions) -> RenderedReport {
    let body = render_body(model, opts);
    RenderedReport {
        window: model.window.clone(),
        content_hash: content_hash(&body),
        body,
    }
}

/// Lowercase hex SHA-256.
pub fn content_hash(body: &str) -> String {
    format!("{:x}", Sha256::digest(body.as_bytes()))
}

/// Two-decimal money with the sign in front of the symbol: `-$20.00`.
pub fn format_money(amount: Decimal, symbol: &str) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    if rounded.is_sign_negative() && !rounded.is_zero() {
        format!("-{symbol}{:.2}", rounded.abs())
    } else {
        format!("{symbol}{:.2}", rounded.abs())
    }
}

fn signed_money(amount: Decimal, symbol: &str) -> String {
    if amount > Decimal::ZERO {
        format!("+{}", format_money(amount, symbol))
    } else {
        format_money(amount, symbol)
    }
}

// `write!` into a String cannot fail; results are ignored throughout.
fn render_body(model: &ReportModel, opts: &RenderOptions) -> String {
    let sym = opts.currency_symbol.as_str();
    let first_day = model.window.start.with_timezone(&opts.timezone).date_naive();
    let last_day = (model.window.end - Duration::seconds(1))
        .with_timezone(&opts.timezone)
        .date_naive();

    let mut s = String::new();
    let _ = writeln!(s, "# {}", opts.title);
    let _ = writeln!(
        s,
        "**{} ~ {}** ({})",
        first_day.format("%Y-%m-%d"),
        last_day.format("%Y-%m-%d"),
        model.window.period_id
    );
    s.push('\n');

    if model.is_empty() {
        let _ = writeln!(s, "{EMPTY_PERIOD_LINE}");
    } else {
        s.push_str("## Summary\n");
        let _ = writeln!(s, "- Income: **{}**", format_money(model.income, sym));
        let _ = writeln!(s, "- Spending: **{}**", format_money(-model.expenses, sym));
        let _ = writeln!(s, "- Net: **{}**", format_money(model.total, sym));
        let _ = writeln!(s, "- Transactions: {}", model.transaction_count);
    }

    match (model.prior_window_total, model.delta) {
        (Some(prior), Some(delta)) if delta.is_zero() => {
            let _ = writeln!(s, "- Versus last week: no change (net {})", format_money(prior, sym));
        }
        (Some(prior), Some(delta)) => {
            let _ = writeln!(
                s,
                "- Versus last week: {} (net {} last week)",
                signed_money(delta, sym),
                format_money(prior, sym)
            );
        }
        _ => {
            let _ = writeln!(s, "- Versus last week: no prior data");
        }
    }

    if !model.by_category.is_empty() {
        s.push_str("\n## By category\n");
        let mut rows: Vec<(&String, &Decimal)> = model.by_category.iter().collect();
        rows.sort_by(|a, b| b.1.abs().cmp(&a.1.abs()).then(a.0.cmp(b.0)));
        for (i, (cat, amount)) in rows.iter().enumerate() {
            let _ = writeln!(s, "{}. {}: {}", i + 1, display_category(cat), format_money(**amount, sym));
        }
    }

    if !model.largest.is_empty() {
        s.push_str("\n## Largest expenses\n");
        for (i, line) in model.largest.iter().enumerate() {
            let day = line.timestamp.with_timezone(&opts.timezone).date_naive();
            let _ = writeln!(
                s,
                "{}. {} {} ({}, {})",
                i + 1,
                line.description,
                format_money(line.amount.abs(), sym),
                display_category(&line.category),
                day.format("%m-%d")
            );
        }
    }

    if let Some(budget) = &model.budget {
        let label = match budget.status {
            BudgetStatus::Healthy => "on track",
            BudgetStatus::Warning => "running hot",
            BudgetStatus::Critical => "projected overspend",
            BudgetStatus::Unknown => "unknown",
        };
        let _ = writeln!(s, "\n## Budget: {label}");
        let _ = writeln!(
            s,
            "Projected monthly spending {} of {} budget ({} remaining)",
            format_money(budget.projected_monthly, sym),
            format_money(budget.total_budget, sym),
            format_money(budget.remaining, sym)
        );
    }

    if !model.insights.is_empty() {
        s.push_str("\n## Needs attention\n");
        let mut insights: Vec<_> = model.insights.iter().collect();
        insights.sort_by_key(|i| i.severity);
        for insight in insights {
            let _ = writeln!(s, "- [{:?}] {}", insight.severity, insight.message);
        }
    }

    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::insights::{annotate, InsightPolicy};
    use crate::model::{Transaction, Window};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn window() -> Window {
        Window {
            start: Utc.with_ymd_and_hms(2026, 2, 16, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 2, 23, 0, 0, 0).unwrap(),
            period_id: "2026-W08".to_string(),
        }
    }

    fn sample_model(prior: Option<Decimal>) -> ReportModel {
        let at = Utc.with_ymd_and_hms(2026, 2, 17, 12, 0, 0).unwrap();
        let txns = vec![
            Transaction::new("a", at, dec!(50), "Food", "Market refund"),
            Transaction::new("b", at, dec!(-20), "Refund", "Coffee"),
            Transaction::new("c", at, dec!(-120.5), "Rent ", "Storage unit"),
        ];
        aggregate(&txns, &window(), prior).unwrap()
    }

    #[test]
    fn test_render_is_deterministic() {
        let opts = RenderOptions::default();
        let a = render(&sample_model(Some(dec!(10))), &opts);
        let b = render(&sample_model(Some(dec!(10))), &opts);
        assert_eq!(a.body, b.body);
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.content_hash.len(), 64);
        assert_eq!(a.content_hash, content_hash(&a.body));
    }

    #[test]
    fn test_render_empty_period() {
        let model = aggregate(&[], &window(), None).unwrap();
        let r = render(&model, &RenderOptions::default());
        assert!(r.body.contains(EMPTY_PERIOD_LINE));
        assert!(r.body.contains("**2026-02-16 ~ 2026-02-22** (2026-W08)"));
        assert!(!r.body.contains("## By category"));
    }

    #[test]
    fn test_render_zero_delta() {
        let model = aggregate(&[], &window(), Some(Decimal::ZERO)).unwrap();
        let r = render(&model, &RenderOptions::default());
        assert!(r.body.contains("no change"));
    }

    #[test]
    fn test_render_sections() {
        let model = annotate(sample_model(Some(dec!(-100))), None, &InsightPolicy::default());
        let r = render(&model, &RenderOptions::default());
        assert!(r.body.starts_with("# Weekly budget report\n"));
        assert!(r.body.contains("- Net: **-$90.50**"));
        assert!(r.body.contains("- Versus last week: +$9.50 (net -$100.00 last week)"));
        assert!(r.body.contains("1. Rent: -$120.50\n2. Food: $50.00\n3. Refund: -$20.00"));
        assert!(r.body.contains("1. Storage unit $120.50 (Rent, 02-17)"));
        assert!(r.body.contains("- [Low] Large expense: Storage unit $120.50"));
    }

    #[test]
    fn test_body_change_changes_hash() {
        let opts = RenderOptions::default();
        let a = render(&sample_model(None), &opts);
        let b = render(&sample_model(Some(dec!(1))), &opts);
        assert_ne!(a.content_hash, b.content_hash);
    }

    #[test]
    fn test_format_money() {
        assert_eq!(format_money(dec!(50), "$"), "$50.00");
        assert_eq!(format_money(dec!(-20), "$"), "-$20.00");
        assert_eq!(format_money(dec!(0.005), "$"), "$0.01");
        assert_eq!(format_money(dec!(-0.001), "€"), "€0.00");
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn transactions() -> impl Strategy<Value = Vec<Transaction>> {
            prop::collection::vec((-500_000i64..500_000, 0usize..3, 0i64..7 * 86_400), 0..30).prop_map(|rows| {
                let start = window().start;
                rows.into_iter()
                    .enumerate()
                    .map(|(i, (cents, cat, secs))| {
                        Transaction::new(
                            format!("t{i}"),
                            start + chrono::Duration::seconds(secs),
                            Decimal::new(cents, 2),
                            ["Food", "Rent", ""][cat],
                            format!("item {i}"),
                        )
                    })
                    .collect()
            })
        }

        fn report_for(txns: &[Transaction], prior: Option<&ReportModel>) -> RenderedReport {
            let model = aggregate(txns, &window(), prior.map(|p| p.total)).unwrap();
            let model = annotate(model, prior, &InsightPolicy::default());
            render(&model, &RenderOptions::default())
        }

        proptest! {
            #[test]
            fn same_data_renders_identical_bytes(txns in transactions(), before in transactions()) {
                let prior = aggregate(&before, &window(), None).unwrap();
                let a = report_for(&txns, Some(&prior));
                let b = report_for(&txns, Some(&prior));
                prop_assert_eq!(&a.body, &b.body);
                prop_assert_eq!(&a.content_hash, &b.content_hash);

                let mut reversed = txns.clone();
                reversed.reverse();
                prop_assert_eq!(report_for(&reversed, Some(&prior)).body, a.body);
            }
        }
    }
}
