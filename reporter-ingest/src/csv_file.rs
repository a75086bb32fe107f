//! CSV statement provider.
//!
//! Expects a header row with `date` and `amount` columns; `id`, `category`
//! and `description` are optional (header names are case-insensitive, extra
//! columns are ignored):
//!
//! ```text
//! id,date,amount,category,description
//! t-001,2026-02-17,-42.10,Groceries,H-E-B #512
//! ```
//!
//! Rows without an id get a stable one derived from the file name and line.

use async_trait::async_trait;
use chrono_tz::Tz;
use reporter_core::{DataProvider, ReportError, Result, Transaction, Window};
use std::path::PathBuf;

use crate::parse::{parse_amount, parse_timestamp};

#[derive(Debug, Clone)]
pub struct CsvProvider {
    path: PathBuf,
    timezone: Tz,
    /// Card exports list charges as positive numbers; flip them to expenses.
    invert_amounts: bool,
}

impl CsvProvider {
    pub fn new(path: impl Into<PathBuf>, timezone: Tz) -> Self {
        Self {
            path: path.into(),
            timezone,
            invert_amounts: false,
        }
    }

    pub fn with_inverted_amounts(mut self, invert: bool) -> Self {
        self.invert_amounts = invert;
        self
    }
}

#[async_trait]
impl DataProvider for CsvProvider {
    fn name(&self) -> &str {
        "csv"
    }

    async fn fetch(&self, window: &Window) -> Result<Vec<Transaction>> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ReportError::provider(format!("read {}: {e}", self.path.display())))?;

        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "csv".to_string());

        let all = parse_statement(&text, &stem, &self.timezone, self.invert_amounts)?;
        let in_window: Vec<Transaction> = all.into_iter().filter(|t| window.contains(t.timestamp)).collect();

        tracing::debug!(
            path = %self.path.display(),
            period_id = %window.period_id,
            count = in_window.len(),
            "csv provider fetched transactions"
        );
        Ok(in_window)
    }
}

struct Columns {
    id: Option<usize>,
    date: usize,
    amount: usize,
    category: Option<usize>,
    description: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self> {
        let find = |name: &str| headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name));
        let required = |name: &str| {
            find(name).ok_or_else(|| ReportError::integrity(format!("csv is missing a {name:?} column")))
        };
        Ok(Self {
            id: find("id"),
            date: required("date")?,
            amount: required("amount")?,
            category: find("category"),
            description: find("description"),
        })
    }
}

/// Parse a whole CSV statement. Any malformed row fails the statement.
pub fn parse_statement(text: &str, source: &str, tz: &Tz, invert_amounts: bool) -> Result<Vec<Transaction>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = rdr
        .headers()
        .map_err(|e| ReportError::integrity(format!("csv header: {e}")))?
        .clone();
    let cols = Columns::from_headers(&headers)?;

    let mut out = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record.map_err(|e| ReportError::integrity(format!("csv row {}: {e}", i + 2)))?;
        // Header is line 1.
        let line = i + 2;
        let field = |idx: Option<usize>| idx.and_then(|j| record.get(j)).unwrap_or("").to_string();

        let date_raw = field(Some(cols.date));
        if date_raw.is_empty() && record.iter().all(|f| f.is_empty()) {
            continue;
        }

        let timestamp = parse_timestamp(&date_raw, tz).map_err(|e| at_line(line, e))?;
        let mut amount = parse_amount(&field(Some(cols.amount))).map_err(|e| at_line(line, e))?;
        if invert_amounts {
            amount = -amount;
        }

        let id = match field(cols.id) {
            id if id.is_empty() => format!("{source}:{line}"),
            id => id,
        };

        out.push(Transaction::new(
            id,
            timestamp,
            amount,
            field(cols.category),
            field(cols.description),
        ));
    }

    Ok(out)
}

fn at_line(line: usize, e: ReportError) -> ReportError {
    match e {
        ReportError::DataIntegrity(msg) => ReportError::DataIntegrity(format!("line {line}: {msg}")),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_statement_basic() {
        let text = "\
ID,Date,Amount,Category,Description
t1,2026-02-17,-42.10,Groceries,H-E-B #512
t2,2026-02-18,1500.00,Salary,Payroll
";
        let txns = parse_statement(text, "stmt", &Tz::UTC, false).unwrap();
        assert_eq!(txns.len(), 2);
        assert_eq!(txns[0].id, "t1");
        assert_eq!(txns[0].amount, dec!(-42.10));
        assert_eq!(txns[0].category, "Groceries");
        assert_eq!(txns[1].description, "Payroll");
    }

    #[test]
    fn test_missing_ids_and_blank_rows() {
        let text = "date,amount\n2026-02-17,-1\n,\n2026-02-18,-2\n";
        let txns = parse_statement(text, "card", &Tz::UTC, false).unwrap();
        assert_eq!(txns.len(), 2);
        assert_eq!(txns[0].id, "card:2");
        assert_eq!(txns[1].id, "card:4");
        assert_eq!(txns[0].category, "");
    }

    #[test]
    fn test_inverted_amounts() {
        let text = "date,amount\n2026-02-17,10.00\n";
        let txns = parse_statement(text, "amex", &Tz::UTC, true).unwrap();
        assert_eq!(txns[0].amount, dec!(-10.00));
    }

    #[test]
    fn test_unparseable_amount_is_integrity_error() {
        let text = "date,amount\n2026-02-17,ten dollars\n";
        let err = parse_statement(text, "s", &Tz::UTC, false).unwrap_err();
        assert!(matches!(err, ReportError::DataIntegrity(ref m) if m.contains("line 2")));
    }

    #[test]
    fn test_missing_required_column() {
        let err = parse_statement("when,amount\n", "s", &Tz::UTC, false).unwrap_err();
        assert!(matches!(err, ReportError::DataIntegrity(_)));
    }
}
