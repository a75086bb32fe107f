//! Actual Budget server provider.
//!
//! Logs in with the server password, then pulls the window's transactions.
//! Amounts arrive as integer cents; transfers between own accounts are not
//! spending and are dropped.

use async_trait::async_trait;
use chrono::Duration;
use chrono_tz::Tz;
use reporter_core::{DataProvider, ReportError, Result, Transaction, Window};
use serde::{Deserialize, Serialize};

use crate::parse::{from_minor_units, parse_timestamp};

const TOKEN_HEADER: &str = "X-Actual-Token";

#[derive(Debug, Clone)]
pub struct ActualProvider {
    server_url: String,
    password: String,
    budget_id: Option<String>,
    timezone: Tz,
    client: reqwest::Client,
}

#[derive(Debug, Clone, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Clone, Deserialize)]
struct LoginData {
    token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActualTransaction {
    pub id: String,
    pub date: String,
    /// Cents; negative = outflow
    pub amount: i64,
    #[serde(default)]
    pub payee: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub is_transfer: bool,
}

impl ActualTransaction {
    /// Transfers are flagged by the server, but hand-entered ones only show in labels.
    pub fn looks_like_transfer(&self) -> bool {
        let mentions = |s: &Option<String>| s.as_deref().unwrap_or("").to_lowercase().contains("transfer");
        self.is_transfer || mentions(&self.payee) || mentions(&self.category)
    }
}

impl ActualProvider {
    pub fn new(server_url: impl Into<String>, password: impl Into<String>, timezone: Tz) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ReportError::config(format!("http client: {e}")))?;
        Ok(Self {
            server_url: server_url.into().trim_end_matches('/').to_string(),
            password: password.into(),
            budget_id: None,
            timezone,
            client,
        })
    }

    pub fn with_budget_id(mut self, budget_id: Option<String>) -> Self {
        self.budget_id = budget_id.filter(|b| !b.trim().is_empty());
        self
    }

    async fn login(&self) -> Result<String> {
        let resp = self
            .client
            .post(format!("{}/account/login", self.server_url))
            .json(&serde_json::json!({ "password": self.password }))
            .send()
            .await
            .map_err(|e| ReportError::provider(format!("actual login request: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let txt = resp.text().await.unwrap_or_default();
            return Err(ReportError::provider(format!("actual login failed: {status} {txt}")));
        }

        let out: Envelope<LoginData> = resp
            .json()
            .await
            .map_err(|e| ReportError::provider(format!("parse actual login response: {e}")))?;
        out.data
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ReportError::provider("actual login returned no token"))
    }

    /// Inclusive local date range covering the half-open window.
    fn date_range(&self, window: &Window) -> (String, String) {
        let start = window.start.with_timezone(&self.timezone).date_naive();
        let last = (window.end - Duration::seconds(1)).with_timezone(&self.timezone).date_naive();
        (start.format("%Y-%m-%d").to_string(), last.format("%Y-%m-%d").to_string())
    }
}

#[async_trait]
impl DataProvider for ActualProvider {
    fn name(&self) -> &str {
        "actual"
    }

    async fn fetch(&self, window: &Window) -> Result<Vec<Transaction>> {
        let token = self.login().await?;
        let (start, end) = self.date_range(window);

        let mut query = vec![("startDate", start), ("endDate", end)];
        if let Some(budget) = &self.budget_id {
            query.push(("budgetId", budget.clone()));
        }

        let resp = self
            .client
            .get(format!("{}/transactions", self.server_url))
            .header(TOKEN_HEADER, token)
            .query(&query)
            .send()
            .await
            .map_err(|e| ReportError::provider(format!("actual transactions request: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let txt = resp.text().await.unwrap_or_default();
            return Err(ReportError::provider(format!("actual transactions failed: {status} {txt}")));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| ReportError::provider(format!("read actual transactions: {e}")))?;
        let out: Envelope<Vec<ActualTransaction>> = serde_json::from_str(&body)
            .map_err(|e| ReportError::integrity(format!("malformed actual transactions: {e}")))?;

        let mut txns = Vec::with_capacity(out.data.len());
        let mut skipped = 0usize;
        for t in out.data {
            if t.looks_like_transfer() {
                skipped += 1;
                continue;
            }
            txns.push(to_transaction(t, &self.timezone)?);
        }

        tracing::debug!(
            period_id = %window.period_id,
            count = txns.len(),
            transfers_skipped = skipped,
            "actual provider fetched transactions"
        );
        Ok(txns)
    }
}

fn to_transaction(t: ActualTransaction, tz: &Tz) -> Result<Transaction> {
    let timestamp = parse_timestamp(&t.date, tz)?;
    let description = match (t.payee.as_deref(), t.notes.as_deref()) {
        (Some(p), Some(n)) if !n.trim().is_empty() => format!("{p} ({})", n.trim()),
        (Some(p), _) => p.to_string(),
        (None, Some(n)) => n.trim().to_string(),
        (None, None) => String::new(),
    };
    Ok(Transaction::new(
        t.id,
        timestamp,
        from_minor_units(t.amount),
        t.category.unwrap_or_default(),
        description,
    ))
}
