//! The single completion event every run emits.

use reporter_core::{ErrorKind, RunRecord, RunStatus};
use serde::Serialize;

use crate::orchestrator::RunOutcome;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunEvent {
    pub event: &'static str,
    pub period_id: String,
    /// Disposition of this run, e.g. `delivered` or `in_progress`
    pub status: &'static str,
    /// Ledger status after the run, when a record exists
    pub ledger_status: Option<&'static str>,
    pub attempt_count: Option<u32>,
    pub content_hash: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
}

impl RunEvent {
    pub const NAME: &'static str = "run.completed";

    pub fn from_outcome(outcome: &RunOutcome) -> Self {
        let record = outcome.record.as_ref();
        let stored = |r: &RunRecord| outcome.disposition.is_failure() && r.status == RunStatus::Failed;
        let error = outcome
            .error
            .as_ref()
            .map(|e| e.to_string())
            .or_else(|| {
                record.filter(|r| stored(*r)).and_then(|r| r.last_error.clone())
            });
        Self {
            event: Self::NAME,
            period_id: outcome.window.period_id.clone(),
            status: outcome.disposition.as_str(),
            ledger_status: record.map(|r| r.status.as_str()),
            attempt_count: record.map(|r| r.attempt_count),
            content_hash: outcome
                .report
                .as_ref()
                .map(|r| r.content_hash.clone())
                .or_else(|| record.and_then(|r| r.content_hash.clone())),
            error_kind: outcome
                .error
                .as_ref()
                .map(|e| e.kind())
                .or_else(|| record.filter(|r| stored(*r)).and_then(|r| r.error_kind)),
            error,
        }
    }

    /// Log the event through `tracing`.
    pub fn emit(&self) {
        let kind = self.error_kind.map(|k| k.as_str()).unwrap_or("");
        let hash = self.content_hash.as_deref().unwrap_or("");
        let attempts = self.attempt_count.unwrap_or(0);
        if self.error.is_some() {
            tracing::warn!(
                event = Self::NAME,
                period_id = %self.period_id,
                status = self.status,
                attempt_count = attempts,
                content_hash = hash,
                error_kind = kind,
                error = self.error.as_deref().unwrap_or(""),
                "run completed"
            );
        } else {
            tracing::info!(
                event = Self::NAME,
                period_id = %self.period_id,
                status = self.status,
                attempt_count = attempts,
                content_hash = hash,
                "run completed"
            );
        }
    }

    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
