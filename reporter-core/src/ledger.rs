//! Run ledger: per-period idempotency records.
//!
//! The ledger is the only shared mutable state in the pipeline. Backends
//! must make `begin` an atomic check-and-create; the state rules themselves
//! live in the `plan_*` functions below so every backend enforces the same
//! lifecycle:
//!
//! ```text
//!   (absent) --begin--> pending --complete(delivered)--> delivered
//!                          |  \--complete(failed)-----> failed --reset--> pending
//!                          \--lease expires, begin--> pending (resumed, attempt+1)
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{ErrorKind, ReportError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Delivered,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Delivered => "delivered",
            RunStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub period_id: String,
    pub status: RunStatus,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    /// Category of `last_error`, kept so a later skipped run can report it
    #[serde(default)]
    pub error_kind: Option<ErrorKind>,
    pub updated_at: DateTime<Utc>,
    /// While in the future, a live run owns this pending record
    #[serde(default)]
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub receipt: Option<String>,
}

impl RunRecord {
    pub fn pending(period_id: &str, now: DateTime<Utc>, lease: Duration) -> Self {
        Self {
            period_id: period_id.to_string(),
            status: RunStatus::Pending,
            attempt_count: 1,
            last_error: None,
            error_kind: None,
            updated_at: now,
            lease_expires_at: Some(now + lease),
            content_hash: None,
            receipt: None,
        }
    }

    pub fn lease_is_live(&self, now: DateTime<Utc>) -> bool {
        self.lease_expires_at.is_some_and(|until| until > now)
    }
}

/// Result of [`RunLedger::begin`].
#[derive(Debug, Clone, PartialEq)]
pub enum Begin {
    /// No record existed; a pending one was created with attempt 1.
    Fresh(RunRecord),
    /// A pending record with an expired lease was taken over (crash recovery).
    Resumed(RunRecord),
    /// A pending record is owned by a live run.
    Busy(RunRecord),
    /// The period is already delivered or failed.
    Settled(RunRecord),
}

impl Begin {
    pub fn record(&self) -> &RunRecord {
        match self {
            Begin::Fresh(r) | Begin::Resumed(r) | Begin::Busy(r) | Begin::Settled(r) => r,
        }
    }

    /// True when the caller now owns the period and should run the pipeline.
    pub fn is_claimed(&self) -> bool {
        matches!(self, Begin::Fresh(_) | Begin::Resumed(_))
    }
}

/// Terminal outcome written by [`RunLedger::complete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub status: RunStatus,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub content_hash: Option<String>,
    pub receipt: Option<String>,
}

impl Completion {
    pub fn delivered(content_hash: impl Into<String>, receipt: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Delivered,
            error: None,
            error_kind: None,
            content_hash: Some(content_hash.into()),
            receipt: Some(receipt.into()),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failed,
            error: Some(error.into()),
            error_kind: None,
            content_hash: None,
            receipt: None,
        }
    }

    pub fn from_error(error: &ReportError) -> Self {
        Self {
            error_kind: Some(error.kind()),
            ..Self::failed(error.to_string())
        }
    }
}

/// Durable key-value store of [`RunRecord`]s keyed by period id.
pub trait RunLedger: Send + Sync {
    fn get(&self, period_id: &str) -> Result<Option<RunRecord>>;

    /// Atomically create a pending record if absent, or report the existing one.
    fn begin(&self, period_id: &str, now: DateTime<Utc>, lease: Duration) -> Result<Begin>;

    /// Count one more attempt on a pending record and renew its lease.
    fn record_attempt(&self, period_id: &str, now: DateTime<Utc>, lease: Duration) -> Result<RunRecord>;

    /// Move a pending record to a terminal state.
    fn complete(&self, period_id: &str, completion: &Completion, now: DateTime<Utc>) -> Result<RunRecord>;

    /// Manual reset: return a failed (or, with `force`, any) record to pending.
    fn reset(&self, period_id: &str, force: bool, now: DateTime<Utc>) -> Result<RunRecord>;

    /// All records, newest period first.
    fn list(&self) -> Result<Vec<RunRecord>>;
}

pub fn plan_begin(existing: Option<&RunRecord>, period_id: &str, now: DateTime<Utc>, lease: Duration) -> Begin {
    match existing {
        None => Begin::Fresh(RunRecord::pending(period_id, now, lease)),
        Some(r) if r.status.is_terminal() => Begin::Settled(r.clone()),
        Some(r) if r.lease_is_live(now) => Begin::Busy(r.clone()),
        Some(r) => {
            let mut next = r.clone();
            next.attempt_count = next.attempt_count.saturating_add(1);
            next.lease_expires_at = Some(now + lease);
            next.updated_at = now;
            Begin::Resumed(next)
        }
    }
}

pub fn plan_attempt(existing: Option<&RunRecord>, period_id: &str, now: DateTime<Utc>, lease: Duration) -> Result<RunRecord> {
    let r = existing.ok_or_else(|| missing(period_id))?;
    if r.status.is_terminal() {
        return Err(ReportError::Conflict(format!(
            "period {period_id} is already {}",
            r.status.as_str()
        )));
    }
    let mut next = r.clone();
    next.attempt_count = next.attempt_count.saturating_add(1);
    next.lease_expires_at = Some(now + lease);
    next.updated_at = now;
    Ok(next)
}

/// Returns `Ok(None)` when the record is already in the requested terminal
/// state and nothing needs writing.
pub fn plan_complete(
    existing: Option<&RunRecord>,
    period_id: &str,
    completion: &Completion,
    now: DateTime<Utc>,
) -> Result<Option<RunRecord>> {
    let r = existing.ok_or_else(|| missing(period_id))?;
    if !completion.status.is_terminal() {
        return Err(ReportError::Conflict(format!(
            "cannot complete period {period_id} as pending"
        )));
    }
    if r.status.is_terminal() {
        if r.status == completion.status {
            return Ok(None);
        }
        return Err(ReportError::Conflict(format!(
            "period {period_id} is already {}, refusing to mark it {}",
            r.status.as_str(),
            completion.status.as_str()
        )));
    }

    let mut next = r.clone();
    next.status = completion.status;
    next.updated_at = now;
    next.lease_expires_at = None;
    // A delivery clears whatever a failed attempt left behind.
    next.last_error = completion.error.clone();
    next.error_kind = completion.error_kind;
    if completion.content_hash.is_some() {
        next.content_hash = completion.content_hash.clone();
    }
    if completion.receipt.is_some() {
        next.receipt = completion.receipt.clone();
    }
    Ok(Some(next))
}

pub fn plan_reset(existing: Option<&RunRecord>, period_id: &str, force: bool, now: DateTime<Utc>) -> Result<RunRecord> {
    let r = existing.ok_or_else(|| missing(period_id))?;
    let allowed = match r.status {
        RunStatus::Failed => true,
        RunStatus::Delivered | RunStatus::Pending => force,
    };
    if !allowed {
        return Err(ReportError::Conflict(format!(
            "period {period_id} is {}; pass force to reset it",
            r.status.as_str()
        )));
    }
    let mut next = r.clone();
    next.status = RunStatus::Pending;
    next.lease_expires_at = None;
    next.updated_at = now;
    Ok(next)
}

fn missing(period_id: &str) -> ReportError {
    ReportError::Conflict(format!("no run record for period {period_id}"))
}

/// Orders records newest period first (ISO week ids sort lexicographically).
pub fn sort_newest_first(records: &mut [RunRecord]) {
    records.sort_by(|a, b| b.period_id.cmp(&a.period_id));
}

/// Process-local ledger. Atomic through a mutex; not durable.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: Mutex<BTreeMap<String, RunRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly (tests and backfills).
    pub fn insert(&self, record: RunRecord) -> Result<()> {
        self.lock()?.insert(record.period_id.clone(), record);
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, RunRecord>>> {
        self.records
            .lock()
            .map_err(|_| ReportError::Ledger("memory ledger mutex poisoned".to_string()))
    }
}

impl RunLedger for MemoryLedger {
    fn get(&self, period_id: &str) -> Result<Option<RunRecord>> {
        Ok(self.lock()?.get(period_id).cloned())
    }

    fn begin(&self, period_id: &str, now: DateTime<Utc>, lease: Duration) -> Result<Begin> {
        let mut map = self.lock()?;
        let begin = plan_begin(map.get(period_id), period_id, now, lease);
        if begin.is_claimed() {
            map.insert(period_id.to_string(), begin.record().clone());
        }
        Ok(begin)
    }

    fn record_attempt(&self, period_id: &str, now: DateTime<Utc>, lease: Duration) -> Result<RunRecord> {
        let mut map = self.lock()?;
        let next = plan_attempt(map.get(period_id), period_id, now, lease)?;
        map.insert(period_id.to_string(), next.clone());
        Ok(next)
    }

    fn complete(&self, period_id: &str, completion: &Completion, now: DateTime<Utc>) -> Result<RunRecord> {
        let mut map = self.lock()?;
        match plan_complete(map.get(period_id), period_id, completion, now)? {
            Some(next) => {
                map.insert(period_id.to_string(), next.clone());
                Ok(next)
            }
            None => map.get(period_id).cloned().ok_or_else(|| missing(period_id)),
        }
    }

    fn reset(&self, period_id: &str, force: bool, now: DateTime<Utc>) -> Result<RunRecord> {
        let mut map = self.lock()?;
        let next = plan_reset(map.get(period_id), period_id, force, now)?;
        map.insert(period_id.to_string(), next.clone());
        Ok(next)
    }

    fn list(&self) -> Result<Vec<RunRecord>> {
        let mut out: Vec<RunRecord> = self.lock()?.values().cloned().collect();
        sort_newest_first(&mut out);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap()
    }

    fn lease() -> Duration {
        Duration::minutes(30)
    }

    #[test]
    fn test_begin_creates_pending_once() {
        let ledger = MemoryLedger::new();
        let first = ledger.begin("2026-W43", t0(), lease()).unwrap();
        assert!(matches!(first, Begin::Fresh(_)));
        assert_eq!(first.record().status, RunStatus::Pending);
        assert_eq!(first.record().attempt_count, 1);

        // Overlapping trigger one minute later sees the live lease.
        let second = ledger.begin("2026-W43", t0() + Duration::minutes(1), lease()).unwrap();
        assert!(matches!(second, Begin::Busy(_)));
        assert!(!second.is_claimed());
        assert_eq!(ledger.get("2026-W43").unwrap().unwrap().attempt_count, 1);
    }

    #[test]
    fn test_expired_lease_resumes_with_next_attempt() {
        let ledger = MemoryLedger::new();
        ledger.begin("2026-W43", t0(), lease()).unwrap();
        let resumed = ledger.begin("2026-W43", t0() + Duration::hours(2), lease()).unwrap();
        assert!(matches!(resumed, Begin::Resumed(_)));
        assert_eq!(resumed.record().attempt_count, 2);
    }

    #[test]
    fn test_complete_then_begin_is_settled() {
        let ledger = MemoryLedger::new();
        ledger.begin("2026-W43", t0(), lease()).unwrap();
        let done = ledger
            .complete("2026-W43", &Completion::delivered("abc", "file:/tmp/x"), t0())
            .unwrap();
        assert_eq!(done.status, RunStatus::Delivered);
        assert_eq!(done.lease_expires_at, None);
        assert_eq!(done.content_hash.as_deref(), Some("abc"));

        let again = ledger.begin("2026-W43", t0() + Duration::days(1), lease()).unwrap();
        assert!(matches!(again, Begin::Settled(ref r) if r.status == RunStatus::Delivered));
    }

    #[test]
    fn test_complete_conflicts_on_different_terminal_status() {
        let ledger = MemoryLedger::new();
        ledger.begin("p", t0(), lease()).unwrap();
        ledger.complete("p", &Completion::delivered("h", "r"), t0()).unwrap();

        // Same status again is a no-op.
        assert!(ledger.complete("p", &Completion::delivered("h", "r"), t0()).is_ok());

        let err = ledger.complete("p", &Completion::failed("late failure"), t0()).unwrap_err();
        assert!(matches!(err, ReportError::Conflict(_)));
        assert_eq!(ledger.get("p").unwrap().unwrap().status, RunStatus::Delivered);
    }

    #[test]
    fn test_complete_requires_record_and_terminal_status() {
        let ledger = MemoryLedger::new();
        assert!(matches!(
            ledger.complete("nope", &Completion::failed("x"), t0()),
            Err(ReportError::Conflict(_))
        ));

        ledger.begin("p", t0(), lease()).unwrap();
        let pending = Completion {
            status: RunStatus::Pending,
            error: None,
            error_kind: None,
            content_hash: None,
            receipt: None,
        };
        assert!(matches!(ledger.complete("p", &pending, t0()), Err(ReportError::Conflict(_))));
    }

    #[test]
    fn test_record_attempt_only_on_pending() {
        let ledger = MemoryLedger::new();
        ledger.begin("p", t0(), lease()).unwrap();
        let r = ledger.record_attempt("p", t0(), lease()).unwrap();
        assert_eq!(r.attempt_count, 2);

        ledger.complete("p", &Completion::failed("boom"), t0()).unwrap();
        assert!(matches!(ledger.record_attempt("p", t0(), lease()), Err(ReportError::Conflict(_))));
    }

    #[test]
    fn test_reset_failed_keeps_history() {
        let ledger = MemoryLedger::new();
        ledger.begin("p", t0(), lease()).unwrap();
        ledger.record_attempt("p", t0(), lease()).unwrap();
        ledger.complete("p", &Completion::failed("sink down"), t0()).unwrap();

        let r = ledger.reset("p", false, t0()).unwrap();
        assert_eq!(r.status, RunStatus::Pending);
        assert_eq!(r.attempt_count, 2);
        assert_eq!(r.last_error.as_deref(), Some("sink down"));

        // Lease cleared, so the next begin resumes immediately.
        let b = ledger.begin("p", t0(), lease()).unwrap();
        assert!(matches!(b, Begin::Resumed(_)));
        assert_eq!(b.record().attempt_count, 3);
    }

    #[test]
    fn test_delivery_after_reset_clears_last_error() {
        let ledger = MemoryLedger::new();
        ledger.begin("p", t0(), lease()).unwrap();
        let failed = ledger
            .complete("p", &Completion::from_error(&ReportError::delivery("502")), t0())
            .unwrap();
        assert_eq!(failed.error_kind, Some(ErrorKind::Delivery));

        ledger.reset("p", false, t0()).unwrap();
        ledger.begin("p", t0(), lease()).unwrap();
        let done = ledger.complete("p", &Completion::delivered("h", "r"), t0()).unwrap();
        assert_eq!(done.status, RunStatus::Delivered);
        assert_eq!(done.last_error, None);
        assert_eq!(done.error_kind, None);
    }

    #[test]
    fn test_reset_delivered_needs_force() {
        let ledger = MemoryLedger::new();
        ledger.begin("p", t0(), lease()).unwrap();
        ledger.complete("p", &Completion::delivered("h", "r"), t0()).unwrap();
        assert!(matches!(ledger.reset("p", false, t0()), Err(ReportError::Conflict(_))));
        assert_eq!(ledger.reset("p", true, t0()).unwrap().status, RunStatus::Pending);
    }

    #[test]
    fn test_list_newest_first() {
        let ledger = MemoryLedger::new();
        for id in ["2026-W41", "2026-W43", "2026-W42"] {
            ledger.begin(id, t0(), lease()).unwrap();
        }
        let ids: Vec<String> = ledger.list().unwrap().into_iter().map(|r| r.period_id).collect();
        assert_eq!(ids, vec!["2026-W43", "2026-W42", "2026-W41"]);
    }

    #[test]
    fn test_record_serializes_lowercase_status() {
        let r = RunRecord::pending("2026-W43", t0(), lease());
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"status\":\"pending\""));
        let back: RunRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
