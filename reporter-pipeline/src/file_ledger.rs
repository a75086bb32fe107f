//! Durable run ledger: one JSON document per period in a directory.
//!
//! ```text
//! <dir>/2026-W42.json
//! <dir>/2026-W43.json
//! <dir>/.ledger.lock      (advisory lock target, never removed)
//! ```
//!
//! New records are created with `O_CREAT | O_EXCL`, so two processes can
//! never both create the same period. Read-modify-write transitions hold an
//! exclusive OS lock on `.ledger.lock`; the kernel drops it when the holder
//! exits, so a crashed run never wedges the ledger. Records are replaced by
//! write-then-rename.

use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;
use reporter_core::ledger::{plan_attempt, plan_begin, plan_complete, plan_reset, sort_newest_first};
use reporter_core::{Begin, Completion, ReportError, Result, RunLedger, RunRecord};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = ".ledger.lock";

#[derive(Debug, Clone)]
pub struct FileLedger {
    dir: PathBuf,
}

impl FileLedger {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| io_err("create", &dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, period_id: &str) -> Result<PathBuf> {
        let valid = !period_id.is_empty()
            && period_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(ReportError::Conflict(format!("invalid period id: {period_id:?}")));
        }
        Ok(self.dir.join(format!("{period_id}.json")))
    }

    fn read(&self, period_id: &str) -> Result<Option<RunRecord>> {
        let p = self.record_path(period_id)?;
        match fs::read_to_string(&p) {
            Ok(s) => serde_json::from_str(&s)
                .map(Some)
                .map_err(|e| ReportError::Ledger(format!("parse {}: {e}", p.display()))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err("read", &p, e)),
        }
    }

    /// Create-if-absent. Returns false when the record already exists.
    fn create(&self, record: &RunRecord) -> Result<bool> {
        let p = self.record_path(&record.period_id)?;
        let json = to_json(record)?;
        match OpenOptions::new().write(true).create_new(true).open(&p) {
            Ok(mut file) => {
                file.write_all(json.as_bytes()).map_err(|e| io_err("write", &p, e))?;
                file.sync_all().map_err(|e| io_err("sync", &p, e))?;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(io_err("create", &p, e)),
        }
    }

    fn replace(&self, record: &RunRecord) -> Result<()> {
        let p = self.record_path(&record.period_id)?;
        let tmp = self.dir.join(format!(".{}.json.tmp", record.period_id));
        let json = to_json(record)?;
        {
            let mut file = fs::File::create(&tmp).map_err(|e| io_err("create", &tmp, e))?;
            file.write_all(json.as_bytes()).map_err(|e| io_err("write", &tmp, e))?;
            file.sync_all().map_err(|e| io_err("sync", &tmp, e))?;
        }
        fs::rename(&tmp, &p).map_err(|e| io_err("rename", &p, e))
    }

    fn locked<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _guard = LedgerLock::acquire(&self.dir.join(LOCK_FILE))?;
        f()
    }
}

impl RunLedger for FileLedger {
    fn get(&self, period_id: &str) -> Result<Option<RunRecord>> {
        self.read(period_id)
    }

    fn begin(&self, period_id: &str, now: DateTime<Utc>, lease: Duration) -> Result<Begin> {
        self.locked(|| {
            let existing = self.read(period_id)?;
            let begin = plan_begin(existing.as_ref(), period_id, now, lease);
            match &begin {
                Begin::Fresh(record) => {
                    if !self.create(record)? {
                        // Lost a race with a writer that bypassed the lock; defer to it.
                        let current = self.read(period_id)?;
                        return Ok(plan_begin(current.as_ref(), period_id, now, lease));
                    }
                }
                Begin::Resumed(record) => self.replace(record)?,
                Begin::Busy(_) | Begin::Settled(_) => {}
            }
            Ok(begin)
        })
    }

    fn record_attempt(&self, period_id: &str, now: DateTime<Utc>, lease: Duration) -> Result<RunRecord> {
        self.locked(|| {
            let next = plan_attempt(self.read(period_id)?.as_ref(), period_id, now, lease)?;
            self.replace(&next)?;
            Ok(next)
        })
    }

    fn complete(&self, period_id: &str, completion: &Completion, now: DateTime<Utc>) -> Result<RunRecord> {
        self.locked(|| {
            let existing = self.read(period_id)?;
            match plan_complete(existing.as_ref(), period_id, completion, now)? {
                Some(next) => {
                    self.replace(&next)?;
                    Ok(next)
                }
                None => existing.ok_or_else(|| ReportError::Conflict(format!("no run record for period {period_id}"))),
            }
        })
    }

    fn reset(&self, period_id: &str, force: bool, now: DateTime<Utc>) -> Result<RunRecord> {
        self.locked(|| {
            let next = plan_reset(self.read(period_id)?.as_ref(), period_id, force, now)?;
            self.replace(&next)?;
            Ok(next)
        })
    }

    fn list(&self) -> Result<Vec<RunRecord>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| io_err("list", &self.dir, e))?;
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err("list", &self.dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if let Some(period_id) = name.strip_suffix(".json") {
                if let Some(record) = self.read(period_id)? {
                    out.push(record);
                }
            }
        }
        sort_newest_first(&mut out);
        Ok(out)
    }
}

/// Exclusive `flock` on the lock file, held for one ledger mutation.
struct LedgerLock {
    file: File,
}

impl LedgerLock {
    /// Blocks until every other holder has released the lock.
    fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| io_err("open", path, e))?;
        file.lock_exclusive().map_err(|e| io_err("lock", path, e))?;
        Ok(Self { file })
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn to_json(record: &RunRecord) -> Result<String> {
    serde_json::to_string_pretty(record).map_err(|e| ReportError::Ledger(format!("serialize run record: {e}")))
}

fn io_err(op: &str, path: &Path, e: std::io::Error) -> ReportError {
    ReportError::Ledger(format!("{op} {}: {e}", path.display()))
}
