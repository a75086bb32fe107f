use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

pub fn reporter_home() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os("REPORTER_HOME") {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var("HOME").context("HOME is not set (or set REPORTER_HOME)")?;
    Ok(PathBuf::from(home).join(".budget-reporter"))
}

pub fn ensure_reporter_home() -> Result<PathBuf> {
    let dir = reporter_home()?;
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}

/// Run ledger directory when the config does not name one.
pub fn default_ledger_dir() -> Result<PathBuf> {
    Ok(ensure_reporter_home()?.join("ledger"))
}

/// Config file used when neither `--config` nor `$REPORTER_CONFIG` is given.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("reporter.toml")
}
