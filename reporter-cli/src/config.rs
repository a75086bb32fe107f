use anyhow::{Context, Result};
use reporter_core::insights::normalize_budget;
use reporter_core::{
    parse_timezone, DataProvider, DeliverySink, InsightPolicy, RenderOptions, ReportError, Schedule, WeekSelection,
};
use reporter_ingest::parse::from_minor_units;
use reporter_ingest::{ActualProvider, CsvProvider};
use reporter_pipeline::{DiscordSink, FileLedger, FileSink, RetryPolicy, Settings, StdoutSink};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::state;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub schedule: ScheduleSection,
    pub retry: RetrySection,
    pub ledger: LedgerSection,
    pub report: ReportSection,
    /// Absent: Actual Budget when `ACTUAL_SERVER_URL` is set, else `transactions.csv`
    pub provider: Option<ProviderConfig>,
    /// Absent: Discord when `DISCORD_WEBHOOK_URL` is set, else stdout
    pub sink: Option<SinkConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScheduleSection {
    pub timezone: String,
    pub week: WeekSelection,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            week: WeekSelection::Current,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySection {
    /// Retries after the first attempt of each stage
    pub ceiling: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            ceiling: 3,
            backoff_base_ms: 2_000,
            backoff_max_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LedgerSection {
    /// Defaults to `~/.budget-reporter/ledger`
    pub dir: Option<PathBuf>,
    pub lease_secs: u64,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            dir: None,
            lease_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportSection {
    pub title: String,
    pub currency_symbol: String,
    pub compare_with_previous: bool,
    pub large_transaction_threshold: Decimal,
    pub spike_ratio: Decimal,
    pub uncategorized_threshold: usize,
    /// Category -> monthly budget
    pub monthly_budget: BTreeMap<String, Decimal>,
}

impl Default for ReportSection {
    fn default() -> Self {
        let policy = InsightPolicy::default();
        Self {
            title: RenderOptions::default().title,
            currency_symbol: policy.currency_symbol,
            compare_with_previous: true,
            large_transaction_threshold: policy.large_transaction,
            spike_ratio: policy.spike_ratio,
            uncategorized_threshold: policy.uncategorized_limit,
            monthly_budget: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProviderConfig {
    Csv {
        path: PathBuf,
        /// Statement exports that list charges as positive numbers
        #[serde(default)]
        invert_amounts: bool,
    },
    Actual {
        #[serde(default)]
        server_url: Option<String>,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        budget_id: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkConfig {
    Discord {
        #[serde(default)]
        webhook_url: Option<String>,
        #[serde(default)]
        username: Option<String>,
    },
    File {
        dir: PathBuf,
    },
    Stdout,
}

impl Config {
    /// Starter config written by `init-config`.
    pub fn sample() -> Self {
        Self {
            provider: Some(ProviderConfig::Csv {
                path: PathBuf::from("transactions.csv"),
                invert_amounts: false,
            }),
            sink: Some(SinkConfig::Stdout),
            ..Self::default()
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| ReportError::config(format!("parse config: {e}")).into())
    }

    /// Overlay secrets and deployment knobs from the environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());

        if let Some(tz) = var("REPORTER_TIMEZONE") {
            self.schedule.timezone = tz;
        }
        // Env budgets are integer cents, e.g. {"Food": 50000} for 500.00.
        if let Some(raw) = var("MONTHLY_BUDGET") {
            let cents: BTreeMap<String, i64> = serde_json::from_str(&raw)
                .map_err(|e| ReportError::config(format!("MONTHLY_BUDGET is not a JSON object of cents: {e}")))?;
            self.report.monthly_budget = cents.into_iter().map(|(k, v)| (k, from_minor_units(v))).collect();
        }

        if self.provider.is_none() && var("ACTUAL_SERVER_URL").is_some() {
            self.provider = Some(ProviderConfig::Actual {
                server_url: None,
                password: None,
                budget_id: None,
            });
        }
        if let Some(ProviderConfig::Actual {
            server_url,
            password,
            budget_id,
        }) = &mut self.provider
        {
            if let Some(v) = var("ACTUAL_SERVER_URL") {
                *server_url = Some(v);
            }
            if let Some(v) = var("ACTUAL_PASSWORD") {
                *password = Some(v);
            }
            if let Some(v) = var("ACTUAL_BUDGET_ID") {
                *budget_id = Some(v);
            }
        }

        if self.sink.is_none() && var("DISCORD_WEBHOOK_URL").is_some() {
            self.sink = Some(SinkConfig::Discord {
                webhook_url: None,
                username: None,
            });
        }
        if let Some(SinkConfig::Discord { webhook_url, .. }) = &mut self.sink {
            if let Some(v) = var("DISCORD_WEBHOOK_URL") {
                *webhook_url = Some(v);
            }
        }
        Ok(())
    }

    pub fn provider(&self) -> ProviderConfig {
        self.provider.clone().unwrap_or(ProviderConfig::Csv {
            path: PathBuf::from("transactions.csv"),
            invert_amounts: false,
        })
    }

    pub fn sink(&self) -> SinkConfig {
        self.sink.clone().unwrap_or(SinkConfig::Stdout)
    }

    /// Check every value before anything touches the network or disk.
    pub fn validate(&self) -> Result<()> {
        parse_timezone(&self.schedule.timezone)?;

        if self.retry.backoff_base_ms > self.retry.backoff_max_ms {
            return Err(invalid("retry.backoff_base_ms must not exceed retry.backoff_max_ms"));
        }
        if self.ledger.lease_secs == 0 {
            return Err(invalid("ledger.lease_secs must be positive"));
        }
        if self.report.spike_ratio <= Decimal::ZERO {
            return Err(invalid("report.spike_ratio must be positive"));
        }
        if self.report.large_transaction_threshold < Decimal::ZERO {
            return Err(invalid("report.large_transaction_threshold must not be negative"));
        }
        if let Some((cat, _)) = self.report.monthly_budget.iter().find(|(_, v)| v.is_sign_negative()) {
            return Err(invalid(&format!("report.monthly_budget.{cat} must not be negative")));
        }

        match self.provider() {
            ProviderConfig::Csv { path, .. } if path.as_os_str().is_empty() => {
                return Err(invalid("provider.path is required for kind = \"csv\""));
            }
            ProviderConfig::Actual { server_url, password, .. } => {
                let url = server_url.unwrap_or_default();
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(invalid("ACTUAL_SERVER_URL (provider.server_url) must be an http(s) url"));
                }
                if password.unwrap_or_default().is_empty() {
                    return Err(invalid("ACTUAL_PASSWORD (provider.password) is required"));
                }
            }
            ProviderConfig::Csv { .. } => {}
        }

        match self.sink() {
            SinkConfig::Discord { webhook_url, .. } if webhook_url.as_deref().unwrap_or("").is_empty() => {
                return Err(invalid("DISCORD_WEBHOOK_URL (sink.webhook_url) is required"));
            }
            SinkConfig::File { dir } if dir.as_os_str().is_empty() => {
                return Err(invalid("sink.dir is required for kind = \"file\""));
            }
            _ => {}
        }
        Ok(())
    }

    pub fn settings(&self) -> Result<Settings> {
        let timezone = parse_timezone(&self.schedule.timezone)?;
        let lease_secs = i64::try_from(self.ledger.lease_secs).map_err(|_| invalid("ledger.lease_secs is too large"))?;
        Ok(Settings {
            schedule: Schedule::new(timezone, self.schedule.week),
            retry: RetryPolicy {
                ceiling: self.retry.ceiling,
                base: Duration::from_millis(self.retry.backoff_base_ms),
                max_delay: Duration::from_millis(self.retry.backoff_max_ms),
            },
            lease: chrono::Duration::seconds(lease_secs),
            compare_with_previous: self.report.compare_with_previous,
            insights: InsightPolicy {
                spike_ratio: self.report.spike_ratio,
                large_transaction: self.report.large_transaction_threshold,
                uncategorized_limit: self.report.uncategorized_threshold,
                monthly_budget: normalize_budget(self.report.monthly_budget.clone()),
                currency_symbol: self.report.currency_symbol.clone(),
            },
            render: RenderOptions {
                title: self.report.title.clone(),
                currency_symbol: self.report.currency_symbol.clone(),
                timezone,
            },
        })
    }

    pub fn build_provider(&self) -> Result<Box<dyn DataProvider>> {
        let timezone = parse_timezone(&self.schedule.timezone)?;
        Ok(match self.provider() {
            ProviderConfig::Csv { path, invert_amounts } => {
                Box::new(CsvProvider::new(path, timezone).with_inverted_amounts(invert_amounts))
            }
            ProviderConfig::Actual {
                server_url,
                password,
                budget_id,
            } => Box::new(
                ActualProvider::new(server_url.unwrap_or_default(), password.unwrap_or_default(), timezone)?
                    .with_budget_id(budget_id),
            ),
        })
    }

    pub fn build_sink(&self) -> Result<Box<dyn DeliverySink>> {
        Ok(match self.sink() {
            SinkConfig::Discord { webhook_url, username } => {
                let sink = DiscordSink::new(webhook_url.unwrap_or_default())?;
                Box::new(match username {
                    Some(u) => sink.with_username(u),
                    None => sink,
                })
            }
            SinkConfig::File { dir } => Box::new(FileSink::new(dir)),
            SinkConfig::Stdout => Box::new(StdoutSink),
        })
    }

    pub fn ledger_dir(&self) -> Result<PathBuf> {
        match &self.ledger.dir {
            Some(dir) => Ok(dir.clone()),
            None => state::default_ledger_dir(),
        }
    }

    pub fn open_ledger(&self) -> Result<FileLedger> {
        let dir = self.ledger_dir()?;
        Ok(FileLedger::open(&dir).with_context(|| format!("open ledger {}", dir.display()))?)
    }
}

fn invalid(msg: &str) -> anyhow::Error {
    ReportError::config(msg).into()
}

/// `--config`, then `$REPORTER_CONFIG`, then `./reporter.toml` if present.
pub fn resolve_path(flag: Option<PathBuf>) -> (PathBuf, bool) {
    match flag.or_else(|| std::env::var_os("REPORTER_CONFIG").map(PathBuf::from)) {
        Some(p) => (p, true),
        None => (state::default_config_path(), false),
    }
}

/// Load, overlay the environment, and validate.
pub fn load_config(flag: Option<PathBuf>) -> Result<Config> {
    let (path, explicit) = resolve_path(flag);
    let mut cfg = read_config_file(&path, explicit)?;
    cfg.apply_env(|k| std::env::var(k).ok())?;
    cfg.validate()?;
    Ok(cfg)
}

fn read_config_file(path: &Path, required: bool) -> Result<Config> {
    if !path.exists() {
        if required {
            return Err(ReportError::config(format!("config not found: {}", path.display())).into());
        }
        return Ok(Config::default());
    }
    let s = fs::read_to_string(path)
        .map_err(|e| ReportError::config(format!("read {}: {e}", path.display())))?;
    Config::parse(&s).with_context(|| format!("in {}", path.display()))
}

pub fn init_config(flag: Option<PathBuf>) -> Result<()> {
    let (p, _) = resolve_path(flag);
    if p.exists() {
        println!("Config already exists: {}", p.display());
        return Ok(());
    }
    let s = toml::to_string_pretty(&Config::sample()).context("serialize config")?;
    fs::write(&p, s).with_context(|| format!("write {}", p.display()))?;
    println!("Wrote {}", p.display());
    Ok(())
}
