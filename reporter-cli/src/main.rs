use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use reporter_core::{compute_window, ReportError, RunLedger, RunRecord, RunStatus};
use reporter_pipeline::{Orchestrator, RunEvent};
use std::path::PathBuf;
use std::process::ExitCode;

mod config;
mod state;

use config::Config;

const LONG_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("REPORTER_BUILD_SHA"), ")");

#[derive(Parser, Debug)]
#[command(
    name = "reporter",
    version,
    long_version = LONG_VERSION,
    about = "Weekly budget report: fetch, summarize, deliver once per week"
)]
struct Cli {
    /// Config file (default: $REPORTER_CONFIG, then ./reporter.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args, Debug, Clone, Default)]
struct RunArgs {
    /// Report as if the current time were this RFC 3339 instant
    #[arg(long, value_parser = parse_instant)]
    now: Option<DateTime<Utc>>,

    /// Reset a previously failed period before running
    #[arg(long)]
    retry_failed: bool,

    /// Build and print the report without delivering or touching the ledger
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate and deliver this week's report (the default)
    Run(RunArgs),

    /// Show the reporting window for a given instant
    Window {
        #[arg(long, value_parser = parse_instant)]
        now: Option<DateTime<Utc>>,
    },

    /// List run records, newest first
    Status {
        /// Only this period, e.g. 2026-W42
        #[arg(long)]
        period: Option<String>,
    },

    /// Return a failed period to pending so the next run retries it
    Reset {
        period: String,

        /// Also reset delivered or pending periods
        #[arg(long)]
        force: bool,
    },

    /// Write a starter reporter.toml
    InitConfig,
}

/// Exit statuses for cron and systemd.
mod exit {
    pub const OK: u8 = 0;
    pub const RUN_FAILED: u8 = 1;
    pub const CONFIG: u8 = 2;
    pub const LEDGER: u8 = 3;
}

fn parse_instant(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp like 2026-10-19T09:00:00-05:00: {e}"))
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            let code = exit_code_for(&err);
            tracing::error!(exit_code = code, error_kind = error_kind(&err), "{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::from(code)
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<u8> {
    let json = cli.json;
    match cli.command {
        None => run(cli.config, cli.run, json).await,
        Some(Command::Run(args)) => run(cli.config, args, json).await,
        Some(Command::Window { now }) => {
            let cfg = config::load_config(cli.config)?;
            show_window(&cfg, now.unwrap_or_else(Utc::now), json)?;
            Ok(exit::OK)
        }
        Some(Command::Status { period }) => {
            let cfg = config::load_config(cli.config)?;
            show_status(&cfg, period.as_deref(), json)?;
            Ok(exit::OK)
        }
        Some(Command::Reset { period, force }) => {
            let cfg = config::load_config(cli.config)?;
            let ledger = cfg.open_ledger()?;
            let record = ledger
                .reset(&period, force, Utc::now())
                .with_context(|| format!("reset {period}"))?;
            print_record(&record, json)?;
            Ok(exit::OK)
        }
        Some(Command::InitConfig) => {
            config::init_config(cli.config)?;
            Ok(exit::OK)
        }
    }
}

async fn run(config_path: Option<PathBuf>, args: RunArgs, json: bool) -> Result<u8> {
    let cfg = config::load_config(config_path)?;
    let settings = cfg.settings()?;
    let provider = cfg.build_provider()?;
    let sink = cfg.build_sink()?;
    let as_of = args.now.unwrap_or_else(Utc::now);

    if args.dry_run {
        let ledger = reporter_core::MemoryLedger::new();
        let orch = Orchestrator::new(provider, sink, ledger, settings);
        let outcome = orch.preview(as_of).await;
        let event = RunEvent::from_outcome(&outcome);
        event.emit();
        if json {
            println!("{}", event.to_json_line()?);
        } else if let Some(report) = &outcome.report {
            println!("{}", report.body.trim_end());
        }
        return Ok(if outcome.disposition.is_failure() {
            exit::RUN_FAILED
        } else {
            exit::OK
        });
    }

    let ledger = cfg.open_ledger()?;
    if args.retry_failed {
        let window = compute_window(as_of, &settings.schedule);
        if let Some(r) = ledger.get(&window.period_id)? {
            if r.status == RunStatus::Failed {
                tracing::info!(period_id = %r.period_id, "resetting failed period");
                ledger.reset(&r.period_id, false, Utc::now())?;
            }
        }
    }

    let orch = Orchestrator::new(provider, sink, ledger, settings);
    let outcome = orch.run(as_of).await?;
    let event = RunEvent::from_outcome(&outcome);
    event.emit();
    if json {
        println!("{}", event.to_json_line()?);
    }

    Ok(if outcome.disposition.is_failure() {
        exit::RUN_FAILED
    } else {
        exit::OK
    })
}

fn show_window(cfg: &Config, now: DateTime<Utc>, json: bool) -> Result<()> {
    let settings = cfg.settings()?;
    let w = compute_window(now, &settings.schedule);
    if json {
        println!("{}", serde_json::to_string(&w)?);
        return Ok(());
    }
    let tz = settings.schedule.timezone;
    println!("period: {}", w.period_id);
    println!("start:  {} ({})", w.start.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z"), w.start);
    println!(
        "end:    {} ({})",
        w.end.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z"),
        w.end
    );
    println!("length: {}h", (w.end - w.start).num_hours());
    Ok(())
}

fn show_status(cfg: &Config, period: Option<&str>, json: bool) -> Result<()> {
    let ledger = cfg.open_ledger()?;
    let records = match period {
        Some(p) => ledger.get(p)?.into_iter().collect(),
        None => ledger.list()?,
    };
    if records.is_empty() && !json {
        println!("No runs recorded in {}", ledger.dir().display());
        return Ok(());
    }
    for r in &records {
        print_record(r, json)?;
    }
    Ok(())
}

fn print_record(r: &RunRecord, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(r)?);
        return Ok(());
    }
    let lease = match r.lease_expires_at {
        Some(until) if until > Utc::now() => format!(" lease={}m", (until - Utc::now()).num_minutes().max(1)),
        _ => String::new(),
    };
    println!(
        "{}  {:<9}  attempts={}  updated={}{}{}",
        r.period_id,
        r.status.as_str(),
        r.attempt_count,
        r.updated_at.format("%Y-%m-%d %H:%M"),
        lease,
        r.last_error
            .as_deref()
            .map(|e| format!("  last_error={e}"))
            .unwrap_or_default()
    );
    Ok(())
}

fn report_error(err: &anyhow::Error) -> Option<&ReportError> {
    err.chain().find_map(|e| e.downcast_ref::<ReportError>())
}

fn error_kind(err: &anyhow::Error) -> &'static str {
    report_error(err).map(|e| e.kind().as_str()).unwrap_or("other")
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    match report_error(err) {
        Some(ReportError::Configuration(_)) => exit::CONFIG,
        Some(ReportError::Ledger(_) | ReportError::Conflict(_)) => exit::LEDGER,
        _ => exit::RUN_FAILED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_bare_invocation_runs_with_flags() {
        let cli = Cli::try_parse_from(["reporter", "--now", "2026-10-19T09:00:00-05:00", "--dry-run"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.run.dry_run);
        assert_eq!(cli.run.now.unwrap().to_rfc3339(), "2026-10-19T14:00:00+00:00");
    }

    #[test]
    fn test_subcommands_parse() {
        let cli = Cli::try_parse_from(["reporter", "reset", "2026-W42", "--force", "--json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Some(Command::Reset { ref period, force: true }) if period == "2026-W42"));

        let cli = Cli::try_parse_from(["reporter", "run", "--retry-failed"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Run(RunArgs { retry_failed: true, .. }))));
    }

    #[test]
    fn test_rejects_bad_instant() {
        assert!(Cli::try_parse_from(["reporter", "--now", "last tuesday"]).is_err());
    }

    #[test]
    fn test_exit_codes_follow_error_kind() {
        let config: anyhow::Error = ReportError::config("bad timezone").into();
        assert_eq!(exit_code_for(&config), exit::CONFIG);

        let ledger = anyhow::Error::from(ReportError::Ledger("disk full".into())).context("open ledger");
        assert_eq!(exit_code_for(&ledger), exit::LEDGER);
        assert_eq!(error_kind(&ledger), "ledger");

        let conflict: anyhow::Error = ReportError::Conflict("already delivered".into()).into();
        assert_eq!(exit_code_for(&conflict), exit::LEDGER);

        assert_eq!(exit_code_for(&anyhow::anyhow!("boom")), exit::RUN_FAILED);
    }
}
