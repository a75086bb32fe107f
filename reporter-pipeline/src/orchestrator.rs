//! Drives one period through fetch, aggregate, render and deliver.
//!
//! ```text
//! Idle -> FetchingData -> Aggregating -> Rendering -> Delivering -> Completed
//!            \______________\_____________\_____________\-------> Failed
//! ```
//!
//! The ledger is consulted before any side effect and written on every
//! retry and at the end, so a period is delivered at most once per ledger
//! no matter how many triggers fire.

use chrono::{DateTime, Utc};
use reporter_core::insights::annotate;
use reporter_core::{
    aggregate, compute_window, previous_window, render, Begin, Completion, DataProvider, DeliveryReceipt,
    DeliverySink, InsightPolicy, RenderOptions, RenderedReport, ReportError, ReportModel, Result, RunLedger,
    RunRecord, RunStatus, Schedule, Transaction, Window,
};
use backon::Retryable;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct Settings {
    pub schedule: Schedule,
    pub retry: RetryPolicy,
    /// How long a pending record is owned by the run that wrote it
    pub lease: chrono::Duration,
    pub compare_with_previous: bool,
    pub insights: InsightPolicy,
    pub render: RenderOptions,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schedule: Schedule::default(),
            retry: RetryPolicy::default(),
            lease: chrono::Duration::minutes(30),
            compare_with_previous: true,
            insights: InsightPolicy::default(),
            render: RenderOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    FetchingData,
    Aggregating,
    Rendering,
    Delivering,
    Completed,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::FetchingData => "fetching_data",
            Stage::Aggregating => "aggregating",
            Stage::Rendering => "rendering",
            Stage::Delivering => "delivering",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        }
    }
}

/// What a run did with its period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// This run delivered the report.
    Delivered,
    /// An earlier run already delivered it; nothing was fetched or sent.
    AlreadyDelivered,
    /// Another live run owns the period.
    InProgress,
    /// The period failed earlier and needs a reset.
    PreviouslyFailed,
    /// This run failed and recorded the failure.
    Failed,
    /// Report built without touching the ledger or the sink.
    DryRun,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Delivered => "delivered",
            Disposition::AlreadyDelivered => "already_delivered",
            Disposition::InProgress => "in_progress",
            Disposition::PreviouslyFailed => "previously_failed",
            Disposition::Failed => "failed",
            Disposition::DryRun => "dry_run",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Disposition::Failed | Disposition::PreviouslyFailed)
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub window: Window,
    pub disposition: Disposition,
    /// Final state: `Completed`, `Failed`, or `Idle` when nothing ran
    pub stage: Stage,
    /// Stage that was executing when the run failed
    pub failed_at: Option<Stage>,
    pub record: Option<RunRecord>,
    pub report: Option<RenderedReport>,
    pub receipt: Option<DeliveryReceipt>,
    pub error: Option<ReportError>,
}

impl RunOutcome {
    fn skipped(window: Window, disposition: Disposition, stage: Stage, record: RunRecord) -> Self {
        Self {
            window,
            disposition,
            stage,
            failed_at: None,
            record: Some(record),
            report: None,
            receipt: None,
            error: None,
        }
    }
}

/// Why report construction stopped early.
enum Halt {
    Failed(Stage, ReportError),
    /// The ledger itself failed; the run cannot record anything.
    Ledger(ReportError),
}

impl Halt {
    fn is_retryable(&self) -> bool {
        matches!(self, Halt::Failed(_, e) if e.is_retryable())
    }
}

pub struct Orchestrator<P, S, L> {
    provider: P,
    sink: S,
    ledger: L,
    settings: Settings,
}

impl<P, S, L> Orchestrator<P, S, L>
where
    P: DataProvider,
    S: DeliverySink,
    L: RunLedger,
{
    pub fn new(provider: P, sink: S, ledger: L, settings: Settings) -> Self {
        Self {
            provider,
            sink,
            ledger,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Process the period that contains (or precedes) `as_of`.
    ///
    /// Adapter failures end in `Disposition::Failed` and are recorded in the
    /// ledger. `Err` is returned only when the ledger itself fails.
    pub async fn run(&self, as_of: DateTime<Utc>) -> Result<RunOutcome> {
        let window = compute_window(as_of, &self.settings.schedule);
        let period_id = window.period_id.clone();

        let lease = self.settings.lease;
        let begin = self.on_ledger(|l| l.begin(&period_id, Utc::now(), lease))?;
        let record = match begin {
            Begin::Fresh(r) | Begin::Resumed(r) => r,
            Begin::Settled(r) if r.status == RunStatus::Delivered => {
                tracing::info!(period_id = %period_id, "period already delivered");
                return Ok(RunOutcome::skipped(window, Disposition::AlreadyDelivered, Stage::Completed, r));
            }
            Begin::Settled(r) => {
                tracing::warn!(
                    period_id = %period_id,
                    last_error = r.last_error.as_deref().unwrap_or(""),
                    "period previously failed; reset it to retry"
                );
                return Ok(RunOutcome::skipped(window, Disposition::PreviouslyFailed, Stage::Failed, r));
            }
            Begin::Busy(r) => {
                tracing::info!(period_id = %period_id, "period owned by another run");
                return Ok(RunOutcome::skipped(window, Disposition::InProgress, Stage::Idle, r));
            }
        };
        tracing::info!(
            period_id = %period_id,
            attempt = record.attempt_count,
            start = %window.start,
            end = %window.end,
            "starting report run"
        );

        let built = match self.build_report(&window, true).await {
            Ok(report) => self.deliver(&report).await.map(|receipt| (report, receipt)),
            Err(halt) => Err(halt),
        };

        match built {
            Ok((report, receipt)) => {
                let completion = Completion::delivered(report.content_hash.clone(), receipt.reference.clone());
                let record = self.on_ledger(|l| l.complete(&period_id, &completion, Utc::now()))?;
                tracing::info!(
                    period_id = %period_id,
                    sink = %receipt.sink,
                    attempts = record.attempt_count,
                    content_hash = %report.content_hash,
                    "report delivered"
                );
                Ok(RunOutcome {
                    window,
                    disposition: Disposition::Delivered,
                    stage: Stage::Completed,
                    failed_at: None,
                    record: Some(record),
                    report: Some(report),
                    receipt: Some(receipt),
                    error: None,
                })
            }
            Err(Halt::Ledger(e)) => Err(e),
            Err(Halt::Failed(stage, error)) => {
                let completion = Completion::from_error(&error);
                let record = self.on_ledger(|l| l.complete(&period_id, &completion, Utc::now()))?;
                tracing::error!(
                    period_id = %period_id,
                    stage = stage.as_str(),
                    error_kind = %error.kind(),
                    attempts = record.attempt_count,
                    error = %error,
                    "report run failed"
                );
                if let Err(e) = self.sink.alert(&window, &error.to_string()).await {
                    tracing::warn!(period_id = %period_id, error = %e, "failure alert not sent");
                }
                Ok(RunOutcome {
                    window,
                    disposition: Disposition::Failed,
                    stage: Stage::Failed,
                    failed_at: Some(stage),
                    record: Some(record),
                    report: None,
                    receipt: None,
                    error: Some(error),
                })
            }
        }
    }

    /// Build the report for `as_of` without consulting the ledger or delivering.
    pub async fn preview(&self, as_of: DateTime<Utc>) -> RunOutcome {
        let window = compute_window(as_of, &self.settings.schedule);
        match self.build_report(&window, false).await {
            Ok(report) => RunOutcome {
                window,
                disposition: Disposition::DryRun,
                stage: Stage::Completed,
                failed_at: None,
                record: None,
                report: Some(report),
                receipt: None,
                error: None,
            },
            Err(Halt::Failed(stage, error)) => RunOutcome {
                window,
                disposition: Disposition::Failed,
                stage: Stage::Failed,
                failed_at: Some(stage),
                record: None,
                report: None,
                receipt: None,
                error: Some(error),
            },
            Err(Halt::Ledger(error)) => RunOutcome {
                window,
                disposition: Disposition::Failed,
                stage: Stage::Failed,
                failed_at: None,
                record: None,
                report: None,
                receipt: None,
                error: Some(error),
            },
        }
    }

    async fn build_report(&self, window: &Window, track: bool) -> std::result::Result<RenderedReport, Halt> {
        let period = track.then_some(window.period_id.as_str());

        tracing::debug!(period_id = %window.period_id, provider = self.provider.name(), "fetching transactions");
        let current = self.fetch(window, period).await?;

        let prior = if self.settings.compare_with_previous {
            let prior_window = previous_window(window, &self.settings.schedule);
            let txns = self.fetch(&prior_window, period).await?;
            Some((prior_window, txns))
        } else {
            None
        };

        tracing::debug!(period_id = %window.period_id, count = current.len(), "aggregating");
        let prior_model = match prior {
            Some((prior_window, txns)) => {
                let model = aggregate(&txns, &prior_window, None).map_err(|e| Halt::Failed(Stage::Aggregating, e))?;
                // No history at all is "no comparison", not "spent nothing".
                (!model.is_empty()).then_some(model)
            }
            None => None,
        };
        let model = aggregate(&current, window, prior_model.as_ref().map(|m| m.total))
            .map_err(|e| Halt::Failed(Stage::Aggregating, e))?;
        let model: ReportModel = annotate(model, prior_model.as_ref(), &self.settings.insights);

        tracing::debug!(period_id = %window.period_id, insights = model.insights.len(), "rendering");
        Ok(render(&model, &self.settings.render))
    }

    async fn fetch(&self, window: &Window, period: Option<&str>) -> std::result::Result<Vec<Transaction>, Halt> {
        let provider = &self.provider;
        self.with_retry(Stage::FetchingData, period, move || provider.fetch(window))
            .await
    }

    async fn deliver(&self, report: &RenderedReport) -> std::result::Result<DeliveryReceipt, Halt> {
        let sink = &self.sink;
        let period = Some(report.window.period_id.as_str());
        self.with_retry(Stage::Delivering, period, move || sink.deliver(report))
            .await
    }

    /// Run `op`, retrying retryable errors up to the ceiling with backoff.
    /// When `period` is set each retry is counted in the ledger before it runs.
    async fn with_retry<T, F, Fut>(&self, stage: Stage, period: Option<&str>, mut op: F) -> std::result::Result<T, Halt>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = self.settings.retry;
        let lease = self.settings.lease;
        let calls = AtomicU32::new(0);

        let attempt = || {
            let retry = calls.fetch_add(1, Ordering::Relaxed);
            let call = op();
            async move {
                if retry > 0 {
                    if let Some(period_id) = period {
                        self.on_ledger(|l| l.record_attempt(period_id, Utc::now(), lease))
                            .map_err(Halt::Ledger)?;
                    }
                }
                call.await.map_err(|e| Halt::Failed(stage, e))
            }
        };

        attempt
            .retry(policy.backoff())
            .when(Halt::is_retryable)
            .notify(|halt: &Halt, delay| {
                if let Halt::Failed(_, e) = halt {
                    tracing::warn!(
                        stage = stage.as_str(),
                        retry = calls.load(Ordering::Relaxed),
                        ceiling = policy.ceiling,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, backing off"
                    );
                }
            })
            .await
    }

    /// Ledger calls may block on file locks; keep them off the async workers
    /// when the runtime has threads to spare.
    fn on_ledger<T>(&self, f: impl FnOnce(&L) -> Result<T>) -> Result<T> {
        match Handle::try_current().map(|h| h.runtime_flavor()) {
            Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(|| f(&self.ledger)),
            _ => f(&self.ledger),
        }
    }
}
