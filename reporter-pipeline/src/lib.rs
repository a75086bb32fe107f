//! reporter-pipeline: runs a weekly report from provider to sink, exactly once per period.

pub mod event;
pub mod file_ledger;
pub mod orchestrator;
pub mod retry;
pub mod sinks;

pub use event::RunEvent;
pub use file_ledger::FileLedger;
pub use orchestrator::{Disposition, Orchestrator, RunOutcome, Settings, Stage};
pub use retry::RetryPolicy;
pub use sinks::{DiscordSink, FileSink, StdoutSink};
