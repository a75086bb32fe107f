//! reporter-core: domain types and pure stages of the weekly budget report

pub mod aggregate;
pub mod category;
pub mod error;
pub mod insights;
pub mod ledger;
pub mod model;
pub mod period;
pub mod ports;
pub mod render;

pub use aggregate::aggregate;
pub use category::{normalize_category, UNCATEGORIZED};
pub use error::{ErrorKind, ReportError, Result};
pub use insights::{annotate, BudgetHealth, BudgetStatus, Insight, InsightKind, InsightPolicy, Severity};
pub use ledger::{Begin, Completion, MemoryLedger, RunLedger, RunRecord, RunStatus};
pub use model::{DeliveryReceipt, RenderedReport, ReportModel, Transaction, TransactionLine, Window};
pub use period::{compute_window, parse_timezone, previous_window, start_of_day_utc, Schedule, WeekSelection};
pub use ports::{DataProvider, DeliverySink};
pub use render::{render, RenderOptions};
