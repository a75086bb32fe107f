//! Capability interfaces for the pipeline's external collaborators.
//!
//! Concrete data sources and transports live in other crates; the
//! orchestrator only sees these traits.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{DeliveryReceipt, RenderedReport, Transaction, Window};

/// Source of transactions for a reporting window.
///
/// Failures should be `ReportError::Provider` when transient (network, 5xx)
/// and `ReportError::DataIntegrity` when the data itself is malformed.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    async fn fetch(&self, window: &Window) -> Result<Vec<Transaction>>;
}

/// Transport for rendered reports.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, report: &RenderedReport) -> Result<DeliveryReceipt>;

    /// Best-effort notice that a period failed terminally. Default: nothing.
    async fn alert(&self, _window: &Window, _message: &str) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<T: DataProvider + ?Sized> DataProvider for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn fetch(&self, window: &Window) -> Result<Vec<Transaction>> {
        (**self).fetch(window).await
    }
}

#[async_trait]
impl<T: DeliverySink + ?Sized> DeliverySink for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn deliver(&self, report: &RenderedReport) -> Result<DeliveryReceipt> {
        (**self).deliver(report).await
    }

    async fn alert(&self, window: &Window, message: &str) -> Result<()> {
        (**self).alert(window, message).await
    }
}
