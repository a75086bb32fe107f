use async_trait::async_trait;
use reporter_core::{DeliveryReceipt, DeliverySink, RenderedReport, ReportError, Result};
use tokio::io::AsyncWriteExt;

/// Prints the report body to standard output.
#[derive(Debug, Clone, Default)]
pub struct StdoutSink;

#[async_trait]
impl DeliverySink for StdoutSink {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn deliver(&self, report: &RenderedReport) -> Result<DeliveryReceipt> {
        let mut out = tokio::io::stdout();
        let mut body = report.body.clone();
        if !body.ends_with('\n') {
            body.push('\n');
        }
        out.write_all(body.as_bytes())
            .await
            .map_err(|e| ReportError::delivery(format!("write stdout: {e}")))?;
        out.flush()
            .await
            .map_err(|e| ReportError::delivery(format!("flush stdout: {e}")))?;
        Ok(DeliveryReceipt {
            sink: self.name().to_string(),
            reference: report.content_hash.clone(),
        })
    }
}
