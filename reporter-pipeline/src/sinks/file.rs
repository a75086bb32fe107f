//! Writes each report as a markdown file in an output directory.
//!
//! File names carry the period and a content-hash prefix, so re-delivering
//! the same report is a no-op and a changed report never clobbers the old one.

use async_trait::async_trait;
use reporter_core::{DeliveryReceipt, DeliverySink, RenderedReport, ReportError, Result, Window};
use std::path::{Path, PathBuf};

const HASH_PREFIX_LEN: usize = 12;

#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, report: &RenderedReport) -> PathBuf {
        let prefix: String = report.content_hash.chars().take(HASH_PREFIX_LEN).collect();
        self.dir.join(format!("{}-{prefix}.md", report.window.period_id))
    }
}

#[async_trait]
impl DeliverySink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn deliver(&self, report: &RenderedReport) -> Result<DeliveryReceipt> {
        let path = self.path_for(report);
        let receipt = DeliveryReceipt {
            sink: self.name().to_string(),
            reference: path.display().to_string(),
        };

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::debug!(path = %path.display(), "report already written");
            return Ok(receipt);
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ReportError::delivery(format!("create {}: {e}", self.dir.display())))?;
        let tmp = path.with_extension("md.tmp");
        tokio::fs::write(&tmp, report.body.as_bytes())
            .await
            .map_err(|e| ReportError::delivery(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| ReportError::delivery(format!("rename {}: {e}", path.display())))?;

        tracing::info!(path = %path.display(), "wrote report");
        Ok(receipt)
    }

    async fn alert(&self, window: &Window, message: &str) -> Result<()> {
        let path = self.dir.join(format!("{}-FAILED.txt", window.period_id));
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ReportError::delivery(format!("create {}: {e}", self.dir.display())))?;
        tokio::fs::write(&path, format!("{message}\n"))
            .await
            .map_err(|e| ReportError::delivery(format!("write {}: {e}", path.display())))
    }
}
