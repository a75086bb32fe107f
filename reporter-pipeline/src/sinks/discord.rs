//! Discord webhook sink.
//!
//! Discord caps message content at 2000 characters; longer reports are cut
//! at a char boundary and marked with an ellipsis. Webhooks return no
//! message id unless `?wait=true` is set, so the receipt is the content hash.

use async_trait::async_trait;
use reporter_core::{DeliveryReceipt, DeliverySink, RenderedReport, ReportError, Result, Window};
use serde::Serialize;

pub const DISCORD_MESSAGE_LIMIT: usize = 2000;
const TRUNCATION_MARK: &str = "...";

#[derive(Debug, Clone)]
pub struct DiscordSink {
    webhook_url: String,
    username: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    content: &'a str,
    username: &'a str,
}

impl DiscordSink {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self> {
        let webhook_url = webhook_url.into();
        if !webhook_url.starts_with("http://") && !webhook_url.starts_with("https://") {
            return Err(ReportError::config("discord webhook url must be http(s)"));
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ReportError::config(format!("http client: {e}")))?;
        Ok(Self {
            webhook_url,
            username: "Budget Reporter".to_string(),
            client,
        })
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    async fn post(&self, content: &str) -> Result<()> {
        let msg = WebhookMessage {
            content,
            username: &self.username,
        };
        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&msg)
            .send()
            .await
            .map_err(|e| ReportError::delivery(format!("discord webhook request: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let txt = resp.text().await.unwrap_or_default();
            return Err(ReportError::delivery(format!("discord webhook failed: {status} {txt}")));
        }
        Ok(())
    }
}

#[async_trait]
impl DeliverySink for DiscordSink {
    fn name(&self) -> &str {
        "discord"
    }

    async fn deliver(&self, report: &RenderedReport) -> Result<DeliveryReceipt> {
        let content = truncate_message(&report.body, DISCORD_MESSAGE_LIMIT);
        self.post(&content).await?;
        tracing::debug!(
            period_id = %report.window.period_id,
            chars = content.chars().count(),
            "posted report to discord"
        );
        Ok(DeliveryReceipt {
            sink: self.name().to_string(),
            reference: report.content_hash.clone(),
        })
    }

    async fn alert(&self, window: &Window, message: &str) -> Result<()> {
        let content = format!("Weekly report for {} failed: {message}", window.period_id);
        self.post(&truncate_message(&content, DISCORD_MESSAGE_LIMIT)).await
    }
}

/// Cut `text` to at most `limit` chars, ending with `...` when shortened.
pub fn truncate_message(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let keep = limit.saturating_sub(TRUNCATION_MARK.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(TRUNCATION_MARK);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_messages_untouched() {
        assert_eq!(truncate_message("hello", 10), "hello");
        assert_eq!(truncate_message("0123456789", 10), "0123456789");
    }

    #[test]
    fn test_truncates_on_char_boundary() {
        let text = "é".repeat(30);
        let out = truncate_message(&text, 10);
        assert_eq!(out.chars().count(), 10);
        assert!(out.ends_with("..."));
        assert!(out.starts_with("ééééééé"));
    }

    #[test]
    fn test_rejects_non_http_url() {
        assert!(matches!(
            DiscordSink::new("discord.com/api/webhooks/1"),
            Err(ReportError::Configuration(_))
        ));
    }
}
