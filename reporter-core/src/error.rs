//! Error taxonomy shared by every stage of the report pipeline.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportError {
    /// The data source could not be reached or answered with an error.
    #[error("provider error: {0}")]
    Provider(String),

    /// The delivery sink rejected or failed to accept the report.
    #[error("delivery error: {0}")]
    Delivery(String),

    /// Input data is malformed (unparseable amount, duplicate id, overflow).
    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    /// The run ledger refused a state transition.
    #[error("ledger conflict: {0}")]
    Conflict(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    /// The ledger's storage medium failed.
    #[error("ledger storage error: {0}")]
    Ledger(String),
}

/// Coarse error category surfaced in logs and the completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Provider,
    Delivery,
    DataIntegrity,
    Conflict,
    Configuration,
    Ledger,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Provider => "provider",
            ErrorKind::Delivery => "delivery",
            ErrorKind::DataIntegrity => "data_integrity",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Ledger => "ledger",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ReportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReportError::Provider(_) => ErrorKind::Provider,
            ReportError::Delivery(_) => ErrorKind::Delivery,
            ReportError::DataIntegrity(_) => ErrorKind::DataIntegrity,
            ReportError::Conflict(_) => ErrorKind::Conflict,
            ReportError::Configuration(_) => ErrorKind::Configuration,
            ReportError::Ledger(_) => ErrorKind::Ledger,
        }
    }

    /// Transient adapter failures are retried with backoff; everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReportError::Provider(_) | ReportError::Delivery(_))
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        ReportError::Provider(msg.into())
    }

    pub fn delivery(msg: impl Into<String>) -> Self {
        ReportError::Delivery(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        ReportError::DataIntegrity(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        ReportError::Configuration(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ReportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_adapter_errors_retry() {
        assert!(ReportError::provider("timeout").is_retryable());
        assert!(ReportError::delivery("502").is_retryable());
        assert!(!ReportError::integrity("bad amount").is_retryable());
        assert!(!ReportError::Conflict("terminal".into()).is_retryable());
        assert!(!ReportError::config("missing").is_retryable());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(ReportError::integrity("x").kind().as_str(), "data_integrity");
        assert_eq!(ReportError::delivery("x").kind().to_string(), "delivery");
    }
}
