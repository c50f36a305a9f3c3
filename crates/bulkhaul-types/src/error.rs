//! Structured error model for stage operations.
//!
//! [`StageError`] carries a category, retry metadata, optional diagnostic
//! details and the errors it suppressed. Construct via the category-specific
//! factory methods.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Broad classification of a stage error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid configuration. Fatal before any partition starts; never retried.
    Config,
    /// A single record could not be processed.
    Data,
    /// A partition failed.
    Task,
    /// The page channel was closed underneath the operation.
    ChannelClosed,
    /// Programmer error or panic.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Data => "data",
            Self::Task => "task",
            Self::ChannelClosed => "channel_closed",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Structured error from a stage operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {code}: {message}")]
pub struct StageError {
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suppressed: Vec<StageError>,
}

impl StageError {
    fn new(
        category: ErrorCategory,
        retryable: bool,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retryable,
            retry_after_ms: None,
            details: None,
            suppressed: Vec::new(),
        }
    }

    /// Configuration error (not retryable).
    #[must_use]
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Config, false, code, message)
    }

    /// Per-record data error (not retryable).
    #[must_use]
    pub fn data(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Data, false, code, message)
    }

    /// Partition failure (not retryable).
    #[must_use]
    pub fn task(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Task, false, code, message)
    }

    /// Transient partition failure; a resumed run may succeed.
    #[must_use]
    pub fn retryable_task(
        code: impl Into<String>,
        message: impl Into<String>,
        retry_after_ms: Option<u64>,
    ) -> Self {
        let mut err = Self::new(ErrorCategory::Task, true, code, message);
        err.retry_after_ms = retry_after_ms;
        err
    }

    /// Operation attempted on a closed page channel.
    #[must_use]
    pub fn channel_closed(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::ChannelClosed, false, "CHANNEL_CLOSED", message)
    }

    /// Internal error (not retryable).
    #[must_use]
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, false, code, message)
    }

    /// Attach structured diagnostic details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attach an error that was hidden behind this one.
    pub fn add_suppressed(&mut self, err: StageError) {
        self.suppressed.push(err);
    }

    /// Whether this error is only a consequence of a channel being closed.
    #[must_use]
    pub fn is_close_induced(&self) -> bool {
        self.category == ErrorCategory::ChannelClosed
    }
}
