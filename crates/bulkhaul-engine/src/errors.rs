//! Pipeline error model, failure attribution and retry backoff.

use std::collections::VecDeque;
use std::time::Duration;

use bulkhaul_types::{ErrorCategory, ResumeState, StageError};

const BACKOFF_FAST_BASE_MS: u64 = 100;
const BACKOFF_NORMAL_BASE_MS: u64 = 1_000;
const BACKOFF_SLOW_BASE_MS: u64 = 5_000;
const BACKOFF_MAX_MS: u64 = 60_000;

// ---------------------------------------------------------------------------
// PipelineError: categorised errors for retry decisions
// ---------------------------------------------------------------------------

/// Categorized pipeline error.
///
/// `Stage` is a failure before any partition ran (bad config, a failing
/// transaction). `Partial` means partitions ran and some failed; it carries
/// the resume state so the job can continue where it stopped.
/// `Infrastructure` wraps host-side errors (state backend, task join).
#[derive(Debug)]
pub enum PipelineError {
    /// Typed stage error raised outside partition execution.
    Stage(StageError),
    /// Some partitions failed. `cause` is the attributed representative.
    Partial {
        resume_state: Box<ResumeState>,
        cause: StageError,
        /// Records committed by the partitions that did succeed.
        records: u64,
    },
    /// Infrastructure error (state backend, runtime, etc.)
    Infrastructure(anyhow::Error),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stage(e) => write!(f, "{e}"),
            Self::Partial {
                resume_state,
                cause,
                ..
            } => write!(
                f,
                "{} of {} partitions incomplete: {cause}",
                resume_state.pending_partitions().len(),
                resume_state.partition_count()
            ),
            Self::Infrastructure(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl From<StageError> for PipelineError {
    fn from(e: StageError) -> Self {
        Self::Stage(e)
    }
}

impl PipelineError {
    /// Returns `true` for a partial failure whose cause is retryable. Only
    /// partial failures can be retried since only they carry a resume state.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Partial { cause, .. } => cause.retryable,
            Self::Stage(_) | Self::Infrastructure(_) => false,
        }
    }

    /// The typed stage error, if any.
    pub fn as_stage_error(&self) -> Option<&StageError> {
        match self {
            Self::Stage(e) | Self::Partial { cause: e, .. } => Some(e),
            Self::Infrastructure(_) => None,
        }
    }

    /// Resume state of a partial failure.
    pub fn resume_state(&self) -> Option<&ResumeState> {
        match self {
            Self::Partial { resume_state, .. } => Some(resume_state),
            Self::Stage(_) | Self::Infrastructure(_) => None,
        }
    }
}

/// Compute retry delay based on error hints and attempt number.
pub(crate) fn compute_backoff(err: &StageError, attempt: u32) -> Duration {
    if let Some(ms) = err.retry_after_ms {
        return Duration::from_millis(ms);
    }

    let base_ms: u64 = match err.category {
        ErrorCategory::ChannelClosed => BACKOFF_FAST_BASE_MS,
        ErrorCategory::Task => BACKOFF_NORMAL_BASE_MS,
        ErrorCategory::Config | ErrorCategory::Data | ErrorCategory::Internal => {
            BACKOFF_SLOW_BASE_MS
        }
    };

    let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    Duration::from_millis(delay_ms.min(BACKOFF_MAX_MS))
}

/// Pick one representative out of a set of errors and their suppressed
/// trees.
///
/// The shallowest error that is not just a consequence of a channel close
/// wins (first one on ties); if every error is close-induced the first one
/// is used. Every other error found is attached to the representative as
/// suppressed, flattened.
#[must_use]
pub fn attribute_failure(errors: Vec<StageError>) -> Option<StageError> {
    if errors.is_empty() {
        return None;
    }

    let mut flattened = Vec::new();
    let mut queue: VecDeque<StageError> = errors.into();
    while let Some(mut err) = queue.pop_front() {
        queue.extend(std::mem::take(&mut err.suppressed));
        flattened.push(err);
    }

    let chosen = flattened
        .iter()
        .position(|e| !e.is_close_induced())
        .unwrap_or(0);
    let mut representative = flattened.remove(chosen);
    representative.suppressed = flattened;
    Some(representative)
}
