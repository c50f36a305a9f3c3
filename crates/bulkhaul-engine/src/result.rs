//! Job result types.

use bulkhaul_types::{ConfigDiff, ConfigSource, ResumeState, StageError};

/// Result of a job that completed, possibly with tolerated partition
/// failures.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Stage contributions to the next configuration, keyed `in` and `out`.
    pub config_diff: ConfigDiff,
    /// User configuration with `config_diff` merged in.
    pub next_config: ConfigSource,
    /// The input reported zero partitions; nothing ran.
    pub skipped: bool,
    /// Partition failures tolerated under `failure_policy: allow_partial`.
    pub ignored_errors: Vec<StageError>,
    /// Final checkpoint of the job. `None` if the input never reached its
    /// control.
    pub resume_state: Option<ResumeState>,
    pub partition_count: usize,
    /// Records committed across every attempt of the job.
    pub records: u64,
    /// Wall time across every attempt, backoff sleeps included.
    pub duration_secs: f64,
    pub retry_count: u32,
    /// Representative failures of the attempts that were retried, oldest
    /// first.
    pub retried_errors: Vec<StageError>,
}

impl ExecutionResult {
    /// Whether every partition succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.ignored_errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_complete_tracks_ignored_errors() {
        let mut result = ExecutionResult {
            config_diff: ConfigDiff::new(),
            next_config: ConfigSource::new(),
            skipped: false,
            ignored_errors: Vec::new(),
            resume_state: None,
            partition_count: 2,
            records: 10,
            duration_secs: 0.1,
            retry_count: 0,
            retried_errors: Vec::new(),
        };
        assert!(result.is_complete());
        result
            .ignored_errors
            .push(StageError::task("WRITE", "disk full"));
        assert!(!result.is_complete());
    }
}
