//! Execution mode types for pipeline runs.

use arrow::record_batch::RecordBatch;
use bulkhaul_types::{Schema, Value};

use crate::result::ExecutionResult;

/// Rows sampled by a preview when no limit is given.
pub const DEFAULT_SAMPLE_ROWS: usize = 20;

/// Runtime execution options (not part of pipeline YAML config).
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Sample the source through the filters instead of loading the sink.
    pub preview: bool,
    /// Maximum rows to sample (only used with `preview`).
    pub sample_rows: Option<usize>,
}

impl ExecutionOptions {
    #[must_use]
    pub fn sample_limit(&self) -> usize {
        self.sample_rows.unwrap_or(DEFAULT_SAMPLE_ROWS)
    }
}

/// Rows sampled by a preview, after every filter.
#[derive(Debug)]
pub struct PreviewResult {
    pub schema: Schema,
    pub rows: Vec<Vec<Value>>,
    /// The same rows as one Arrow batch, for display.
    pub batch: RecordBatch,
}

/// Either a normal job result or a preview.
#[derive(Debug)]
pub enum PipelineOutcome {
    Run(ExecutionResult),
    Preview(PreviewResult),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_options_default_is_normal_mode() {
        let opts = ExecutionOptions::default();
        assert!(!opts.preview);
        assert_eq!(opts.sample_limit(), DEFAULT_SAMPLE_ROWS);
    }

    #[test]
    fn explicit_sample_rows_wins() {
        let opts = ExecutionOptions {
            preview: true,
            sample_rows: Some(3),
        };
        assert_eq!(opts.sample_limit(), 3);
    }
}
