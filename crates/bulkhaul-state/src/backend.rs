//! State backend trait definition.
//!
//! Model types live in [`bulkhaul_types::state`].

use bulkhaul_types::state::{PipelineId, RunRecord, RunStats, RunStatus};
use bulkhaul_types::ResumeState;

use crate::error;

/// Storage contract for job state.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn StateBackend>`.
pub trait StateBackend: Send + Sync {
    /// Persist the resume checkpoint of a pipeline, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn save_resume_state(&self, pipeline: &PipelineId, state: &ResumeState) -> error::Result<()>;

    /// Read the resume checkpoint of a pipeline.
    ///
    /// Returns `Ok(None)` when no checkpoint has been saved.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage or decode failure.
    fn load_resume_state(&self, pipeline: &PipelineId) -> error::Result<Option<ResumeState>>;

    /// Delete the resume checkpoint. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn clear_resume_state(&self, pipeline: &PipelineId) -> error::Result<bool>;

    /// Persist the configuration the next run should start from.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn save_next_config(&self, pipeline: &PipelineId, config: &serde_json::Value)
        -> error::Result<()>;

    /// Read the last saved next configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage or decode failure.
    fn load_next_config(&self, pipeline: &PipelineId) -> error::Result<Option<serde_json::Value>>;

    /// Begin a new run, returning its unique ID.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn start_run(&self, pipeline: &PipelineId) -> error::Result<i64>;

    /// Finalize a run with status and aggregate stats.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats) -> error::Result<()>;

    /// Most recent runs of a pipeline, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list_runs(&self, pipeline: &PipelineId, limit: usize) -> error::Result<Vec<RunRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn StateBackend) {}
    }
}
