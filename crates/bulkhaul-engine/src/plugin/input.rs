//! Source-side stage protocol.

use bulkhaul_page::PageOutput;
use bulkhaul_types::{ConfigDiff, ConfigSource, Schema, StageError, TaskReport, TaskSource};

use crate::session::ExecSession;

/// Continuation handed to [`InputPlugin::transaction`].
///
/// Runs every downstream stage and all partitions, then returns the reports
/// of the partitions that succeeded.
pub trait InputControl {
    fn run(
        &mut self,
        task: TaskSource,
        schema: Schema,
        partition_count: usize,
    ) -> Result<Vec<TaskReport>, StageError>;
}

impl<F> InputControl for F
where
    F: FnMut(TaskSource, Schema, usize) -> Result<Vec<TaskReport>, StageError>,
{
    fn run(
        &mut self,
        task: TaskSource,
        schema: Schema,
        partition_count: usize,
    ) -> Result<Vec<TaskReport>, StageError> {
        self(task, schema, partition_count)
    }
}

/// A data source.
pub trait InputPlugin: Send + Sync {
    /// Resolve the schema and partitioning from `config`, call `control`,
    /// and return this stage's contribution to the next configuration.
    fn transaction(
        &self,
        session: &ExecSession,
        config: &ConfigSource,
        control: &mut dyn InputControl,
    ) -> Result<ConfigDiff, StageError>;

    /// Replay a transaction from a frozen task.
    fn resume(
        &self,
        session: &ExecSession,
        task: &TaskSource,
        schema: &Schema,
        partition_count: usize,
        control: &mut dyn InputControl,
    ) -> Result<ConfigDiff, StageError>;

    /// Called once the job is finished for good. `successful_reports` may
    /// cover only some partitions.
    fn cleanup(
        &self,
        session: &ExecSession,
        task: &TaskSource,
        schema: &Schema,
        partition_count: usize,
        successful_reports: &[TaskReport],
    ) -> Result<(), StageError>;

    /// Produce every record of `partition` into `output` and finish it.
    fn run(
        &self,
        session: &ExecSession,
        task: &TaskSource,
        schema: &Schema,
        partition: usize,
        output: &mut dyn PageOutput,
    ) -> Result<TaskReport, StageError>;

    /// Suggest configuration to add to `config`.
    fn guess(
        &self,
        _session: &ExecSession,
        _config: &ConfigSource,
    ) -> Result<ConfigDiff, StageError> {
        Ok(ConfigDiff::new())
    }
}
