//! Sink-side stage protocol.

use bulkhaul_page::{PageConsumer, PageOutput};
use bulkhaul_types::{ConfigDiff, ConfigSource, Schema, StageError, TaskReport, TaskSource};

use crate::session::ExecSession;

/// Continuation handed to [`OutputPlugin::transaction`].
///
/// Runs all partitions and returns the output reports of those that
/// succeeded.
pub trait OutputControl {
    fn run(&mut self, task: TaskSource) -> Result<Vec<TaskReport>, StageError>;
}

impl<F> OutputControl for F
where
    F: FnMut(TaskSource) -> Result<Vec<TaskReport>, StageError>,
{
    fn run(&mut self, task: TaskSource) -> Result<Vec<TaskReport>, StageError> {
        self(task)
    }
}

/// Per-partition sink handle.
///
/// After `finish`, either `commit` makes the partition's data visible or
/// `abort` discards it. `close` always follows.
pub trait TransactionalPageOutput: PageOutput {
    fn abort(&mut self);

    fn commit(&mut self) -> Result<TaskReport, StageError>;
}

/// A data sink.
pub trait OutputPlugin: Send + Sync {
    fn transaction(
        &self,
        session: &ExecSession,
        config: &ConfigSource,
        schema: &Schema,
        partition_count: usize,
        control: &mut dyn OutputControl,
    ) -> Result<ConfigDiff, StageError>;

    fn resume(
        &self,
        session: &ExecSession,
        task: &TaskSource,
        schema: &Schema,
        partition_count: usize,
        control: &mut dyn OutputControl,
    ) -> Result<ConfigDiff, StageError>;

    fn cleanup(
        &self,
        session: &ExecSession,
        task: &TaskSource,
        schema: &Schema,
        partition_count: usize,
        successful_reports: &[TaskReport],
    ) -> Result<(), StageError>;

    fn open(
        &self,
        session: &ExecSession,
        task: &TaskSource,
        schema: &Schema,
        partition: usize,
    ) -> Result<Box<dyn TransactionalPageOutput>, StageError>;

    fn guess(
        &self,
        _session: &ExecSession,
        _config: &ConfigSource,
    ) -> Result<ConfigDiff, StageError> {
        Ok(ConfigDiff::new())
    }

    /// Drain a partition's channel into [`open`](Self::open)'s handle and
    /// commit it. The handle is aborted on any failure and always closed.
    fn run(
        &self,
        session: &ExecSession,
        task: &TaskSource,
        schema: &Schema,
        partition: usize,
        pages: &mut PageConsumer,
    ) -> Result<TaskReport, StageError> {
        let mut output = self.open(session, task, schema, partition)?;
        let result = drain(pages, output.as_mut())
            .and_then(|()| output.finish())
            .and_then(|()| output.commit());
        if result.is_err() {
            output.abort();
        }
        output.close();
        result
    }
}

fn drain(pages: &mut PageConsumer, output: &mut dyn TransactionalPageOutput) -> Result<(), StageError> {
    for page in pages {
        output.add(page?)?;
    }
    Ok(())
}
