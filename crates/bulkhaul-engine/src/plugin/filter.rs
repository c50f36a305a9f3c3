//! Schema-aware page transformation stage protocol.

use bulkhaul_page::PageOutput;
use bulkhaul_types::{ConfigSource, Schema, StageError, TaskSource};

use crate::session::ExecSession;

/// Continuation handed to [`FilterPlugin::transaction`].
pub trait FilterControl {
    fn run(&mut self, task: TaskSource, output_schema: Schema) -> Result<(), StageError>;
}

impl<F> FilterControl for F
where
    F: FnMut(TaskSource, Schema) -> Result<(), StageError>,
{
    fn run(&mut self, task: TaskSource, output_schema: Schema) -> Result<(), StageError> {
        self(task, output_schema)
    }
}

/// A filter between the source and the sink.
///
/// Filters see pages of `input_schema` and emit pages of the output schema
/// they announced through their control.
pub trait FilterPlugin: Send + Sync {
    fn transaction(
        &self,
        session: &ExecSession,
        config: &ConfigSource,
        input_schema: &Schema,
        control: &mut dyn FilterControl,
    ) -> Result<(), StageError>;

    fn resume(
        &self,
        _session: &ExecSession,
        task: &TaskSource,
        _input_schema: &Schema,
        output_schema: &Schema,
        control: &mut dyn FilterControl,
    ) -> Result<(), StageError> {
        control.run(task.clone(), output_schema.clone())
    }

    fn cleanup(
        &self,
        _session: &ExecSession,
        _task: &TaskSource,
        _input_schema: &Schema,
        _output_schema: &Schema,
    ) -> Result<(), StageError> {
        Ok(())
    }

    /// Wrap `output` so pages added to the result are transformed first.
    fn open<'a>(
        &self,
        session: &ExecSession,
        task: &TaskSource,
        input_schema: &Schema,
        output_schema: &Schema,
        output: Box<dyn PageOutput + 'a>,
    ) -> Result<Box<dyn PageOutput + 'a>, StageError>;
}
