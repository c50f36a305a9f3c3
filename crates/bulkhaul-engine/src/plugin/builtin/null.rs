//! Sink that discards every record.

use std::sync::Arc;

use bulkhaul_page::{Page, PageAllocator, PageOutput};
use bulkhaul_types::{ConfigDiff, ConfigSource, Schema, StageError, TaskReport, TaskSource};

use super::records_report;
use crate::plugin::{OutputControl, OutputPlugin, TransactionalPageOutput};
use crate::session::ExecSession;

/// `type: null`. Counts records and drops them.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullOutput;

struct NullPageOutput {
    allocator: Arc<dyn PageAllocator>,
    records: u64,
}

impl PageOutput for NullPageOutput {
    fn add(&mut self, page: Page) -> Result<(), StageError> {
        self.records += page.record_count() as u64;
        self.allocator.release(page);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), StageError> {
        Ok(())
    }

    fn close(&mut self) {}
}

impl TransactionalPageOutput for NullPageOutput {
    fn abort(&mut self) {}

    fn commit(&mut self) -> Result<TaskReport, StageError> {
        Ok(records_report(self.records))
    }
}

impl OutputPlugin for NullOutput {
    fn transaction(
        &self,
        _session: &ExecSession,
        _config: &ConfigSource,
        _schema: &Schema,
        _partition_count: usize,
        control: &mut dyn OutputControl,
    ) -> Result<ConfigDiff, StageError> {
        control.run(TaskSource::new())?;
        Ok(ConfigDiff::new())
    }

    fn resume(
        &self,
        _session: &ExecSession,
        task: &TaskSource,
        _schema: &Schema,
        _partition_count: usize,
        control: &mut dyn OutputControl,
    ) -> Result<ConfigDiff, StageError> {
        control.run(task.clone())?;
        Ok(ConfigDiff::new())
    }

    fn cleanup(
        &self,
        _session: &ExecSession,
        _task: &TaskSource,
        _schema: &Schema,
        _partition_count: usize,
        _successful_reports: &[TaskReport],
    ) -> Result<(), StageError> {
        Ok(())
    }

    fn open(
        &self,
        session: &ExecSession,
        _task: &TaskSource,
        _schema: &Schema,
        _partition: usize,
    ) -> Result<Box<dyn TransactionalPageOutput>, StageError> {
        Ok(Box::new(NullPageOutput {
            allocator: Arc::clone(session.allocator()),
            records: 0,
        }))
    }
}
