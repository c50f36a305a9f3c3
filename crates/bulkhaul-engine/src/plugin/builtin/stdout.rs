//! Sink that logs every record.

use bulkhaul_page::{Page, PageOutput, PageReader};
use bulkhaul_types::{ConfigDiff, ConfigSource, Schema, StageError, TaskReport, TaskSource};

use super::records_report;
use crate::plugin::{OutputControl, OutputPlugin, TransactionalPageOutput};
use crate::session::ExecSession;

/// `type: stdout`. Each record is emitted as an info event.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutOutput;

struct StdoutPageOutput {
    reader: PageReader,
    partition: usize,
    records: u64,
}

impl StdoutPageOutput {
    fn render(&self) -> String {
        self.reader
            .schema()
            .columns()
            .iter()
            .map(|c| format!("{}={}", c.name(), self.reader.value(c.index())))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl PageOutput for StdoutPageOutput {
    fn add(&mut self, page: Page) -> Result<(), StageError> {
        self.reader.reset(page);
        while self.reader.next_record() {
            self.records += 1;
            tracing::info!(partition = self.partition, "{}", self.render());
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), StageError> {
        Ok(())
    }

    fn close(&mut self) {
        self.reader.release();
    }
}

impl TransactionalPageOutput for StdoutPageOutput {
    fn abort(&mut self) {}

    fn commit(&mut self) -> Result<TaskReport, StageError> {
        Ok(records_report(self.records))
    }
}

impl OutputPlugin for StdoutOutput {
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
        schema: &Schema,
        partition: usize,
    ) -> Result<Box<dyn TransactionalPageOutput>, StageError> {
        Ok(Box::new(StdoutPageOutput {
            reader: session.page_reader(schema),
            partition,
            records: 0,
        }))
    }
}
