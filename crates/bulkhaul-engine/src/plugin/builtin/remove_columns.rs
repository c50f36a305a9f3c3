//! Filter projecting away columns.

use bulkhaul_page::{Page, PageBuilder, PageOutput, PageReader};
use bulkhaul_types::{ConfigSource, Schema, StageError, TaskSource, Value};
use serde::{Deserialize, Serialize};

use super::invalid_config;
use crate::plugin::{FilterControl, FilterPlugin};
use crate::session::ExecSession;

#[derive(Debug, Deserialize)]
struct RemoveColumnsConfig {
    columns: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RemoveColumnsTask {
    /// Input column indices that survive, in order.
    keep: Vec<usize>,
}

/// `type: remove_columns` with a `columns: [name, ...]` list.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveColumnsFilter;

fn project(input: &Schema, remove: &[String]) -> Result<(Schema, Vec<usize>), StageError> {
    if let Some(missing) = remove.iter().find(|name| input.lookup_column(name).is_none()) {
        return Err(StageError::config(
            "UNKNOWN_COLUMN",
            format!("remove_columns: no column named '{missing}'"),
        ));
    }
    let kept: Vec<_> = input
        .columns()
        .iter()
        .filter(|c| !remove.iter().any(|r| r == c.name()))
        .collect();
    let keep = kept.iter().map(|c| c.index()).collect();
    let schema = kept
        .into_iter()
        .fold(Schema::builder(), |b, c| b.add(c.name(), c.column_type()))
        .build();
    Ok((schema, keep))
}

struct ProjectingOutput<'a> {
    reader: PageReader,
    builder: PageBuilder<Box<dyn PageOutput + 'a>>,
    keep: Vec<usize>,
    row: Vec<Value>,
}

impl PageOutput for ProjectingOutput<'_> {
    fn add(&mut self, page: Page) -> Result<(), StageError> {
        self.reader.reset(page);
        while self.reader.next_record() {
            self.row.clear();
            self.row.extend(self.keep.iter().map(|&i| self.reader.value(i)));
            self.builder.add_values(&self.row)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), StageError> {
        self.builder.finish()
    }

    fn close(&mut self) {
        self.reader.release();
        self.builder.close();
    }
}

impl FilterPlugin for RemoveColumnsFilter {
    fn transaction(
        &self,
        _session: &ExecSession,
        config: &ConfigSource,
        input_schema: &Schema,
        control: &mut dyn FilterControl,
    ) -> Result<(), StageError> {
        let parsed: RemoveColumnsConfig = config.load_config().map_err(|e| invalid_config(&e))?;
        let (output_schema, keep) = project(input_schema, &parsed.columns)?;
        let task = TaskSource::from_serializable(&RemoveColumnsTask { keep })
            .map_err(|e| invalid_config(&e))?;
        control.run(task, output_schema)
    }

    fn open<'a>(
        &self,
        session: &ExecSession,
        task: &TaskSource,
        input_schema: &Schema,
        output_schema: &Schema,
        output: Box<dyn PageOutput + 'a>,
    ) -> Result<Box<dyn PageOutput + 'a>, StageError> {
        let task: RemoveColumnsTask = task.load_config().map_err(|e| invalid_config(&e))?;
        Ok(Box::new(ProjectingOutput {
            reader: session.page_reader(input_schema),
            builder: session.page_builder(output_schema, output),
            row: Vec::with_capacity(task.keep.len()),
            keep: task.keep,
        }))
    }
}
