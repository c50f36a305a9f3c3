//! Filter renaming columns.

use std::collections::BTreeMap;

use bulkhaul_page::PageOutput;
use bulkhaul_types::{Column, ConfigSource, Schema, StageError, TaskSource};
use serde::Deserialize;

use super::invalid_config;
use crate::plugin::{FilterControl, FilterPlugin};
use crate::session::ExecSession;

#[derive(Debug, Deserialize)]
struct RenameConfig {
    #[serde(default)]
    columns: BTreeMap<String, String>,
}

/// `type: rename` with a `columns: {old: new}` map.
///
/// Only the schema changes; the record layout is identical so pages pass
/// through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenameFilter;

fn renamed_schema(input: &Schema, renames: &BTreeMap<String, String>) -> Result<Schema, StageError> {
    if let Some(missing) = renames.keys().find(|old| input.lookup_column(old).is_none()) {
        return Err(StageError::config(
            "UNKNOWN_COLUMN",
            format!("rename: no column named '{missing}'"),
        ));
    }
    let columns: Vec<Column> = input
        .columns()
        .iter()
        .map(|c| {
            let name = renames.get(c.name()).map_or(c.name(), String::as_str);
            Column::new(c.index(), name, c.column_type())
        })
        .collect();
    let schema = Schema::new(columns);
    for (i, column) in schema.columns().iter().enumerate() {
        if schema.columns()[..i].iter().any(|c| c.name() == column.name()) {
            return Err(StageError::config(
                "DUPLICATE_COLUMN",
                format!("rename: column '{}' appears twice", column.name()),
            ));
        }
    }
    Ok(schema)
}

impl FilterPlugin for RenameFilter {
    fn transaction(
        &self,
        _session: &ExecSession,
        config: &ConfigSource,
        input_schema: &Schema,
        control: &mut dyn FilterControl,
    ) -> Result<(), StageError> {
        let parsed: RenameConfig = config.load_config().map_err(|e| invalid_config(&e))?;
        let output_schema = renamed_schema(input_schema, &parsed.columns)?;
        let mut task = TaskSource::new();
        task.set("columns", &parsed.columns);
        control.run(task, output_schema)
    }

    fn open<'a>(
        &self,
        _session: &ExecSession,
        _task: &TaskSource,
        _input_schema: &Schema,
        _output_schema: &Schema,
        output: Box<dyn PageOutput + 'a>,
    ) -> Result<Box<dyn PageOutput + 'a>, StageError> {
        Ok(output)
    }
}
