//! Filter chain plumbing: nested transactions and page output wrapping.

use std::sync::Arc;

use bulkhaul_page::PageOutput;
use bulkhaul_types::{Schema, StageError, TaskSource};

use crate::config::StageConfig;
use crate::plugin::FilterPlugin;
use crate::session::ExecSession;

/// Continuation receiving every filter's task and output schema, in chain
/// order.
pub type FilterChainControl<'a> =
    dyn FnMut(Vec<TaskSource>, Vec<Schema>) -> Result<(), StageError> + 'a;

/// Run the filters' transactions nested inside each other. Each filter sees
/// the previous filter's output schema.
///
/// # Errors
///
/// Returns the first error of any filter transaction or of `control`.
pub fn transaction(
    session: &ExecSession,
    filters: &[Arc<dyn FilterPlugin>],
    configs: &[StageConfig],
    input_schema: &Schema,
    control: &mut FilterChainControl<'_>,
) -> Result<(), StageError> {
    if filters.len() != configs.len() {
        return Err(StageError::internal(
            "FILTER_MISMATCH",
            format!("{} filters for {} configs", filters.len(), configs.len()),
        ));
    }
    chain(session, filters, configs, input_schema, Vec::new(), Vec::new(), control)
}

fn chain(
    session: &ExecSession,
    filters: &[Arc<dyn FilterPlugin>],
    configs: &[StageConfig],
    schema: &Schema,
    tasks: Vec<TaskSource>,
    schemas: Vec<Schema>,
    control: &mut FilterChainControl<'_>,
) -> Result<(), StageError> {
    let Some((filter, rest)) = filters.split_first() else {
        return control(tasks, schemas);
    };
    filter.transaction(
        session,
        configs[0].source(),
        schema,
        &mut |task: TaskSource, output_schema: Schema| -> Result<(), StageError> {
            let mut tasks = tasks.clone();
            let mut schemas = schemas.clone();
            tasks.push(task);
            schemas.push(output_schema.clone());
            chain(session, rest, &configs[1..], &output_schema, tasks, schemas, control)
        },
    )
}

/// Replay the filters' transactions from frozen tasks and schemas.
///
/// # Errors
///
/// Returns the first error of any filter or of `control`, or a config error
/// if a filter announces a different schema than the one recorded.
pub fn resume(
    session: &ExecSession,
    filters: &[Arc<dyn FilterPlugin>],
    tasks: &[TaskSource],
    input_schema: &Schema,
    output_schemas: &[Schema],
    control: &mut FilterChainControl<'_>,
) -> Result<(), StageError> {
    if filters.len() != tasks.len() || filters.len() != output_schemas.len() {
        return Err(StageError::config(
            "RESUME_MISMATCH",
            format!(
                "{} filters configured but the resume state holds {}",
                filters.len(),
                tasks.len()
            ),
        ));
    }
    resume_chain(session, filters, tasks, input_schema, output_schemas, 0, control)
}

fn resume_chain(
    session: &ExecSession,
    filters: &[Arc<dyn FilterPlugin>],
    tasks: &[TaskSource],
    input_schema: &Schema,
    output_schemas: &[Schema],
    index: usize,
    control: &mut FilterChainControl<'_>,
) -> Result<(), StageError> {
    let Some(filter) = filters.get(index) else {
        return control(tasks.to_vec(), output_schemas.to_vec());
    };
    let schema_in = if index == 0 {
        input_schema
    } else {
        &output_schemas[index - 1]
    };
    filter.resume(
        session,
        &tasks[index],
        schema_in,
        &output_schemas[index],
        &mut |_task: TaskSource, schema: Schema| -> Result<(), StageError> {
            if schema != output_schemas[index] {
                return Err(StageError::config(
                    "SCHEMA_MISMATCH",
                    format!("filter {index} resumed with a different output schema"),
                ));
            }
            resume_chain(session, filters, tasks, input_schema, output_schemas, index + 1, control)
        },
    )
}

/// Call every filter's cleanup. All filters are attempted; the first error
/// is returned.
///
/// # Errors
///
/// Returns the first cleanup error.
pub fn cleanup(
    session: &ExecSession,
    filters: &[Arc<dyn FilterPlugin>],
    tasks: &[TaskSource],
    input_schema: &Schema,
    output_schemas: &[Schema],
) -> Result<(), StageError> {
    let mut first_error = None;
    let mut schema_in = input_schema;
    for ((filter, task), schema_out) in filters.iter().zip(tasks).zip(output_schemas) {
        if let Err(e) = filter.cleanup(session, task, schema_in, schema_out) {
            tracing::warn!(code = %e.code, "Filter cleanup failed: {}", e.message);
            first_error.get_or_insert(e);
        }
        schema_in = schema_out;
    }
    first_error.map_or(Ok(()), Err)
}

/// Wrap `output` with every filter, last filter innermost, so pages added
/// to the result pass through the chain in order.
///
/// # Errors
///
/// Returns the first error of any filter's `open`.
pub fn open<'a>(
    session: &ExecSession,
    filters: &[Arc<dyn FilterPlugin>],
    tasks: &[TaskSource],
    input_schema: &Schema,
    output_schemas: &[Schema],
    output: Box<dyn PageOutput + 'a>,
) -> Result<Box<dyn PageOutput + 'a>, StageError> {
    let mut output = output;
    for index in (0..filters.len()).rev() {
        let schema_in = if index == 0 {
            input_schema
        } else {
            &output_schemas[index - 1]
        };
        output = filters[index].open(
            session,
            &tasks[index],
            schema_in,
            &output_schemas[index],
            output,
        )?;
    }
    Ok(output)
}

/// Schema reaching the sink: the last filter's output, or the input schema
/// when there are no filters.
#[must_use]
pub fn final_schema(input_schema: &Schema, output_schemas: &[Schema]) -> Schema {
    output_schemas
        .last()
        .unwrap_or(input_schema)
        .clone()
}
