//! Job transactions.
//!
//! A job nests the stage transactions input → filters → output; the
//! innermost control freezes every task into a [`ResumeState`] and runs
//! the partitions. Everything here blocks and is driven from a blocking
//! thread by the orchestrator.

use std::sync::Arc;
use std::time::Instant;

use bulkhaul_page::{Page, PageOutput, PageReader};
use bulkhaul_types::{ConfigDiff, ResumeState, Schema, StageError, TaskReport, TaskSource, Value};
use tracing::{debug, info, warn};

use crate::arrow::rows_to_record_batch;
use crate::config::{FailurePolicy, PipelineConfig};
use crate::errors::{attribute_failure, PipelineError};
use crate::execution::PreviewResult;
use crate::executor::{LocalExecutor, PartitionOutcome};
use crate::filters;
use crate::resolve::ResolvedPlugins;
use crate::result::ExecutionResult;
use crate::session::ExecSession;

/// What the nested controls learn while a job runs.
#[derive(Default)]
struct ProcessState {
    resume_state: Option<ResumeState>,
    ignored_errors: Vec<StageError>,
    records: u64,
    output_diff: ConfigDiff,
}

impl ProcessState {
    fn successful_input_reports(&self) -> Vec<TaskReport> {
        self.resume_state
            .as_ref()
            .map(ResumeState::successful_input_reports)
            .unwrap_or_default()
    }
}

/// Run a new job.
///
/// # Errors
///
/// `Stage` if a transaction fails before partitions are planned, `Partial`
/// (carrying the resume state) once they are.
pub fn run(
    session: &Arc<ExecSession>,
    plugins: &ResolvedPlugins,
    config: &PipelineConfig,
) -> Result<ExecutionResult, PipelineError> {
    let started = Instant::now();
    let executor = LocalExecutor::new(Arc::clone(session));
    let policy = config.exec.failure_policy;
    let mut state = ProcessState::default();

    let input_diff = plugins.input.transaction(
        session,
        config.input.source(),
        &mut |input_task: TaskSource,
              input_schema: Schema,
              partition_count: usize|
              -> Result<Vec<TaskReport>, StageError> {
            debug!(partition_count, columns = input_schema.column_count(), "Input transaction ready");
            filters::transaction(
                session,
                &plugins.filters,
                &config.filters,
                &input_schema,
                &mut |filter_tasks: Vec<TaskSource>,
                      filter_schemas: Vec<Schema>|
                      -> Result<(), StageError> {
                    let output_schema = filters::final_schema(&input_schema, &filter_schemas);
                    let output_diff = plugins.output.transaction(
                        session,
                        config.output.source(),
                        &output_schema,
                        partition_count,
                        &mut |output_task: TaskSource| -> Result<Vec<TaskReport>, StageError> {
                            let resume = ResumeState::new(
                                session.exec_task(),
                                input_task.clone(),
                                filter_tasks.clone(),
                                filter_schemas.clone(),
                                output_task,
                                input_schema.clone(),
                                output_schema.clone(),
                                partition_count,
                            );
                            execute_partitions(&executor, plugins, policy, resume, &mut state)
                        },
                    )?;
                    state.output_diff = output_diff;
                    Ok(())
                },
            )?;
            Ok(state.successful_input_reports())
        },
    );

    let result = finish(config, input_diff, state, started)?;
    complete(session, plugins, &result);
    Ok(result)
}

/// Continue a job from `frozen`: the stage transactions are replayed from
/// their frozen tasks and only the pending partitions run.
///
/// # Errors
///
/// As [`run`]. A stage that reports a schema different from the frozen one
/// fails with a config error.
pub fn resume(
    session: &Arc<ExecSession>,
    plugins: &ResolvedPlugins,
    config: &PipelineConfig,
    frozen: ResumeState,
) -> Result<ExecutionResult, PipelineError> {
    let started = Instant::now();
    let executor = LocalExecutor::new(Arc::clone(session));
    let policy = config.exec.failure_policy;
    let partition_count = frozen.partition_count();
    info!(
        pipeline = %session.pipeline(),
        pending = frozen.pending_partitions().len(),
        partitions = partition_count,
        "Resuming job"
    );
    let mut state = ProcessState::default();

    let input_diff = plugins.input.resume(
        session,
        &frozen.input_task,
        &frozen.input_schema,
        partition_count,
        &mut |input_task: TaskSource,
              input_schema: Schema,
              count: usize|
              -> Result<Vec<TaskReport>, StageError> {
            ensure_unchanged("input", &frozen.input_schema, &input_schema)?;
            if count != partition_count {
                return Err(StageError::config(
                    "RESUME_MISMATCH",
                    format!("input resumed with {count} partitions, checkpoint has {partition_count}"),
                ));
            }
            filters::resume(
                session,
                &plugins.filters,
                &frozen.filter_tasks,
                &frozen.input_schema,
                &frozen.filter_schemas,
                &mut |filter_tasks: Vec<TaskSource>,
                      filter_schemas: Vec<Schema>|
                      -> Result<(), StageError> {
                    let output_diff = plugins.output.resume(
                        session,
                        &frozen.output_task,
                        &frozen.output_schema,
                        partition_count,
                        &mut |output_task: TaskSource| -> Result<Vec<TaskReport>, StageError> {
                            let mut resume = frozen.clone();
                            resume.input_task = input_task.clone();
                            resume.filter_tasks = filter_tasks.clone();
                            resume.filter_schemas = filter_schemas.clone();
                            resume.output_task = output_task;
                            execute_partitions(&executor, plugins, policy, resume, &mut state)
                        },
                    )?;
                    state.output_diff = output_diff;
                    Ok(())
                },
            )?;
            Ok(state.successful_input_reports())
        },
    );

    let result = finish(config, input_diff, state, started)?;
    complete(session, plugins, &result);
    Ok(result)
}

/// Release whatever the stages kept for a job that is finished for good.
///
/// Every stage is asked even if an earlier one fails.
///
/// # Errors
///
/// Returns the first cleanup failure.
pub fn cleanup(
    session: &ExecSession,
    plugins: &ResolvedPlugins,
    state: &ResumeState,
) -> Result<(), StageError> {
    let partition_count = state.partition_count();
    let mut first_error = None;

    if let Err(e) = plugins.input.cleanup(
        session,
        &state.input_task,
        &state.input_schema,
        partition_count,
        &state.successful_input_reports(),
    ) {
        warn!(code = %e.code, "Input cleanup failed: {}", e.message);
        first_error.get_or_insert(e);
    }
    if let Err(e) = filters::cleanup(
        session,
        &plugins.filters,
        &state.filter_tasks,
        &state.input_schema,
        &state.filter_schemas,
    ) {
        first_error.get_or_insert(e);
    }
    if let Err(e) = plugins.output.cleanup(
        session,
        &state.output_task,
        &state.output_schema,
        partition_count,
        &state.successful_output_reports(),
    ) {
        warn!(code = %e.code, "Output cleanup failed: {}", e.message);
        first_error.get_or_insert(e);
    }

    first_error.map_or(Ok(()), Err)
}

/// Sample up to `limit` rows of the first partition, after every filter.
/// The output stage is never touched.
///
/// # Errors
///
/// Returns the first stage error other than the one that stops sampling.
pub fn preview(
    session: &ExecSession,
    plugins: &ResolvedPlugins,
    config: &PipelineConfig,
    limit: usize,
) -> Result<PreviewResult, StageError> {
    let mut sampled: Option<(Schema, Vec<Vec<Value>>)> = None;

    plugins.input.transaction(
        session,
        config.input.source(),
        &mut |input_task: TaskSource,
              input_schema: Schema,
              partition_count: usize|
              -> Result<Vec<TaskReport>, StageError> {
            filters::transaction(
                session,
                &plugins.filters,
                &config.filters,
                &input_schema,
                &mut |filter_tasks: Vec<TaskSource>,
                      filter_schemas: Vec<Schema>|
                      -> Result<(), StageError> {
                    let output_schema = filters::final_schema(&input_schema, &filter_schemas);
                    let rows = if partition_count == 0 || limit == 0 {
                        Vec::new()
                    } else {
                        sample_partition(
                            session,
                            plugins,
                            &input_task,
                            &input_schema,
                            &filter_tasks,
                            &filter_schemas,
                            &output_schema,
                            limit,
                        )?
                    };
                    sampled = Some((output_schema, rows));
                    Ok(())
                },
            )?;
            Ok(Vec::new())
        },
    )?;

    let (schema, rows) = sampled.unwrap_or_else(|| (Schema::new(Vec::new()), Vec::new()));
    let batch = rows_to_record_batch(&schema, &rows)
        .map_err(|e| StageError::internal("ARROW_CONVERT", e.to_string()))?;
    info!(rows = rows.len(), columns = schema.column_count(), "Preview sampled");
    Ok(PreviewResult {
        schema,
        rows,
        batch,
    })
}

#[allow(clippy::too_many_arguments)]
fn sample_partition(
    session: &ExecSession,
    plugins: &ResolvedPlugins,
    input_task: &TaskSource,
    input_schema: &Schema,
    filter_tasks: &[TaskSource],
    filter_schemas: &[Schema],
    output_schema: &Schema,
    limit: usize,
) -> Result<Vec<Vec<Value>>, StageError> {
    let mut sampler = SamplingOutput::new(session.page_reader(output_schema), limit);
    let result = {
        let mut output = filters::open(
            session,
            &plugins.filters,
            filter_tasks,
            input_schema,
            filter_schemas,
            Box::new(&mut sampler),
        )?;
        let result = plugins
            .input
            .run(session, input_task, input_schema, 0, output.as_mut());
        output.close();
        result
    };
    match result {
        Ok(_) => {}
        Err(e) if e.is_close_induced() && sampler.is_full() => {
            debug!(limit, "Sample complete, input stopped early");
        }
        Err(e) => return Err(e),
    }
    Ok(sampler.into_rows())
}

/// Page sink that decodes records until it has enough, then refuses more
/// pages so the input stops.
struct SamplingOutput {
    reader: PageReader,
    limit: usize,
    rows: Vec<Vec<Value>>,
}

impl SamplingOutput {
    fn new(reader: PageReader, limit: usize) -> Self {
        Self {
            reader,
            limit,
            rows: Vec::new(),
        }
    }

    fn is_full(&self) -> bool {
        self.rows.len() >= self.limit
    }

    fn into_rows(mut self) -> Vec<Vec<Value>> {
        self.reader.release();
        std::mem::take(&mut self.rows)
    }
}

impl PageOutput for SamplingOutput {
    fn add(&mut self, page: Page) -> Result<(), StageError> {
        if self.is_full() {
            return Err(StageError::channel_closed("preview sample complete"));
        }
        self.reader.reset(page);
        while !self.is_full() && self.reader.next_record() {
            self.rows.push(self.reader.record());
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

/// Run the pending partitions of `resume` and apply the failure policy.
fn execute_partitions(
    executor: &LocalExecutor,
    plugins: &ResolvedPlugins,
    policy: FailurePolicy,
    mut resume: ResumeState,
    state: &mut ProcessState,
) -> Result<Vec<TaskReport>, StageError> {
    let outcomes = executor.execute(plugins, &mut resume);
    state.records += outcomes
        .iter()
        .filter(|o| o.is_success())
        .map(|o| o.records)
        .sum::<u64>();
    let failures: Vec<StageError> = outcomes.iter().filter_map(PartitionOutcome::failure).collect();
    let reports = resume.successful_output_reports();
    state.resume_state = Some(resume);

    let failed = failures.len();
    match policy {
        FailurePolicy::Abort => match attribute_failure(failures) {
            Some(cause) => Err(cause),
            None => Ok(reports),
        },
        FailurePolicy::AllowPartial => {
            for failure in &failures {
                warn!(
                    code = %failure.code,
                    category = %failure.category,
                    "Ignoring partition failure: {}",
                    failure.message
                );
            }
            if failed > 0 {
                warn!(failed, "Job completes with failed partitions");
            }
            state.ignored_errors.extend(failures);
            Ok(reports)
        }
    }
}

/// Turn the outcome of the outermost transaction into a result.
fn finish(
    config: &PipelineConfig,
    input_diff: Result<ConfigDiff, StageError>,
    state: ProcessState,
    started: Instant,
) -> Result<ExecutionResult, PipelineError> {
    let input_diff = match input_diff {
        Ok(diff) => diff,
        Err(cause) => {
            return Err(match state.resume_state {
                Some(resume_state) => PipelineError::Partial {
                    resume_state: Box::new(resume_state),
                    cause,
                    records: state.records,
                },
                None => PipelineError::Stage(cause),
            })
        }
    };

    let mut config_diff = ConfigDiff::new();
    config_diff
        .set_nested("in", input_diff)
        .set_nested("out", state.output_diff);
    let mut next_config = config.user_config().clone();
    next_config.merge_diff(&config_diff);

    let partition_count = state
        .resume_state
        .as_ref()
        .map_or(0, ResumeState::partition_count);
    let skipped = partition_count == 0;
    if skipped {
        info!(pipeline = config.pipeline, "Input reported no partitions, job skipped");
    }

    Ok(ExecutionResult {
        config_diff,
        next_config,
        skipped,
        ignored_errors: state.ignored_errors,
        resume_state: state.resume_state,
        partition_count,
        records: state.records,
        duration_secs: started.elapsed().as_secs_f64(),
        retry_count: 0,
        retried_errors: Vec::new(),
    })
}

/// Clean up after a finished job. The job's data is already committed,
/// so a failing cleanup is only logged.
fn complete(session: &ExecSession, plugins: &ResolvedPlugins, result: &ExecutionResult) {
    let Some(state) = &result.resume_state else {
        return;
    };
    if let Err(e) = cleanup(session, plugins, state) {
        warn!(code = %e.code, "Cleanup after completed job failed: {}", e.message);
    }
}

fn ensure_unchanged(stage: &str, frozen: &Schema, current: &Schema) -> Result<(), StageError> {
    if frozen == current {
        return Ok(());
    }
    Err(StageError::config(
        "SCHEMA_MISMATCH",
        format!("{stage} schema changed since the checkpoint: was {frozen:?}, now {current:?}"),
    ))
}
