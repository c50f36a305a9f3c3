//! Pipeline orchestrator: validates, resolves plugins, drives job
//! transactions with retry, and records outcomes in the state backend.

use std::sync::Arc;
use std::time::Instant;

use bulkhaul_state::{StateBackend, StateError};
use bulkhaul_types::state::{PipelineId, RunRecord, RunStats, RunStatus};
use bulkhaul_types::{ConfigDiff, ResumeState, StageError};
use tokio::runtime::Handle;

use crate::config::validator::validate_pipeline;
use crate::config::PipelineConfig;
use crate::errors::{compute_backoff, PipelineError};
use crate::execution::{ExecutionOptions, PipelineOutcome, PreviewResult};
use crate::plugin::PluginRegistry;
use crate::resolve::{create_state_backend, resolve_plugins, ResolvedPlugins};
use crate::result::ExecutionResult;
use crate::runner;
use crate::session::ExecSession;

/// Entry point for running, resuming, cleaning up and previewing jobs.
///
/// Without a state backend nothing is persisted; callers keep the resume
/// state from a [`PipelineError::Partial`] themselves.
#[derive(Clone)]
pub struct BulkLoader {
    registry: Arc<PluginRegistry>,
    state: Option<Arc<dyn StateBackend>>,
}

impl std::fmt::Debug for BulkLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkLoader")
            .field("registry", &self.registry)
            .field("state", &self.state.is_some())
            .finish()
    }
}

impl BulkLoader {
    #[must_use]
    pub fn new(registry: PluginRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            state: None,
        }
    }

    /// Loader over the built-in plugins.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::new(PluginRegistry::with_builtins())
    }

    #[must_use]
    pub fn with_state_backend(mut self, backend: Arc<dyn StateBackend>) -> Self {
        self.state = Some(backend);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Run a job, or sample it when `options.preview` is set.
    ///
    /// # Errors
    ///
    /// Returns a `PipelineError` if the pipeline is invalid, or the job fails
    /// after exhausting retries.
    pub async fn run(
        &self,
        config: &PipelineConfig,
        options: &ExecutionOptions,
    ) -> Result<PipelineOutcome, PipelineError> {
        validate(config)?;
        if options.preview {
            return self
                .preview(config, options.sample_limit())
                .await
                .map(PipelineOutcome::Preview);
        }
        self.drive(config, None).await.map(PipelineOutcome::Run)
    }

    /// Continue a job from a resume state. Only pending partitions run.
    ///
    /// # Errors
    ///
    /// As [`run`](Self::run).
    pub async fn resume(
        &self,
        config: &PipelineConfig,
        resume_state: ResumeState,
    ) -> Result<ExecutionResult, PipelineError> {
        validate(config)?;
        self.drive(config, Some(resume_state)).await
    }

    /// Give up on a job: let every stage release what it kept for it and
    /// forget the stored resume state.
    ///
    /// # Errors
    ///
    /// Returns the first stage cleanup failure, or a state backend error.
    pub async fn cleanup(
        &self,
        config: &PipelineConfig,
        resume_state: ResumeState,
    ) -> Result<(), PipelineError> {
        validate(config)?;
        let session = self.session(config, Some(&resume_state))?;
        let plugins = resolve_plugins(&self.registry, config)?;
        tracing::info!(
            pipeline = config.pipeline,
            partitions = resume_state.partition_count(),
            pending = resume_state.pending_partitions().len(),
            "Cleaning up job"
        );
        blocking("cleanup", move || {
            runner::cleanup(&session, &plugins, &resume_state).map_err(PipelineError::Stage)
        })
        .await?;

        if let Some(backend) = &self.state {
            let pipeline = PipelineId::new(config.pipeline.clone());
            let cleared = state_call(Arc::clone(backend), move |b| b.clear_resume_state(&pipeline)).await?;
            tracing::debug!(cleared, "Resume state cleared");
        }
        Ok(())
    }

    /// Sample up to `sample_rows` records after every filter.
    ///
    /// # Errors
    ///
    /// Returns a `PipelineError` on any stage failure.
    pub async fn preview(
        &self,
        config: &PipelineConfig,
        sample_rows: usize,
    ) -> Result<PreviewResult, PipelineError> {
        validate(config)?;
        tracing::info!(pipeline = config.pipeline, sample_rows, "Starting preview");
        let session = self.session(config, None)?.with_preview(true);
        let plugins = resolve_plugins(&self.registry, config)?;
        let config = config.clone();
        blocking("preview", move || {
            runner::preview(&session, &plugins, &config, sample_rows).map_err(PipelineError::Stage)
        })
        .await
    }

    /// Ask the input and output for configuration to add, keyed `in` and
    /// `out`.
    ///
    /// # Errors
    ///
    /// Returns a `PipelineError` if a plugin is unknown or its guess fails.
    pub async fn guess(&self, config: &PipelineConfig) -> Result<ConfigDiff, PipelineError> {
        let session = self.session(config, None)?;
        let plugins = resolve_plugins(&self.registry, config)?;
        let config = config.clone();
        blocking("guess", move || {
            let input = plugins.input.guess(&session, config.input.source())?;
            let output = plugins.output.guess(&session, config.output.source())?;
            let mut diff = ConfigDiff::new();
            diff.set_nested("in", input).set_nested("out", output);
            Ok(diff)
        })
        .await
    }

    /// Recent runs of a pipeline, newest first. Empty without a backend.
    ///
    /// # Errors
    ///
    /// Returns a state backend error.
    pub async fn history(
        &self,
        pipeline: &str,
        limit: usize,
    ) -> Result<Vec<RunRecord>, PipelineError> {
        let Some(backend) = &self.state else {
            return Ok(Vec::new());
        };
        let pipeline = PipelineId::new(pipeline);
        state_call(Arc::clone(backend), move |b| b.list_runs(&pipeline, limit)).await
    }

    /// Retry loop around one job. A retryable partial failure resumes from
    /// the carried state, so finished partitions never run twice.
    async fn drive(
        &self,
        config: &PipelineConfig,
        initial: Option<ResumeState>,
    ) -> Result<ExecutionResult, PipelineError> {
        let pipeline = PipelineId::new(config.pipeline.clone());
        let run_id = match &self.state {
            Some(backend) => {
                let pipeline = pipeline.clone();
                Some(state_call(Arc::clone(backend), move |b| b.start_run(&pipeline)).await?)
            }
            None => None,
        };

        let started = Instant::now();
        let max_retries = config.exec.max_retries;
        let mut attempt = 0u32;
        let mut resume_state = initial;
        // Totals of the attempts that were retried.
        let mut earlier_records = 0u64;
        let mut retried_errors = Vec::new();
        let outcome = loop {
            attempt += 1;
            match self.execute_once(config, resume_state.take(), attempt).await {
                Ok(mut result) => {
                    result.retry_count = attempt - 1;
                    result.records += earlier_records;
                    result.duration_secs = started.elapsed().as_secs_f64();
                    result.retried_errors = retried_errors;
                    break Ok(result);
                }
                Err(PipelineError::Partial {
                    resume_state: carried,
                    cause,
                    records,
                }) if cause.retryable && attempt <= max_retries => {
                    let delay = compute_backoff(&cause, attempt);
                    #[allow(clippy::cast_possible_truncation)]
                    // Safety: delay.as_millis() is always well under u64::MAX
                    let delay_ms = delay.as_millis() as u64;
                    tracing::warn!(
                        attempt,
                        max_retries,
                        delay_ms,
                        category = %cause.category,
                        code = %cause.code,
                        pending = carried.pending_partitions().len(),
                        "Retryable partition failure, will resume"
                    );
                    earlier_records += records;
                    retried_errors.push(cause);
                    tokio::time::sleep(delay).await;
                    resume_state = Some(*carried);
                }
                Err(mut err) => {
                    if let PipelineError::Partial { records, .. } = &mut err {
                        *records += earlier_records;
                    }
                    match &err {
                        PipelineError::Partial { cause, .. } if cause.retryable => {
                            tracing::error!(
                                attempt,
                                max_retries,
                                category = %cause.category,
                                code = %cause.code,
                                "Max retries exhausted, failing pipeline"
                            );
                        }
                        PipelineError::Partial { cause, .. } | PipelineError::Stage(cause) => {
                            tracing::error!(
                                category = %cause.category,
                                code = %cause.code,
                                "Non-retryable stage error, failing pipeline: {}",
                                cause.message
                            );
                        }
                        PipelineError::Infrastructure(e) => {
                            tracing::error!("Infrastructure error, failing pipeline: {e:#}");
                        }
                    }
                    break Err(err);
                }
            }
        };

        if let Some(run_id) = run_id {
            self.record_outcome(&pipeline, run_id, &outcome).await?;
        }
        outcome
    }

    async fn execute_once(
        &self,
        config: &PipelineConfig,
        resume_state: Option<ResumeState>,
        attempt: u32,
    ) -> Result<ExecutionResult, PipelineError> {
        tracing::info!(
            pipeline = config.pipeline,
            attempt,
            resume = resume_state.is_some(),
            "Starting pipeline run"
        );
        let session = Arc::new(self.session(config, resume_state.as_ref())?);
        let plugins: ResolvedPlugins = resolve_plugins(&self.registry, config)?;
        let config = config.clone();

        let result = blocking("transaction", move || match resume_state {
            Some(state) => runner::resume(&session, &plugins, &config, state),
            None => runner::run(&session, &plugins, &config),
        })
        .await?;

        tracing::info!(
            partitions = result.partition_count,
            records = result.records,
            ignored_errors = result.ignored_errors.len(),
            skipped = result.skipped,
            duration_secs = result.duration_secs,
            "Pipeline run completed"
        );
        Ok(result)
    }

    fn session(
        &self,
        config: &PipelineConfig,
        resume_state: Option<&ResumeState>,
    ) -> Result<ExecSession, PipelineError> {
        let pipeline = PipelineId::new(config.pipeline.clone());
        let registry = Arc::clone(&self.registry);
        let session = match resume_state {
            Some(state) => ExecSession::from_exec_task(
                pipeline,
                registry,
                config.exec.clone(),
                Handle::current(),
                &state.exec_task,
            )?,
            None => ExecSession::new(pipeline, registry, config.exec.clone(), Handle::current())?,
        };
        Ok(session)
    }

    async fn record_outcome(
        &self,
        pipeline: &PipelineId,
        run_id: i64,
        outcome: &Result<ExecutionResult, PipelineError>,
    ) -> Result<(), PipelineError> {
        let Some(backend) = &self.state else {
            return Ok(());
        };
        let backend = Arc::clone(backend);
        let pipeline = pipeline.clone();

        match outcome {
            Ok(result) => {
                let next_config = result.next_config.clone().into_json();
                let stats = RunStats {
                    partitions: result.partition_count as u64,
                    partitions_failed: result.ignored_errors.len() as u64,
                    records: result.records,
                    error_message: None,
                };
                state_call(backend, move |b| {
                    b.save_next_config(&pipeline, &next_config)?;
                    b.clear_resume_state(&pipeline)?;
                    b.complete_run(run_id, RunStatus::Completed, &stats)
                })
                .await
            }
            Err(PipelineError::Partial {
                resume_state,
                cause,
                records,
            }) => {
                let resume_state = (**resume_state).clone();
                let stats = RunStats {
                    partitions: resume_state.partition_count() as u64,
                    partitions_failed: resume_state.pending_partitions().len() as u64,
                    records: *records,
                    error_message: Some(cause.to_string()),
                };
                state_call(backend, move |b| {
                    b.save_resume_state(&pipeline, &resume_state)?;
                    b.complete_run(run_id, RunStatus::Partial, &stats)
                })
                .await
            }
            Err(err) => {
                let stats = RunStats {
                    error_message: Some(err.to_string()),
                    ..RunStats::default()
                };
                state_call(backend, move |b| b.complete_run(run_id, RunStatus::Failed, &stats)).await
            }
        }
    }
}

fn validate(config: &PipelineConfig) -> Result<(), PipelineError> {
    validate_pipeline(config)
        .map_err(|e| PipelineError::Stage(StageError::config("INVALID_PIPELINE", format!("{e:#}"))))
}

/// Run blocking job code off the async runtime.
async fn blocking<T, F>(what: &'static str, f: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        PipelineError::Infrastructure(anyhow::anyhow!("{what} task panicked: {e}"))
    })?
}

async fn state_call<T, F>(backend: Arc<dyn StateBackend>, f: F) -> Result<T, PipelineError>
where
    F: FnOnce(&dyn StateBackend) -> Result<T, StateError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(backend.as_ref()))
        .await
        .map_err(|e| {
            PipelineError::Infrastructure(anyhow::anyhow!("State backend task panicked: {e}"))
        })?
        .map_err(|e| PipelineError::Infrastructure(e.into()))
}

fn loader_for(config: &PipelineConfig) -> Result<BulkLoader, PipelineError> {
    let state = create_state_backend(config).map_err(PipelineError::Infrastructure)?;
    Ok(BulkLoader::with_builtins().with_state_backend(state))
}

/// Run a pipeline with the built-in plugins and its configured state
/// backend.
///
/// # Errors
///
/// Returns a `PipelineError` if the pipeline fails after exhausting retries
/// or encounters a non-retryable error.
pub async fn run_pipeline(
    config: &PipelineConfig,
    options: &ExecutionOptions,
) -> Result<PipelineOutcome, PipelineError> {
    loader_for(config)?.run(config, options).await
}

/// Resume a pipeline from an explicit resume state.
///
/// # Errors
///
/// As [`run_pipeline`].
pub async fn resume_pipeline(
    config: &PipelineConfig,
    resume_state: ResumeState,
) -> Result<ExecutionResult, PipelineError> {
    loader_for(config)?.resume(config, resume_state).await
}

/// Abandon a partially completed pipeline.
///
/// # Errors
///
/// Returns the first cleanup failure or a state backend error.
pub async fn cleanup_pipeline(
    config: &PipelineConfig,
    resume_state: ResumeState,
) -> Result<(), PipelineError> {
    loader_for(config)?.cleanup(config, resume_state).await
}

/// Stored resume state of a pipeline, if a previous run left one.
///
/// # Errors
///
/// Returns a state backend error.
pub async fn load_resume_state(config: &PipelineConfig) -> Result<Option<ResumeState>, PipelineError> {
    let backend = create_state_backend(config).map_err(PipelineError::Infrastructure)?;
    let pipeline = PipelineId::new(config.pipeline.clone());
    state_call(backend, move |b| b.load_resume_state(&pipeline)).await
}
