use std::path::Path;

use anyhow::{Context, Result};
use bulkhaul_engine::{ExecutionOptions, ExecutionResult, PipelineError, PipelineOutcome};

use super::{load_pipeline, loader};

/// Execute the `run` command: parse, validate, and run (or resume) a pipeline.
pub async fn execute(pipeline_path: &Path, resume: bool, output: Option<&Path>) -> Result<()> {
    let config = load_pipeline(pipeline_path)?;
    let loader = loader(&config)?;

    let outcome = if resume {
        match bulkhaul_engine::load_resume_state(&config).await? {
            Some(state) => {
                tracing::info!(
                    pending = state.pending_partitions().len(),
                    partitions = state.partition_count(),
                    "Resuming from stored state"
                );
                loader.resume(&config, state).await
            }
            None => {
                tracing::warn!("No resume state stored; starting a fresh run");
                run_fresh(&loader, &config).await
            }
        }
    } else {
        run_fresh(&loader, &config).await
    };

    let result = match outcome {
        Ok(result) => result,
        Err(err @ PipelineError::Partial { .. }) => {
            eprintln!("Pipeline '{}' stopped: {err}", config.pipeline);
            eprintln!("  Continue with `bulkhaul run --resume`, or abandon with `bulkhaul cleanup`.");
            return Err(err.into());
        }
        Err(err) => return Err(err.into()),
    };

    print_summary(&config.pipeline, &result);

    if let Some(path) = output {
        let yaml = serde_yaml::to_string(&result.next_config)
            .context("Failed to serialize next configuration")?;
        std::fs::write(path, yaml)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("  Next config:     {}", path.display());
    }

    Ok(())
}

async fn run_fresh(
    loader: &bulkhaul_engine::BulkLoader,
    config: &bulkhaul_engine::PipelineConfig,
) -> Result<ExecutionResult, PipelineError> {
    match loader.run(config, &ExecutionOptions::default()).await? {
        PipelineOutcome::Run(result) => Ok(result),
        PipelineOutcome::Preview(_) => Err(PipelineError::Infrastructure(anyhow::anyhow!(
            "run returned a preview"
        ))),
    }
}

fn print_summary(pipeline: &str, result: &ExecutionResult) {
    if result.skipped {
        println!("Pipeline '{pipeline}' skipped: input has no partitions.");
        return;
    }
    if result.is_complete() {
        println!("Pipeline '{pipeline}' completed successfully.");
    } else {
        println!(
            "Pipeline '{pipeline}' completed with {} failed partition(s).",
            result.ignored_errors.len()
        );
    }
    println!("  Partitions:      {}", result.partition_count);
    println!("  Records:         {}", result.records);
    println!("  Duration:        {:.2}s", result.duration_secs);
    if result.duration_secs > 0.0 {
        println!(
            "  Throughput:      {:.0} rows/sec",
            result.records as f64 / result.duration_secs
        );
    }
    if result.retry_count > 0 {
        println!("  Retries:         {}", result.retry_count);
    }
    for err in &result.retried_errors {
        println!("  Retried after:   {err}");
    }
    for err in &result.ignored_errors {
        println!("  Ignored:         {err}");
    }
}
