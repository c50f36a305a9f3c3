use std::path::Path;

use anyhow::Result;
use arrow::util::pretty::pretty_format_batches;
use bulkhaul_engine::{BulkLoader, ExecutionOptions, PipelineOutcome};

use super::load_pipeline;

/// Execute the `preview` command: sample rows after every filter and print
/// them as a table. Nothing is written and no state is recorded.
pub async fn execute(pipeline_path: &Path, limit: Option<usize>) -> Result<()> {
    let config = load_pipeline(pipeline_path)?;
    let options = ExecutionOptions {
        preview: true,
        sample_rows: limit,
    };

    let PipelineOutcome::Preview(preview) = BulkLoader::with_builtins().run(&config, &options).await?
    else {
        anyhow::bail!("preview returned a run result");
    };

    println!("{}", pretty_format_batches(&[preview.batch])?);
    println!("{} row(s) sampled from '{}'", preview.rows.len(), config.pipeline);
    Ok(())
}
