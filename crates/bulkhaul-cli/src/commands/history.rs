use std::path::Path;

use anyhow::Result;

use super::{load_pipeline, loader};

/// Execute the `history` command: list recent runs, newest first.
pub async fn execute(pipeline_path: &Path, limit: usize) -> Result<()> {
    let config = load_pipeline(pipeline_path)?;
    let runs = loader(&config)?.history(&config.pipeline, limit).await?;

    if runs.is_empty() {
        println!("No runs recorded for '{}'.", config.pipeline);
        return Ok(());
    }

    for run in runs {
        println!(
            "  #{:<5} {:<10} {}  partitions={} failed={} records={}",
            run.id,
            run.status.as_str(),
            run.started_at,
            run.stats.partitions,
            run.stats.partitions_failed,
            run.stats.records,
        );
        if let Some(message) = &run.stats.error_message {
            println!("         {message}");
        }
    }
    Ok(())
}
