use std::path::Path;

use anyhow::Result;

use super::{load_pipeline, loader};

/// Execute the `cleanup` command: abandon the stored partial run.
pub async fn execute(pipeline_path: &Path) -> Result<()> {
    let config = load_pipeline(pipeline_path)?;

    let Some(state) = bulkhaul_engine::load_resume_state(&config).await? else {
        println!("Pipeline '{}' has no resume state; nothing to clean up.", config.pipeline);
        return Ok(());
    };

    let pending = state.pending_partitions().len();
    loader(&config)?.cleanup(&config, state).await?;
    println!(
        "Pipeline '{}' cleaned up ({pending} pending partition(s) abandoned).",
        config.pipeline
    );
    Ok(())
}
