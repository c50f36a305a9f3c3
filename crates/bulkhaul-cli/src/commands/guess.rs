use std::path::Path;

use anyhow::{Context, Result};
use bulkhaul_engine::BulkLoader;

use super::load_pipeline;

/// Execute the `guess` command: print the configuration the input and
/// output would add, as YAML.
pub async fn execute(pipeline_path: &Path) -> Result<()> {
    let config = load_pipeline(pipeline_path)?;
    let diff = BulkLoader::with_builtins().guess(&config).await?;

    if diff.get_nested("in").is_empty() && diff.get_nested("out").is_empty() {
        println!("Nothing to add.");
        return Ok(());
    }
    let yaml = serde_yaml::to_string(&diff).context("Failed to serialize guessed config")?;
    print!("{yaml}");
    Ok(())
}
