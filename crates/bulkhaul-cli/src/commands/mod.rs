pub mod cleanup;
pub mod guess;
pub mod history;
pub mod plugins;
pub mod preview;
pub mod run;

use std::path::Path;

use anyhow::{Context, Result};
use bulkhaul_engine::config::{parser, validator};
use bulkhaul_engine::resolve::create_state_backend;
use bulkhaul_engine::{BulkLoader, PipelineConfig};

/// Parse and validate a pipeline file.
pub(crate) fn load_pipeline(pipeline_path: &Path) -> Result<PipelineConfig> {
    let config = parser::parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;
    validator::validate_pipeline(&config)?;

    tracing::info!(
        pipeline = config.pipeline,
        input = config.input.type_name().unwrap_or_default(),
        output = config.output.type_name().unwrap_or_default(),
        filters = config.filters.len(),
        "Pipeline validated"
    );
    Ok(config)
}

/// Loader over the built-in plugins and the pipeline's state backend.
pub(crate) fn loader(config: &PipelineConfig) -> Result<BulkLoader> {
    let state = create_state_backend(config)?;
    Ok(BulkLoader::with_builtins().with_state_backend(state))
}
