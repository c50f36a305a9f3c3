//! Transactional bulk-load orchestration for bulkhaul pipelines.
//!
//! A job moves records from one input through a chain of filters into one
//! output. Stages negotiate schemas and partitioning through nested
//! transactions; partitions then run concurrently, each over its own page
//! channel. Completed partitions are checkpointed in a
//! [`ResumeState`](bulkhaul_types::ResumeState) so a failed job continues
//! where it stopped.

pub mod arrow;
pub mod config;
pub mod errors;
pub mod execution;
pub mod executor;
pub mod file_runner;
pub mod filters;
pub mod orchestrator;
pub mod plugin;
pub mod resolve;
pub mod result;
pub mod runner;
pub mod session;

// Re-export public API for convenience
pub use config::PipelineConfig;
pub use errors::{attribute_failure, PipelineError};
pub use execution::{ExecutionOptions, PipelineOutcome, PreviewResult};
pub use orchestrator::{
    cleanup_pipeline, load_resume_state, resume_pipeline, run_pipeline, BulkLoader,
};
pub use plugin::{PluginCategory, PluginRegistry, PluginType};
pub use result::ExecutionResult;
pub use session::ExecSession;
