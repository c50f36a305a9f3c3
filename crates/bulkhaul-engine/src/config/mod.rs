//! Pipeline configuration: YAML parsing, typed model and semantic validation.

pub mod parser;
pub mod types;
pub mod validator;

pub use types::{ExecConfig, FailurePolicy, PipelineConfig, StageConfig, StateBackendKind, StateConfig};
