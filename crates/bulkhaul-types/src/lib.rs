//! Shared bulkhaul data model types.
//!
//! This crate holds everything that crosses a stage boundary: column types and
//! schemas, dynamically typed cell values, the JSON-object task data exchanged
//! by the transaction protocol, resume checkpoints, and the stage error model.

pub mod column;
pub mod error;
pub mod resume;
pub mod schema;
pub mod state;
pub mod task;
pub mod value;

pub use column::{Column, Type};
pub use error::{ErrorCategory, StageError};
pub use resume::ResumeState;
pub use schema::{Schema, SchemaBuilder};
pub use task::{ConfigDiff, ConfigSource, TaskReport, TaskSource};
pub use value::Value;
