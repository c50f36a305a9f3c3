//! Job state persistence for bulkhaul.
//!
//! Provides the [`StateBackend`] trait and a [`SqliteStateBackend`]
//! implementation storing resume checkpoints, the next configuration
//! produced by each successful run, and run history.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod sqlite;

pub use backend::StateBackend;
pub use error::StateError;
pub use sqlite::SqliteStateBackend;

/// Common imports for state backend users.
pub mod prelude {
    pub use crate::backend::StateBackend;
    pub use crate::error::StateError;
    pub use crate::sqlite::SqliteStateBackend;
    pub use bulkhaul_types::state::{PipelineId, RunRecord, RunStats, RunStatus};
    pub use bulkhaul_types::ResumeState;
}
