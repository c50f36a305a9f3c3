//! Stages that ship with the engine.

mod inline;
mod null;
mod remove_columns;
mod rename;
mod stdout;

use std::sync::Arc;

use bulkhaul_types::task::TaskDataError;
use bulkhaul_types::StageError;

pub use inline::InlineInput;
pub use null::NullOutput;
pub use remove_columns::RemoveColumnsFilter;
pub use rename::RenameFilter;
pub use stdout::StdoutOutput;

use crate::plugin::{FilterPlugin, InputPlugin, OutputPlugin, PluginRegistry};

pub(crate) fn register(registry: &mut PluginRegistry) {
    registry
        .register_input("inline", || Arc::new(InlineInput) as Arc<dyn InputPlugin>)
        .register_output("null", || Arc::new(NullOutput) as Arc<dyn OutputPlugin>)
        .register_output("stdout", || Arc::new(StdoutOutput) as Arc<dyn OutputPlugin>)
        .register_filter("remove_columns", || {
            Arc::new(RemoveColumnsFilter) as Arc<dyn FilterPlugin>
        })
        .register_filter("rename", || Arc::new(RenameFilter) as Arc<dyn FilterPlugin>);
}

fn invalid_config(err: &TaskDataError) -> StageError {
    if err.key.is_empty() {
        StageError::config("INVALID_CONFIG", err.source.to_string())
    } else {
        StageError::config("INVALID_CONFIG", format!("'{}': {}", err.key, err.source))
    }
}

/// Report carrying a partition's record count.
fn records_report(records: u64) -> bulkhaul_types::TaskReport {
    let mut report = bulkhaul_types::TaskReport::new();
    report.set("records", records);
    report
}
