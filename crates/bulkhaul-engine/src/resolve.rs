//! Plugin and state backend resolution for a pipeline config.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bulkhaul_state::{SqliteStateBackend, StateBackend};
use bulkhaul_types::StageError;

use crate::config::{PipelineConfig, StateBackendKind};
use crate::plugin::{FilterPlugin, InputPlugin, OutputPlugin, PluginRegistry};

/// The stage instances one job runs with.
#[derive(Clone)]
pub struct ResolvedPlugins {
    pub input: Arc<dyn InputPlugin>,
    pub filters: Vec<Arc<dyn FilterPlugin>>,
    pub output: Arc<dyn OutputPlugin>,
}

impl std::fmt::Debug for ResolvedPlugins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedPlugins")
            .field("filters", &self.filters.len())
            .finish_non_exhaustive()
    }
}

/// Look up every stage named by `config`.
///
/// # Errors
///
/// Returns a config error for the first unknown or malformed plugin type.
pub fn resolve_plugins(
    registry: &PluginRegistry,
    config: &PipelineConfig,
) -> Result<ResolvedPlugins, StageError> {
    let input = registry.resolve_input(&config.input)?;
    let filters = config
        .filters
        .iter()
        .map(|filter| registry.resolve_filter(filter))
        .collect::<Result<Vec<_>, _>>()?;
    let output = registry.resolve_output(&config.output)?;
    Ok(ResolvedPlugins {
        input,
        filters,
        output,
    })
}

/// Default state database: `$HOME/.bulkhaul/state.db`.
fn default_state_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".bulkhaul").join("state.db")
}

/// Expand a leading `~/` against `$HOME`.
fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

/// Open the state backend selected by `config.state`.
///
/// # Errors
///
/// Returns an error if the database cannot be opened.
pub fn create_state_backend(config: &PipelineConfig) -> Result<Arc<dyn StateBackend>> {
    match config.state.backend {
        StateBackendKind::Sqlite => {
            let backend = if let Some(path) = &config.state.connection {
                SqliteStateBackend::open(&expand_home(path))
                    .context("Failed to open state DB")?
            } else {
                SqliteStateBackend::open(&default_state_path())
                    .context("Failed to open default state DB")?
            };
            Ok(Arc::new(backend) as Arc<dyn StateBackend>)
        }
        StateBackendKind::Memory => {
            let backend =
                SqliteStateBackend::in_memory().context("Failed to open in-memory state DB")?;
            Ok(Arc::new(backend) as Arc<dyn StateBackend>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_pipeline_str;
    use bulkhaul_types::state::PipelineId;

    fn config(extra: &str) -> PipelineConfig {
        parse_pipeline_str(&format!(
            "pipeline: p\nin: {{ type: inline }}\nfilters:\n  - {{ type: rename }}\nout: {{ type: stdout }}\n{extra}"
        ))
        .unwrap()
    }

    #[test]
    fn test_resolve_builtin_plugins() {
        let resolved = resolve_plugins(&PluginRegistry::with_builtins(), &config("")).unwrap();
        assert_eq!(resolved.filters.len(), 1);
    }

    #[test]
    fn test_resolve_unknown_filter_fails() {
        let mut cfg = config("");
        cfg.filters.push(crate::config::StageConfig::new(
            bulkhaul_types::ConfigSource::from_json(serde_json::json!({"type": "ghost"})),
        ));
        let err = resolve_plugins(&PluginRegistry::with_builtins(), &cfg).unwrap_err();
        assert_eq!(err.code, "UNKNOWN_PLUGIN");
    }

    #[test]
    fn test_memory_backend() {
        let backend = create_state_backend(&config("state:\n  backend: memory\n")).unwrap();
        let id = backend.start_run(&PipelineId::new("p")).unwrap();
        assert!(id > 0);
    }

    #[test]
    fn test_sqlite_backend_at_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        let cfg = config(&format!(
            "state:\n  backend: sqlite\n  connection: {}\n",
            path.display()
        ));
        create_state_backend(&cfg).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_expand_home() {
        if let Ok(home) = std::env::var("HOME") {
            assert_eq!(expand_home("~/x.db"), PathBuf::from(home).join("x.db"));
        }
        assert_eq!(expand_home("/abs/x.db"), PathBuf::from("/abs/x.db"));
    }
}
