//! Pipeline YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::types::PipelineConfig;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();
    let result = ENV_VAR_RE.replace_all(input, |cap: &regex::Captures<'_>| {
        std::env::var(&cap[1]).unwrap_or_else(|_| {
            missing.push(cap[1].to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        missing.dedup();
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }

    Ok(result.into_owned())
}

/// Parse a pipeline YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if env var substitution fails or the YAML is invalid.
pub fn parse_pipeline_str(yaml_str: &str) -> Result<PipelineConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    let document: serde_json::Value =
        serde_yaml::from_str(&substituted).context("Failed to parse pipeline YAML")?;
    PipelineConfig::from_json(document)
}

/// Parse a pipeline YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_pipeline(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;
    parse_pipeline_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::FailurePolicy;

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("BH_TEST_ROWS_PATH", "/data/rows.json");
        let input = "path: ${BH_TEST_ROWS_PATH}\nlimit: 5";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "path: /data/rows.json\nlimit: 5");
        std::env::remove_var("BH_TEST_ROWS_PATH");
    }

    #[test]
    fn test_multiple_env_vars() {
        std::env::set_var("BH_TEST_A", "alpha");
        std::env::set_var("BH_TEST_B", "beta");
        let result = substitute_env_vars("${BH_TEST_A} and ${BH_TEST_B}").unwrap();
        assert_eq!(result, "alpha and beta");
        std::env::remove_var("BH_TEST_A");
        std::env::remove_var("BH_TEST_B");
    }

    #[test]
    fn test_no_env_vars_passthrough() {
        let input = "pipeline: demo\nout: { type: null }";
        assert_eq!(substitute_env_vars(input).unwrap(), input);
    }

    #[test]
    fn test_multiple_missing_env_vars_all_reported() {
        let err = substitute_env_vars("${BH_MISSING_X} and ${BH_MISSING_Y}")
            .unwrap_err()
            .to_string();
        assert!(err.contains("BH_MISSING_X"));
        assert!(err.contains("BH_MISSING_Y"));
    }

    #[test]
    fn test_parse_pipeline_from_string() {
        std::env::set_var("BH_TEST_PARTITIONS", "3");
        let yaml = r#"
pipeline: demo
exec:
  max_threads: 4
  page_size: 64kb
  failure_policy: allow_partial
in:
  type: inline
  partitions: ${BH_TEST_PARTITIONS}
  columns:
    - { name: id, type: long }
  rows: [[1], [2]]
filters:
  - type: rename
    columns: { id: user_id }
out:
  type: stdout
state:
  backend: memory
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        assert_eq!(config.pipeline, "demo");
        assert_eq!(config.exec.max_threads, Some(4));
        assert_eq!(config.exec.page_size_bytes().unwrap(), 64 * 1024);
        assert_eq!(config.exec.failure_policy, FailurePolicy::AllowPartial);
        assert_eq!(config.exec.max_queued_pages, 16);
        assert_eq!(
            config.input.source().get::<u64>("partitions").unwrap(),
            Some(3)
        );
        assert_eq!(config.filters.len(), 1);
        assert_eq!(config.output.type_name(), Some("stdout"));
        std::env::remove_var("BH_TEST_PARTITIONS");
    }

    #[test]
    fn test_parse_rejects_missing_sections() {
        let err = parse_pipeline_str("pipeline: x\nin: { type: inline }\n").unwrap_err();
        assert!(format!("{err:#}").contains("out"));
    }

    #[test]
    fn test_parse_pipeline_missing_file() {
        let err = parse_pipeline(Path::new("/nonexistent/pipeline.yml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read pipeline file"));
    }
}
