//! Semantic validation for parsed pipeline configuration values.

use anyhow::{bail, Result};

use crate::config::types::{PipelineConfig, StageConfig};

/// Smallest page that still leaves room for a few records.
const MIN_PAGE_SIZE: usize = 64;

fn validate_stage(stage: &StageConfig, context: &str, errors: &mut Vec<String>) {
    match stage.type_name() {
        None => errors.push(format!("{context}: 'type' must be set")),
        Some(name) if name.trim().is_empty() => {
            errors.push(format!("{context}: 'type' must not be empty"));
        }
        Some(_) => {
            if let Err(e) = stage.plugin_type() {
                errors.push(format!("{context}: {e}"));
            }
        }
    }
}

/// Validate a parsed pipeline configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the pipeline config.
pub fn validate_pipeline(config: &PipelineConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.pipeline.trim().is_empty() {
        errors.push("Pipeline name must not be empty".to_string());
    }

    validate_stage(&config.input, "in", &mut errors);
    for (i, filter) in config.filters.iter().enumerate() {
        validate_stage(filter, &format!("filters[{i}]"), &mut errors);
    }
    validate_stage(&config.output, "out", &mut errors);

    if config.exec.max_queued_pages == 0 {
        errors.push("max_queued_pages must be at least 1".to_string());
    }

    if config.exec.max_threads == Some(0) {
        errors.push("max_threads must be at least 1".to_string());
    }

    match config.exec.page_size_bytes() {
        Ok(size) if size < MIN_PAGE_SIZE => errors.push(format!(
            "page_size '{}' is below the minimum of {MIN_PAGE_SIZE} bytes",
            config.exec.page_size
        )),
        Ok(_) => {}
        Err(e) => errors.push(format!("Invalid page_size: {e}")),
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Pipeline validation failed:\n  - {}", errors.join("\n  - "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_pipeline_str;

    fn valid_yaml() -> &'static str {
        r#"
pipeline: test_pipeline
in:
  type: inline
  columns:
    - { name: id, type: long }
  rows: [[1]]
filters:
  - type: rename
    columns: { id: user_id }
out:
  type: "null"
"#
    }

    #[test]
    fn test_valid_pipeline_passes() {
        let config = parse_pipeline_str(valid_yaml()).unwrap();
        assert!(validate_pipeline(&config).is_ok());
    }

    #[test]
    fn test_empty_pipeline_name_fails() {
        let yaml = valid_yaml().replace("test_pipeline", "\"\"");
        let config = parse_pipeline_str(&yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("Pipeline name must not be empty"));
    }

    #[test]
    fn test_missing_filter_type_fails() {
        let yaml = valid_yaml().replace("type: rename", "kind: rename");
        let config = parse_pipeline_str(&yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("filters[0]: 'type' must be set"));
    }

    #[test]
    fn test_bad_plugin_reference_fails() {
        let yaml = valid_yaml().replace("type: inline", "type: \"inline@\"");
        let config = parse_pipeline_str(&yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("in:"));
    }

    #[test]
    fn test_exec_limits_fail() {
        let yaml = format!(
            "{}exec:\n  max_queued_pages: 0\n  max_threads: 0\n  page_size: 16b\n",
            valid_yaml()
        );
        let config = parse_pipeline_str(&yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("max_queued_pages must be at least 1"));
        assert!(err.contains("max_threads must be at least 1"));
        assert!(err.contains("below the minimum"));
    }

    #[test]
    fn test_invalid_page_size_fails() {
        let yaml = format!("{}exec:\n  page_size: lots\n", valid_yaml());
        let config = parse_pipeline_str(&yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("Invalid page_size"));
    }

    #[test]
    fn test_all_errors_reported_together() {
        let yaml = valid_yaml()
            .replace("test_pipeline", "\"\"")
            .replace("type: \"null\"", "kind: x");
        let config = parse_pipeline_str(&yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("Pipeline name"));
        assert!(err.contains("out: 'type' must be set"));
    }
}
