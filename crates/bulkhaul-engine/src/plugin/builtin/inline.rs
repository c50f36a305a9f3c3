//! Source reading rows straight from its configuration.

use bulkhaul_page::PageOutput;
use bulkhaul_types::{
    ConfigDiff, ConfigSource, Schema, StageError, TaskReport, TaskSource, Type, Value,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use super::{invalid_config, records_report};
use crate::plugin::{InputControl, InputPlugin};
use crate::session::ExecSession;

fn default_partitions() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ColumnConfig {
    name: String,
    #[serde(rename = "type")]
    ty: Type,
}

#[derive(Debug, Deserialize)]
struct InlineConfig {
    #[serde(default)]
    columns: Vec<ColumnConfig>,
    #[serde(default)]
    rows: Vec<Json>,
    #[serde(default = "default_partitions")]
    partitions: usize,
}

/// Frozen task: rows normalized to positional arrays.
#[derive(Debug, Serialize, Deserialize)]
struct InlineTask {
    rows: Vec<Vec<Json>>,
    partitions: usize,
}

/// `type: inline`: rows and columns given in the config, split into
/// `partitions` contiguous chunks.
///
/// Rows are arrays in column order or objects keyed by column name.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineInput;

fn schema_of(columns: &[ColumnConfig]) -> Schema {
    columns
        .iter()
        .fold(Schema::builder(), |b, c| b.add(c.name.clone(), c.ty))
        .build()
}

fn normalize_row(schema: &Schema, index: usize, row: Json) -> Result<Vec<Json>, StageError> {
    let values = match row {
        Json::Array(values) => values,
        Json::Object(mut fields) => schema
            .columns()
            .iter()
            .map(|c| fields.remove(c.name()).unwrap_or(Json::Null))
            .collect(),
        other => {
            return Err(StageError::config(
                "INVALID_ROW",
                format!("row {index} must be an array or object, got {other}"),
            ))
        }
    };
    if values.len() != schema.column_count() {
        return Err(StageError::config(
            "INVALID_ROW",
            format!(
                "row {index} has {} values, expected {}",
                values.len(),
                schema.column_count()
            ),
        ));
    }
    Ok(values)
}

fn rows_diff(reports: &[TaskReport]) -> ConfigDiff {
    let emitted: u64 = reports
        .iter()
        .filter_map(|r| r.get::<u64>("records").ok().flatten())
        .sum();
    let mut diff = ConfigDiff::new();
    diff.set("rows_emitted", emitted);
    diff
}

/// Half-open row range of `partition` when `total` rows are split evenly.
fn chunk(total: usize, partitions: usize, partition: usize) -> (usize, usize) {
    (
        partition * total / partitions,
        (partition + 1) * total / partitions,
    )
}

fn infer_type(value: &Json) -> Type {
    match value {
        Json::Bool(_) => Type::Boolean,
        Json::Number(n) if n.is_i64() || n.is_u64() => Type::Long,
        Json::Number(_) => Type::Double,
        Json::String(s) if chrono::DateTime::parse_from_rfc3339(s).is_ok() => Type::Timestamp,
        Json::Null | Json::String(_) => Type::String,
        Json::Array(_) | Json::Object(_) => Type::Json,
    }
}

impl InputPlugin for InlineInput {
    fn transaction(
        &self,
        _session: &ExecSession,
        config: &ConfigSource,
        control: &mut dyn InputControl,
    ) -> Result<ConfigDiff, StageError> {
        let parsed: InlineConfig = config.load_config().map_err(|e| invalid_config(&e))?;
        if parsed.columns.is_empty() && !parsed.rows.is_empty() {
            return Err(StageError::config(
                "MISSING_COLUMNS",
                "inline input needs 'columns' (run guess to infer them)",
            ));
        }
        let schema = schema_of(&parsed.columns);
        let rows = parsed
            .rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| normalize_row(&schema, i, row))
            .collect::<Result<Vec<_>, _>>()?;

        let task = TaskSource::from_serializable(&InlineTask {
            rows,
            partitions: parsed.partitions,
        })
        .map_err(|e| invalid_config(&e))?;
        let reports = control.run(task, schema, parsed.partitions)?;
        Ok(rows_diff(&reports))
    }

    fn resume(
        &self,
        _session: &ExecSession,
        task: &TaskSource,
        schema: &Schema,
        partition_count: usize,
        control: &mut dyn InputControl,
    ) -> Result<ConfigDiff, StageError> {
        let reports = control.run(task.clone(), schema.clone(), partition_count)?;
        Ok(rows_diff(&reports))
    }

    fn cleanup(
        &self,
        _session: &ExecSession,
        _task: &TaskSource,
        _schema: &Schema,
        _partition_count: usize,
        _successful_reports: &[TaskReport],
    ) -> Result<(), StageError> {
        Ok(())
    }

    fn run(
        &self,
        session: &ExecSession,
        task: &TaskSource,
        schema: &Schema,
        partition: usize,
        output: &mut dyn PageOutput,
    ) -> Result<TaskReport, StageError> {
        let task: InlineTask = task.load_config().map_err(|e| invalid_config(&e))?;
        let (start, end) = chunk(task.rows.len(), task.partitions.max(1), partition);

        let mut builder = session.page_builder(schema, output);
        for (offset, row) in task.rows[start..end].iter().enumerate() {
            let values = row
                .iter()
                .zip(schema.columns())
                .map(|(json, column)| {
                    Value::from_json(json, column.column_type()).map_err(|message| {
                        StageError::data(
                            "INVALID_VALUE",
                            format!("row {}: column '{}': {message}", start + offset, column.name()),
                        )
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            builder.add_values(&values)?;
        }
        builder.finish()?;

        tracing::debug!(partition, records = builder.record_count(), "Inline partition emitted");
        Ok(records_report(builder.record_count()))
    }

    fn guess(
        &self,
        _session: &ExecSession,
        config: &ConfigSource,
    ) -> Result<ConfigDiff, StageError> {
        let parsed: InlineConfig = config.load_config().map_err(|e| invalid_config(&e))?;
        let mut diff = ConfigDiff::new();
        if !parsed.columns.is_empty() {
            return Ok(diff);
        }
        let Some(Json::Object(sample)) = parsed.rows.first() else {
            return Ok(diff);
        };
        let columns: Vec<ColumnConfig> = sample
            .iter()
            .map(|(name, value)| ColumnConfig {
                name: name.clone(),
                ty: infer_type(value),
            })
            .collect();
        diff.set("columns", columns);
        Ok(diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_cover_all_rows_once() {
        let total = 10;
        let parts = 3;
        let mut covered = Vec::new();
        for p in 0..parts {
            let (s, e) = chunk(total, parts, p);
            covered.extend(s..e);
        }
        assert_eq!(covered, (0..total).collect::<Vec<_>>());
        assert_eq!(chunk(2, 4, 0), (0, 0));
    }

    #[test]
    fn test_normalize_object_row_by_column_name() {
        let schema = Schema::builder()
            .add("a", Type::Long)
            .add("b", Type::String)
            .build();
        let row = normalize_row(&schema, 0, serde_json::json!({"b": "x"})).unwrap();
        assert_eq!(row, vec![Json::Null, serde_json::json!("x")]);
        assert!(normalize_row(&schema, 1, serde_json::json!([1])).is_err());
        assert!(normalize_row(&schema, 2, serde_json::json!(5)).is_err());
    }

    #[test]
    fn test_infer_types() {
        assert_eq!(infer_type(&serde_json::json!(true)), Type::Boolean);
        assert_eq!(infer_type(&serde_json::json!(3)), Type::Long);
        assert_eq!(infer_type(&serde_json::json!(1.5)), Type::Double);
        assert_eq!(infer_type(&serde_json::json!("2024-01-01T00:00:00Z")), Type::Timestamp);
        assert_eq!(infer_type(&serde_json::json!("x")), Type::String);
        assert_eq!(infer_type(&serde_json::json!({"k": 1})), Type::Json);
    }

    #[test]
    fn test_rows_diff_sums_records() {
        let reports = vec![records_report(2), records_report(5)];
        assert_eq!(
            rows_diff(&reports).into_json(),
            serde_json::json!({"rows_emitted": 7})
        );
    }
}
