//! Conversion of sampled rows into Arrow record batches.

use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema as ArrowSchema, TimeUnit};
use arrow::error::ArrowError;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use bulkhaul_types::{Schema, Type, Value};

const UTC: &str = "UTC";

/// Arrow type a column is rendered as. JSON columns become their text.
#[must_use]
pub fn arrow_type(ty: Type) -> DataType {
    match ty {
        Type::Boolean => DataType::Boolean,
        Type::Long => DataType::Int64,
        Type::Double => DataType::Float64,
        Type::String | Type::Json => DataType::Utf8,
        Type::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, Some(UTC.into())),
    }
}

/// Arrow schema mirroring `schema`; every field is nullable.
#[must_use]
pub fn arrow_schema(schema: &Schema) -> ArrowSchema {
    ArrowSchema::new(
        schema
            .columns()
            .iter()
            .map(|c| Field::new(c.name(), arrow_type(c.column_type()), true))
            .collect::<Vec<_>>(),
    )
}

/// Build one record batch from rows of `schema`.
///
/// Cells whose value does not match the column type are rendered as null.
///
/// # Errors
///
/// Returns an error if Arrow rejects the assembled columns.
pub fn rows_to_record_batch(schema: &Schema, rows: &[Vec<Value>]) -> Result<RecordBatch, ArrowError> {
    let columns: Vec<ArrayRef> = schema
        .columns()
        .iter()
        .map(|column| build_column(column.column_type(), column.index(), rows))
        .collect();
    RecordBatch::try_new_with_options(
        Arc::new(arrow_schema(schema)),
        columns,
        &RecordBatchOptions::new().with_row_count(Some(rows.len())),
    )
}

fn build_column(ty: Type, index: usize, rows: &[Vec<Value>]) -> ArrayRef {
    let cells = rows.iter().map(|row| row.get(index).unwrap_or(&Value::Null));
    match ty {
        Type::Boolean => Arc::new(
            cells
                .map(|v| match v {
                    Value::Boolean(b) => Some(*b),
                    _ => None,
                })
                .collect::<BooleanArray>(),
        ),
        Type::Long => Arc::new(
            cells
                .map(|v| match v {
                    Value::Long(n) => Some(*n),
                    _ => None,
                })
                .collect::<Int64Array>(),
        ),
        Type::Double => Arc::new(
            cells
                .map(|v| match v {
                    Value::Double(d) => Some(*d),
                    #[allow(clippy::cast_precision_loss)]
                    Value::Long(n) => Some(*n as f64),
                    _ => None,
                })
                .collect::<Float64Array>(),
        ),
        Type::String | Type::Json => Arc::new(
            cells
                .map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Json(j) => Some(j.to_string()),
                    _ => None,
                })
                .collect::<StringArray>(),
        ),
        Type::Timestamp => Arc::new(
            cells
                .map(|v| match v {
                    Value::Timestamp(t) => Some(t.timestamp_micros()),
                    _ => None,
                })
                .collect::<TimestampMicrosecondArray>()
                .with_timezone(UTC),
        ),
    }
}
