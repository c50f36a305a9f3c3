//! Immutable ordered column lists and their derived page layout.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::column::{Column, Type};

/// Width of the `u32` record-length prefix that opens every record.
pub const RECORD_LENGTH_SIZE: usize = 4;

/// Byte layout derived once from a column list.
#[derive(Debug)]
struct Layout {
    null_bitmap_size: usize,
    header_size: usize,
    offsets: Vec<usize>,
    fixed_record_size: usize,
}

impl Layout {
    fn compute(columns: &[Column]) -> Self {
        let null_bitmap_size = columns.len().div_ceil(8);
        let header_size = RECORD_LENGTH_SIZE + null_bitmap_size;
        let mut offsets = Vec::with_capacity(columns.len());
        let mut cursor = header_size;
        for column in columns {
            offsets.push(cursor);
            cursor += column.column_type().fixed_size();
        }
        Self {
            null_bitmap_size,
            header_size,
            offsets,
            fixed_record_size: cursor,
        }
    }
}

#[derive(Debug)]
struct Inner {
    columns: Vec<Column>,
    layout: Layout,
}

/// Ordered, immutable list of columns.
///
/// Cloning is cheap: the column list and its layout are shared behind an
/// `Arc`, so every builder and reader of a job reuses the same offsets.
/// Equality is structural over the columns.
#[derive(Clone, Serialize, Deserialize)]
#[serde(from = "Vec<Column>", into = "Vec<Column>")]
pub struct Schema {
    inner: Arc<Inner>,
}

impl Schema {
    /// Build a schema from columns. Column indices are reassigned to match
    /// their position.
    #[must_use]
    pub fn new(columns: Vec<Column>) -> Self {
        let columns: Vec<Column> = columns
            .into_iter()
            .enumerate()
            .map(|(i, c)| Column::new(i, c.name().to_owned(), c.column_type()))
            .collect();
        let layout = Layout::compute(&columns);
        Self {
            inner: Arc::new(Inner { columns, layout }),
        }
    }

    #[must_use]
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.inner.columns
    }

    #[must_use]
    pub fn column(&self, index: usize) -> &Column {
        &self.inner.columns[index]
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.inner.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.columns.is_empty()
    }

    #[must_use]
    pub fn column_type(&self, index: usize) -> Type {
        self.inner.columns[index].column_type()
    }

    /// First column with the given name.
    #[must_use]
    pub fn lookup_column(&self, name: &str) -> Option<&Column> {
        self.inner.columns.iter().find(|c| c.name() == name)
    }

    /// Byte offset of each column's fixed slot relative to the record start.
    #[must_use]
    pub fn column_offsets(&self) -> &[usize] {
        &self.inner.layout.offsets
    }

    #[must_use]
    pub fn null_bitmap_size(&self) -> usize {
        self.inner.layout.null_bitmap_size
    }

    /// Length prefix plus null bitmap.
    #[must_use]
    pub fn header_size(&self) -> usize {
        self.inner.layout.header_size
    }

    /// Header plus the sum of all fixed slot widths.
    #[must_use]
    pub fn fixed_record_size(&self) -> usize {
        self.inner.layout.fixed_record_size
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner.columns == other.inner.columns
    }
}

impl Eq for Schema {}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.columns()).finish()
    }
}

impl From<Vec<Column>> for Schema {
    fn from(columns: Vec<Column>) -> Self {
        Self::new(columns)
    }
}

impl From<Schema> for Vec<Column> {
    fn from(schema: Schema) -> Self {
        schema.inner.columns.clone()
    }
}

/// Appends columns in order.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    columns: Vec<Column>,
}

impl SchemaBuilder {
    #[must_use]
    pub fn add(mut self, name: impl Into<String>, ty: Type) -> Self {
        let index = self.columns.len();
        self.columns.push(Column::new(index, name, ty));
        self
    }

    #[must_use]
    pub fn build(self) -> Schema {
        Schema::new(self.columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc() -> Schema {
        Schema::builder()
            .add("a", Type::Boolean)
            .add("b", Type::Long)
            .add("c", Type::String)
            .build()
    }

    #[test]
    fn layout_for_three_columns() {
        let schema = abc();
        assert_eq!(schema.null_bitmap_size(), 1);
        assert_eq!(schema.header_size(), 5);
        assert_eq!(schema.column_offsets(), &[5, 6, 14]);
        assert_eq!(schema.fixed_record_size(), 18);
    }

    #[test]
    fn bitmap_rounds_up() {
        let mut builder = Schema::builder();
        for i in 0..9 {
            builder = builder.add(format!("c{i}"), Type::Boolean);
        }
        let schema = builder.build();
        assert_eq!(schema.null_bitmap_size(), 2);
        assert_eq!(schema.header_size(), 6);
        assert_eq!(schema.fixed_record_size(), 15);
    }

    #[test]
    fn empty_schema_has_only_length_prefix() {
        let schema = Schema::new(Vec::new());
        assert!(schema.is_empty());
        assert_eq!(schema.header_size(), 4);
        assert_eq!(schema.fixed_record_size(), 4);
    }

    #[test]
    fn equality_is_structural() {
        assert_eq!(abc(), abc());
        let other = Schema::builder().add("a", Type::Boolean).build();
        assert_ne!(abc(), other);
    }

    #[test]
    fn lookup_by_name() {
        let schema = abc();
        assert_eq!(schema.lookup_column("b").map(Column::index), Some(1));
        assert!(schema.lookup_column("z").is_none());
    }

    #[test]
    fn serializes_as_column_array() {
        let schema = abc();
        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"index": 0, "name": "a", "type": "boolean"},
                {"index": 1, "name": "b", "type": "long"},
                {"index": 2, "name": "c", "type": "string"},
            ])
        );
        let back: Schema = serde_json::from_value(json).unwrap();
        assert_eq!(back, schema);
        assert_eq!(back.column_offsets(), schema.column_offsets());
    }

    #[test]
    fn new_reassigns_indices() {
        let schema = Schema::new(vec![
            Column::new(7, "x", Type::Long),
            Column::new(3, "y", Type::Double),
        ]);
        assert_eq!(schema.column(0).index(), 0);
        assert_eq!(schema.column(1).index(), 1);
    }
}
