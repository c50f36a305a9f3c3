//! Record writer that packs values into pages.
//!
//! A builder moves through `no page -> accumulating -> flushed -> no page`.
//! The first setter (or [`PageBuilder::start_record`]) allocates a page;
//! [`PageBuilder::add_record`] commits the record and flushes when the next
//! one would not fit or when the reference tables have outgrown the page.

use std::sync::Arc;

use bulkhaul_types::schema::RECORD_LENGTH_SIZE;
use bulkhaul_types::{Schema, StageError, Type, Value};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::allocator::PageAllocator;
use crate::output::PageOutput;
use crate::page::{Page, ReferenceMark};

pub struct PageBuilder<O: PageOutput> {
    allocator: Arc<dyn PageAllocator>,
    schema: Schema,
    output: O,
    page: Option<Page>,
    /// Start of the record being written.
    position: usize,
    null_bitmap: Vec<u8>,
    record_started: bool,
    mark: ReferenceMark,
    records: u64,
    pages: u64,
}

impl<O: PageOutput> PageBuilder<O> {
    pub fn new(allocator: Arc<dyn PageAllocator>, schema: Schema, output: O) -> Self {
        let null_bitmap = vec![0; schema.null_bitmap_size()];
        Self {
            allocator,
            schema,
            output,
            page: None,
            position: 0,
            null_bitmap,
            record_started: false,
            mark: ReferenceMark::default(),
            records: 0,
            pages: 0,
        }
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Records committed through this builder.
    #[must_use]
    pub fn record_count(&self) -> u64 {
        self.records
    }

    /// Pages handed downstream.
    #[must_use]
    pub fn page_count(&self) -> u64 {
        self.pages
    }

    /// Begin a record with every column null. An unfinished record is
    /// discarded first.
    pub fn start_record(&mut self) {
        if self.record_started {
            self.discard_record();
        }
        let page = ensure_page(&mut self.page, &*self.allocator, self.schema.fixed_record_size());
        self.mark = page.reference_mark();
        self.null_bitmap.fill(0xFF);
        let tail = self.schema.column_count() % 8;
        if tail != 0 {
            if let Some(last) = self.null_bitmap.last_mut() {
                *last = (1u8 << tail) - 1;
            }
        }
        self.record_started = true;
    }

    fn slot(&mut self, column: usize, expected: Type) -> (&mut Page, usize) {
        if !self.record_started {
            self.start_record();
        }
        let actual = self.schema.column_type(column);
        assert!(
            actual == expected,
            "column {column} ('{}') is {actual}, not {expected}",
            self.schema.column(column).name()
        );
        self.null_bitmap[column >> 3] &= !(1u8 << (column & 7));
        let offset = self.position + self.schema.column_offsets()[column];
        let page = ensure_page(&mut self.page, &*self.allocator, self.schema.fixed_record_size());
        (page, offset)
    }

    pub fn set_null(&mut self, column: usize) {
        if !self.record_started {
            self.start_record();
        }
        assert!(column < self.schema.column_count(), "column {column} out of range");
        self.null_bitmap[column >> 3] |= 1u8 << (column & 7);
    }

    pub fn set_boolean(&mut self, column: usize, value: bool) {
        let (page, offset) = self.slot(column, Type::Boolean);
        page.set_bool(offset, value);
    }

    pub fn set_long(&mut self, column: usize, value: i64) {
        let (page, offset) = self.slot(column, Type::Long);
        page.set_i64(offset, value);
    }

    pub fn set_double(&mut self, column: usize, value: f64) {
        let (page, offset) = self.slot(column, Type::Double);
        page.set_f64(offset, value);
    }

    pub fn set_string(&mut self, column: usize, value: &str) {
        let (page, offset) = self.slot(column, Type::String);
        let index = page.add_string_reference(value);
        page.set_u32(offset, index);
    }

    pub fn set_timestamp(&mut self, column: usize, value: DateTime<Utc>) {
        let (page, offset) = self.slot(column, Type::Timestamp);
        page.set_timestamp(offset, value);
    }

    pub fn set_json(&mut self, column: usize, value: serde_json::Value) {
        let (page, offset) = self.slot(column, Type::Json);
        let index = page.add_value_reference(value);
        page.set_u32(offset, index);
    }

    /// Set a column from a dynamic value. A long is widened into a double
    /// column; any other mismatch is a data error and leaves the column as is.
    pub fn set_value(&mut self, column: usize, value: &Value) -> Result<(), StageError> {
        let ty = self.schema.column_type(column);
        match (ty, value) {
            (_, Value::Null) => self.set_null(column),
            (Type::Boolean, Value::Boolean(v)) => self.set_boolean(column, *v),
            (Type::Long, Value::Long(v)) => self.set_long(column, *v),
            (Type::Double, Value::Double(v)) => self.set_double(column, *v),
            #[allow(clippy::cast_precision_loss)]
            (Type::Double, Value::Long(v)) => self.set_double(column, *v as f64),
            (Type::String, Value::String(v)) => self.set_string(column, v),
            (Type::Timestamp, Value::Timestamp(v)) => self.set_timestamp(column, *v),
            (Type::Json, Value::Json(v)) => self.set_json(column, v.clone()),
            (_, other) => {
                return Err(StageError::data(
                    "TYPE_MISMATCH",
                    format!(
                        "column '{}' is {ty}, got {other}",
                        self.schema.column(column).name()
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Write one whole record. On error nothing of the record is kept.
    pub fn add_values(&mut self, values: &[Value]) -> Result<(), StageError> {
        if values.len() != self.schema.column_count() {
            return Err(StageError::data(
                "COLUMN_COUNT",
                format!(
                    "expected {} values, got {}",
                    self.schema.column_count(),
                    values.len()
                ),
            ));
        }
        self.start_record();
        for (column, value) in values.iter().enumerate() {
            if let Err(err) = self.set_value(column, value) {
                self.discard_record();
                return Err(err);
            }
        }
        self.add_record()
    }

    /// Commit the current record: write its length prefix and null bitmap,
    /// advance, and flush when the page is full.
    pub fn add_record(&mut self) -> Result<(), StageError> {
        if !self.record_started {
            self.start_record();
        }
        let fixed = self.schema.fixed_record_size();
        let page = ensure_page(&mut self.page, &*self.allocator, fixed);
        #[allow(clippy::cast_possible_truncation)]
        page.set_u32(self.position, fixed as u32);
        page.write_bytes(self.position + RECORD_LENGTH_SIZE, &self.null_bitmap);
        self.position += fixed;
        page.set_length(self.position);
        page.set_record_count(page.record_count() + 1);
        self.record_started = false;
        self.records += 1;

        let full = page.capacity() - self.position < fixed
            || page.reference_bytes() >= page.capacity();
        if full {
            self.flush()?;
        }
        Ok(())
    }

    /// Roll back a half-written record, including references it appended.
    pub fn discard_record(&mut self) {
        if !self.record_started {
            return;
        }
        if let Some(page) = self.page.as_mut() {
            page.truncate_references(self.mark);
            page.fill(self.position, self.schema.fixed_record_size(), 0);
        }
        self.record_started = false;
    }

    /// Push the current page downstream if one was allocated.
    pub fn flush(&mut self) -> Result<(), StageError> {
        if self.record_started {
            warn!(records = self.records, "discarding unfinished record on flush");
            self.discard_record();
        }
        if let Some(page) = self.page.take() {
            self.position = 0;
            self.pages += 1;
            debug!(
                records = page.record_count(),
                bytes = page.length(),
                "flushing page"
            );
            self.output.add(page)?;
        }
        Ok(())
    }

    /// Flush, then signal the downstream output that the stream is done.
    pub fn finish(&mut self) -> Result<(), StageError> {
        self.flush()?;
        self.output.finish()
    }

    /// Drop any buffered page and close the downstream output.
    pub fn close(&mut self) {
        self.record_started = false;
        if let Some(page) = self.page.take() {
            self.allocator.release(page);
        }
        self.position = 0;
        self.output.close();
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    pub fn into_output(mut self) -> O {
        if let Some(page) = self.page.take() {
            self.allocator.release(page);
        }
        self.output
    }
}

fn ensure_page<'a>(
    slot: &'a mut Option<Page>,
    allocator: &dyn PageAllocator,
    min_capacity: usize,
) -> &'a mut Page {
    slot.get_or_insert_with(|| allocator.allocate(min_capacity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::PooledPageAllocator;
    use crate::reader::PageReader;

    fn schema() -> Schema {
        Schema::builder()
            .add("a", Type::Boolean)
            .add("b", Type::Long)
            .add("c", Type::String)
            .build()
    }

    fn builder(page_size: usize) -> PageBuilder<Vec<Page>> {
        PageBuilder::new(
            Arc::new(PooledPageAllocator::new(page_size)),
            schema(),
            Vec::new(),
        )
    }

    #[test]
    fn concrete_layout_of_three_records() {
        let mut b = builder(1024);
        b.set_boolean(0, true);
        b.set_long(1, 7);
        b.set_string(2, "x");
        b.add_record().unwrap();
        b.set_null(0);
        b.set_long(1, -3);
        b.set_null(2);
        b.add_record().unwrap();
        b.set_boolean(0, false);
        b.set_long(1, 0);
        b.set_string(2, "");
        b.add_record().unwrap();
        b.finish().unwrap();

        let pages = b.into_output();
        assert_eq!(pages.len(), 1);
        let page = &pages[0];
        assert_eq!(page.record_count(), 3);
        assert_eq!(page.length(), 3 * 18);

        // record 0: len=18, bitmap 0b000, a=1, b=7, c=ref 0
        assert_eq!(page.get_u32(0), 18);
        assert_eq!(page.get_u8(4), 0);
        assert!(page.get_bool(5));
        assert_eq!(page.get_i64(6), 7);
        assert_eq!(page.get_u32(14), 0);
        assert_eq!(page.get_string_reference(0), "x");

        // record 1: a and c null
        assert_eq!(page.get_u32(18), 18);
        assert_eq!(page.get_u8(22), 0b101);
        assert_eq!(page.get_i64(24), -3);

        // record 2: empty string gets its own reference
        assert_eq!(page.get_u8(40), 0);
        assert_eq!(page.get_u32(50), 1);
        assert_eq!(page.get_string_reference(1), "");
    }

    #[test]
    fn rotates_pages_without_loss() {
        // 18-byte records, 64-byte pages: three records per page.
        let mut b = builder(64);
        for i in 0..10 {
            b.add_values(&[Value::Boolean(i % 2 == 0), Value::Long(i), Value::from(format!("r{i}"))])
                .unwrap();
        }
        b.finish().unwrap();
        assert_eq!(b.record_count(), 10);
        let pages = b.into_output();
        assert_eq!(pages.len(), 4);
        assert_eq!(
            pages.iter().map(Page::record_count).collect::<Vec<_>>(),
            vec![3, 3, 3, 1]
        );

        let mut reader = PageReader::new(schema());
        let rows = reader.read_all(pages);
        let longs: Vec<i64> = rows
            .iter()
            .map(|r| match r[1] {
                Value::Long(v) => v,
                _ => panic!("expected long"),
            })
            .collect();
        assert_eq!(longs, (0..10).collect::<Vec<_>>());
        assert_eq!(rows[9][2], Value::from("r9"));
    }

    #[test]
    fn unset_columns_read_as_null() {
        let mut b = builder(256);
        b.set_long(1, 5);
        b.add_record().unwrap();
        b.finish().unwrap();
        let rows = PageReader::new(schema()).read_all(b.into_output());
        assert_eq!(rows, vec![vec![Value::Null, Value::Long(5), Value::Null]]);
    }

    #[test]
    fn discard_rolls_back_record_and_references() {
        let mut b = builder(256);
        b.add_values(&[Value::Boolean(true), Value::Long(1), Value::from("keep")])
            .unwrap();
        b.set_string(2, "dropped");
        b.set_long(1, 99);
        b.discard_record();
        b.add_values(&[Value::Boolean(false), Value::Long(2), Value::from("next")])
            .unwrap();
        b.finish().unwrap();

        let pages = b.into_output();
        assert_eq!(pages[0].record_count(), 2);
        assert_eq!(pages[0].get_string_reference(1), "next");
        let rows = PageReader::new(schema()).read_all(pages);
        assert_eq!(rows[1][2], Value::from("next"));
    }

    #[test]
    fn bad_value_is_a_data_error_and_keeps_prior_records() {
        let mut b = builder(256);
        b.add_values(&[Value::Null, Value::Long(1), Value::Null]).unwrap();
        let err = b
            .add_values(&[Value::Null, Value::from("nope"), Value::Null])
            .unwrap_err();
        assert_eq!(err.category, bulkhaul_types::ErrorCategory::Data);
        let err = b.add_values(&[Value::Null]).unwrap_err();
        assert_eq!(err.code, "COLUMN_COUNT");
        b.finish().unwrap();
        assert_eq!(b.record_count(), 1);
    }

    #[test]
    fn reference_payload_forces_flush() {
        let mut b = builder(64);
        let big = "x".repeat(80);
        b.add_values(&[Value::Null, Value::Long(1), Value::from(big.as_str())])
            .unwrap();
        assert_eq!(b.page_count(), 1);
        b.add_values(&[Value::Null, Value::Long(2), Value::Null]).unwrap();
        b.finish().unwrap();
        assert_eq!(b.into_output().len(), 2);
    }

    #[test]
    fn finish_without_records_emits_nothing() {
        let mut b = builder(64);
        b.finish().unwrap();
        assert!(b.into_output().is_empty());
    }

    #[test]
    fn flush_discards_unfinished_record() {
        let mut b = builder(256);
        b.add_values(&[Value::Null, Value::Long(1), Value::Null]).unwrap();
        b.set_long(1, 2);
        b.flush().unwrap();
        let pages = b.into_output();
        assert_eq!(pages[0].record_count(), 1);
    }

    #[test]
    #[should_panic(expected = "not long")]
    fn wrong_typed_setter_panics() {
        let mut b = builder(64);
        b.set_long(0, 1);
    }
}
