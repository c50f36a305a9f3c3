//! Record cursor over pages.

use std::sync::Arc;

use bulkhaul_types::schema::RECORD_LENGTH_SIZE;
use bulkhaul_types::{Schema, Type, Value};
use chrono::{DateTime, Utc};

use crate::allocator::PageAllocator;
use crate::page::Page;

/// Walks the records of one page at a time.
///
/// Feed a page with [`reset`](Self::reset), then call
/// [`next_record`](Self::next_record) until it returns `false`; at that point
/// the page has been released. Getters return `None` for null columns and
/// panic when no record is current.
pub struct PageReader {
    schema: Schema,
    allocator: Option<Arc<dyn PageAllocator>>,
    page: Option<Page>,
    position: usize,
    next_position: usize,
    positioned: bool,
}

impl PageReader {
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            allocator: None,
            page: None,
            position: 0,
            next_position: 0,
            positioned: false,
        }
    }

    /// Reader that returns exhausted pages to `allocator` for reuse.
    #[must_use]
    pub fn with_allocator(schema: Schema, allocator: Arc<dyn PageAllocator>) -> Self {
        let mut reader = Self::new(schema);
        reader.allocator = Some(allocator);
        reader
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Release the current page, if any, and bind `page`.
    pub fn reset(&mut self, page: Page) {
        self.release();
        self.page = Some(page);
        self.position = 0;
        self.next_position = 0;
    }

    /// Advance to the next record. Returns `false` and releases the page
    /// once every record has been read.
    pub fn next_record(&mut self) -> bool {
        let Some(page) = &self.page else {
            return false;
        };
        if self.next_position >= page.length() {
            self.release();
            return false;
        }
        self.position = self.next_position;
        let length = page.get_u32(self.position) as usize;
        debug_assert_eq!(length, self.schema.fixed_record_size());
        self.next_position = self.position + length.max(self.schema.header_size());
        self.positioned = true;
        true
    }

    /// Drop the current page, returning it to the allocator when one is set.
    pub fn release(&mut self) {
        self.positioned = false;
        if let Some(page) = self.page.take() {
            if let Some(allocator) = &self.allocator {
                allocator.release(page);
            }
        }
    }

    fn current(&self) -> &Page {
        match &self.page {
            Some(page) if self.positioned => page,
            _ => panic!("page reader has no current record"),
        }
    }

    fn offset(&self, column: usize) -> usize {
        debug_assert!(column < self.schema.column_count());
        self.position + self.schema.column_offsets()[column]
    }

    #[must_use]
    pub fn is_null(&self, column: usize) -> bool {
        let byte = self
            .current()
            .get_u8(self.position + RECORD_LENGTH_SIZE + (column >> 3));
        byte & (1u8 << (column & 7)) != 0
    }

    #[must_use]
    pub fn get_boolean(&self, column: usize) -> Option<bool> {
        (!self.is_null(column)).then(|| self.current().get_bool(self.offset(column)))
    }

    #[must_use]
    pub fn get_long(&self, column: usize) -> Option<i64> {
        (!self.is_null(column)).then(|| self.current().get_i64(self.offset(column)))
    }

    #[must_use]
    pub fn get_double(&self, column: usize) -> Option<f64> {
        (!self.is_null(column)).then(|| self.current().get_f64(self.offset(column)))
    }

    #[must_use]
    pub fn get_timestamp(&self, column: usize) -> Option<DateTime<Utc>> {
        (!self.is_null(column)).then(|| self.current().get_timestamp(self.offset(column)))
    }

    #[must_use]
    pub fn get_string(&self, column: usize) -> Option<&str> {
        if self.is_null(column) {
            return None;
        }
        let page = self.current();
        Some(page.get_string_reference(page.get_u32(self.offset(column))))
    }

    #[must_use]
    pub fn get_json(&self, column: usize) -> Option<&serde_json::Value> {
        if self.is_null(column) {
            return None;
        }
        let page = self.current();
        Some(page.get_value_reference(page.get_u32(self.offset(column))))
    }

    /// Current column as a dynamic value.
    #[must_use]
    pub fn value(&self, column: usize) -> Value {
        let value = match self.schema.column_type(column) {
            Type::Boolean => self.get_boolean(column).map(Value::Boolean),
            Type::Long => self.get_long(column).map(Value::Long),
            Type::Double => self.get_double(column).map(Value::Double),
            Type::String => self.get_string(column).map(Value::from),
            Type::Timestamp => self.get_timestamp(column).map(Value::Timestamp),
            Type::Json => self.get_json(column).cloned().map(Value::Json),
        };
        value.unwrap_or(Value::Null)
    }

    /// Every column of the current record.
    #[must_use]
    pub fn record(&self) -> Vec<Value> {
        (0..self.schema.column_count()).map(|i| self.value(i)).collect()
    }

    /// Drain a sequence of pages into rows.
    pub fn read_all<I>(&mut self, pages: I) -> Vec<Vec<Value>>
    where
        I: IntoIterator<Item = Page>,
    {
        let mut rows = Vec::new();
        for page in pages {
            self.reset(page);
            while self.next_record() {
                rows.push(self.record());
            }
        }
        rows
    }
}

impl Drop for PageReader {
    fn drop(&mut self) {
        self.release();
    }
}
