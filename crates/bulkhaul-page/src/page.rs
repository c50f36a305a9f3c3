//! Fixed-capacity record buffer with per-page reference tables.

use bytes::BytesMut;
use chrono::{DateTime, Utc};

/// Position in a page's reference tables, used to roll back a partially
/// written record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReferenceMark {
    strings: usize,
    values: usize,
    bytes: usize,
}

/// A zero-filled byte region of fixed capacity plus reference tables.
///
/// `length` is the number of bytes holding complete records and is distinct
/// from `capacity`. Reads and writes outside `capacity` panic: that is a
/// programmer error, never a data error.
#[derive(Debug)]
pub struct Page {
    buf: BytesMut,
    length: usize,
    record_count: usize,
    string_refs: Vec<String>,
    value_refs: Vec<serde_json::Value>,
    reference_bytes: usize,
}

impl Page {
    /// Allocate a fresh zeroed page.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_buffer(BytesMut::zeroed(capacity))
    }

    /// Wrap an already zeroed buffer. Its length is the page capacity.
    #[must_use]
    pub fn from_buffer(buf: BytesMut) -> Self {
        Self {
            buf,
            length: 0,
            record_count: 0,
            string_refs: Vec::new(),
            value_refs: Vec::new(),
            reference_bytes: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes occupied by complete records.
    #[must_use]
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn set_length(&mut self, length: usize) {
        assert!(
            length <= self.capacity(),
            "page length {length} exceeds capacity {}",
            self.capacity()
        );
        self.length = length;
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.record_count
    }

    pub fn set_record_count(&mut self, count: usize) {
        self.record_count = count;
    }

    /// Approximate bytes held by the reference tables.
    #[must_use]
    pub fn reference_bytes(&self) -> usize {
        self.reference_bytes
    }

    /// Record bytes, `[0, length)`.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.length]
    }

    /// Zero the used region and drop every reference so the buffer can be
    /// reused.
    pub fn clear(&mut self) {
        self.buf[..self.length].fill(0);
        self.length = 0;
        self.record_count = 0;
        self.string_refs.clear();
        self.value_refs.clear();
        self.reference_bytes = 0;
    }

    /// Clear the page and hand back its zeroed buffer.
    #[must_use]
    pub fn into_buffer(mut self) -> BytesMut {
        self.clear();
        self.buf
    }

    fn slice(&self, offset: usize, len: usize) -> &[u8] {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= self.capacity());
        match end {
            Some(end) => &self.buf[offset..end],
            None => panic!(
                "page access out of bounds: offset={offset}, len={len}, capacity={}",
                self.capacity()
            ),
        }
    }

    fn slice_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        let capacity = self.capacity();
        let end = offset.checked_add(len).filter(|end| *end <= capacity);
        match end {
            Some(end) => &mut self.buf[offset..end],
            None => panic!(
                "page write out of bounds: offset={offset}, len={len}, capacity={capacity}"
            ),
        }
    }

    fn read_array<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(self.slice(offset, N));
        out
    }

    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.slice_mut(offset, bytes.len()).copy_from_slice(bytes);
    }

    #[must_use]
    pub fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        self.slice(offset, len)
    }

    pub fn fill(&mut self, offset: usize, len: usize, byte: u8) {
        self.slice_mut(offset, len).fill(byte);
    }

    #[must_use]
    pub fn get_u8(&self, offset: usize) -> u8 {
        self.slice(offset, 1)[0]
    }

    pub fn set_u8(&mut self, offset: usize, value: u8) {
        self.slice_mut(offset, 1)[0] = value;
    }

    #[must_use]
    pub fn get_bool(&self, offset: usize) -> bool {
        self.get_u8(offset) != 0
    }

    pub fn set_bool(&mut self, offset: usize, value: bool) {
        self.set_u8(offset, u8::from(value));
    }

    #[must_use]
    pub fn get_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.read_array(offset))
    }

    pub fn set_u32(&mut self, offset: usize, value: u32) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    #[must_use]
    pub fn get_i64(&self, offset: usize) -> i64 {
        i64::from_le_bytes(self.read_array(offset))
    }

    pub fn set_i64(&mut self, offset: usize, value: i64) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    #[must_use]
    pub fn get_f64(&self, offset: usize) -> f64 {
        f64::from_le_bytes(self.read_array(offset))
    }

    pub fn set_f64(&mut self, offset: usize, value: f64) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    /// Timestamp stored as `i64` epoch seconds followed by `u32` nanos.
    #[must_use]
    pub fn get_timestamp(&self, offset: usize) -> DateTime<Utc> {
        let secs = self.get_i64(offset);
        let nanos = self.get_u32(offset + 8);
        DateTime::from_timestamp(secs, nanos).unwrap_or_default()
    }

    pub fn set_timestamp(&mut self, offset: usize, value: DateTime<Utc>) {
        self.set_i64(offset, value.timestamp());
        self.set_u32(offset + 8, value.timestamp_subsec_nanos());
    }

    /// Append a string to the reference table and return its index.
    pub fn add_string_reference(&mut self, value: impl Into<String>) -> u32 {
        let value = value.into();
        self.reference_bytes += value.len();
        self.string_refs.push(value);
        index_u32(self.string_refs.len() - 1)
    }

    /// Append a JSON value to the reference table and return its index.
    pub fn add_value_reference(&mut self, value: serde_json::Value) -> u32 {
        self.reference_bytes += json_weight(&value);
        self.value_refs.push(value);
        index_u32(self.value_refs.len() - 1)
    }

    #[must_use]
    pub fn get_string_reference(&self, index: u32) -> &str {
        &self.string_refs[index as usize]
    }

    #[must_use]
    pub fn get_value_reference(&self, index: u32) -> &serde_json::Value {
        &self.value_refs[index as usize]
    }

    #[must_use]
    pub fn reference_mark(&self) -> ReferenceMark {
        ReferenceMark {
            strings: self.string_refs.len(),
            values: self.value_refs.len(),
            bytes: self.reference_bytes,
        }
    }

    /// Drop references appended after `mark`.
    pub fn truncate_references(&mut self, mark: ReferenceMark) {
        self.string_refs.truncate(mark.strings);
        self.value_refs.truncate(mark.values);
        self.reference_bytes = mark.bytes;
    }
}

fn index_u32(index: usize) -> u32 {
    u32::try_from(index).unwrap_or_else(|_| panic!("reference table overflow at {index}"))
}

fn json_weight(value: &serde_json::Value) -> usize {
    use serde_json::Value as J;
    match value {
        J::Null | J::Bool(_) => 1,
        J::Number(_) => 8,
        J::String(s) => s.len(),
        J::Array(items) => items.iter().map(json_weight).sum::<usize>() + 2,
        J::Object(map) => map.iter().map(|(k, v)| k.len() + json_weight(v)).sum::<usize>() + 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_page_is_zeroed() {
        let page = Page::with_capacity(64);
        assert_eq!(page.capacity(), 64);
        assert_eq!(page.length(), 0);
        assert_eq!(page.get_i64(56), 0);
    }

    #[test]
    fn primitives_are_little_endian() {
        let mut page = Page::with_capacity(32);
        page.set_u32(0, 0x0102_0304);
        assert_eq!(page.read_bytes(0, 4), &[4, 3, 2, 1]);
        page.set_i64(4, -2);
        assert_eq!(page.get_i64(4), -2);
        page.set_f64(12, 2.5);
        assert!((page.get_f64(12) - 2.5).abs() < f64::EPSILON);
        page.set_bool(20, true);
        assert!(page.get_bool(20));
    }

    #[test]
    fn timestamp_keeps_nanos() {
        let mut page = Page::with_capacity(12);
        let ts = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        page.set_timestamp(0, ts);
        assert_eq!(page.get_timestamp(0), ts);
    }

    #[test]
    fn references_are_stable() {
        let mut page = Page::with_capacity(8);
        let a = page.add_string_reference("alpha");
        let j = page.add_value_reference(serde_json::json!({"k": 1}));
        let b = page.add_string_reference("beta");
        assert_eq!((a, b, j), (0, 1, 0));
        assert_eq!(page.get_string_reference(a), "alpha");
        assert_eq!(page.get_string_reference(b), "beta");
        assert_eq!(page.get_value_reference(j), &serde_json::json!({"k": 1}));
    }

    #[test]
    fn truncate_rolls_back_references() {
        let mut page = Page::with_capacity(8);
        page.add_string_reference("keep");
        let mark = page.reference_mark();
        page.add_string_reference("drop");
        page.add_value_reference(serde_json::json!([1, 2]));
        page.truncate_references(mark);
        assert_eq!(page.reference_mark(), mark);
        assert_eq!(page.add_string_reference("next"), 1);
    }

    #[test]
    fn clear_resets_used_region() {
        let mut page = Page::with_capacity(16);
        page.set_i64(0, 99);
        page.set_length(8);
        page.set_record_count(1);
        page.add_string_reference("x");
        page.clear();
        assert_eq!(page.length(), 0);
        assert_eq!(page.record_count(), 0);
        assert_eq!(page.get_i64(0), 0);
        assert_eq!(page.reference_bytes(), 0);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn write_past_capacity_panics() {
        let mut page = Page::with_capacity(8);
        page.set_i64(4, 1);
    }
}
