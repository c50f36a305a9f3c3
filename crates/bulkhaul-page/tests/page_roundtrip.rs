use std::sync::Arc;

use bulkhaul_page::{PageBuilder, PageReader, PooledPageAllocator};
use bulkhaul_types::{Schema, Type, Value};
use chrono::DateTime;
use proptest::prelude::*;

fn all_types_schema() -> Schema {
    Schema::builder()
        .add("flag", Type::Boolean)
        .add("count", Type::Long)
        .add("ratio", Type::Double)
        .add("label", Type::String)
        .add("at", Type::Timestamp)
        .add("doc", Type::Json)
        .build()
}

fn nullable<S>(strategy: S) -> impl Strategy<Value = Value>
where
    S: Strategy<Value = Value> + 'static,
{
    prop_oneof![1 => Just(Value::Null), 4 => strategy]
}

fn row_strategy() -> impl Strategy<Value = Vec<Value>> {
    (
        nullable(any::<bool>().prop_map(Value::Boolean)),
        nullable(any::<i64>().prop_map(Value::Long)),
        nullable((-1.0e12_f64..1.0e12).prop_map(Value::Double)),
        nullable("[a-z0-9 ]{0,24}".prop_map(Value::String)),
        nullable(
            (0_i64..4_000_000_000, 0_u32..1_000_000_000).prop_map(|(s, n)| {
                Value::Timestamp(DateTime::from_timestamp(s, n).unwrap_or_default())
            }),
        ),
        nullable(
            prop_oneof![
                any::<i64>().prop_map(|v| serde_json::json!(v)),
                "[a-z]{0,8}".prop_map(|s| serde_json::json!({ "k": s })),
                Just(serde_json::json!([1, "two", null])),
            ]
            .prop_map(Value::Json),
        ),
    )
        .prop_map(|(a, b, c, d, e, f)| vec![a, b, c, d, e, f])
}

proptest! {
    #[test]
    fn builder_reader_roundtrip(
        rows in prop::collection::vec(row_strategy(), 0..200),
        page_size in 64_usize..2048,
    ) {
        let schema = all_types_schema();
        let allocator = Arc::new(PooledPageAllocator::new(page_size));
        let mut builder = PageBuilder::new(allocator.clone(), schema.clone(), Vec::new());
        for row in &rows {
            builder.add_values(row).unwrap();
        }
        builder.finish().unwrap();
        prop_assert_eq!(builder.record_count(), rows.len() as u64);

        let pages = builder.into_output();
        let per_page: usize = pages.iter().map(|p| p.record_count()).sum();
        prop_assert_eq!(per_page, rows.len());
        for page in &pages {
            prop_assert!(page.length() <= page.capacity());
        }

        let mut reader = PageReader::with_allocator(schema, allocator);
        let read = reader.read_all(pages);
        prop_assert_eq!(read, rows);
    }
}
