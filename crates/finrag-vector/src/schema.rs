use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

/// Arrow schema of the passage table. `metadata` holds the caller metadata
/// map as a JSON string; `source` and `page_num` are also first-class
/// columns so delete-by-source stays a plain predicate.
pub fn build_arrow_schema(dim: i32) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("page_num", DataType::Int32, false),
        Field::new("content", DataType::Utf8, false),
        Field::new("metadata", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim),
            true,
        ),
    ]))
}
