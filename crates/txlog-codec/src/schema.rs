//! Arrow schema for the tx-ops envelope.
//!
//! The envelope is encoded as a single-row Arrow IPC stream: one row per
//! transaction, with `tx_ops` a list column of per-op structs. Each op
//! struct carries the union of fields needed by any variant; unused fields
//! are null for a given row. This trades the fidelity of a true Arrow dense
//! `UnionArray` (which the wire format describes) for a representation that
//! is straightforward to build and decode by hand without a compiler in the
//! loop; see `DESIGN.md` for the tradeoff.

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Fields, Schema, TimeUnit};

pub const IID_BYTE_WIDTH: i32 = 16;
pub const CURRENT_FORMAT_VERSION: u8 = 1;
pub const FORMAT_VERSION_METADATA_KEY: &str = "txlog.format_version";

fn timestamp_field(name: &str) -> Field {
    Field::new(name, DataType::Timestamp(TimeUnit::Nanosecond, Some("UTC".into())), true)
}

pub fn field_struct_fields() -> Fields {
    Fields::from(vec![
        Field::new("name", DataType::Utf8, false),
        Field::new("value", DataType::Binary, false),
    ])
}

pub fn doc_struct_fields() -> Fields {
    Fields::from(vec![
        Field::new("iid", DataType::FixedSizeBinary(IID_BYTE_WIDTH), false),
        Field::new(
            "fields",
            DataType::List(Arc::new(Field::new("item", DataType::Struct(field_struct_fields()), false))),
            false,
        ),
    ])
}

pub fn op_struct_fields() -> Fields {
    Fields::from(vec![
        Field::new("variant", DataType::Utf8, false),
        Field::new("table", DataType::Utf8, true),
        Field::new("query", DataType::Utf8, true),
        Field::new("sql_args", DataType::Binary, true),
        Field::new("xtql_op", DataType::Binary, true),
        Field::new("xtql_args", DataType::Binary, true),
        Field::new(
            "docs",
            DataType::List(Arc::new(Field::new("item", DataType::Struct(doc_struct_fields()), false))),
            true,
        ),
        Field::new(
            "iids",
            DataType::List(Arc::new(Field::new("item", DataType::FixedSizeBinary(IID_BYTE_WIDTH), false))),
            true,
        ),
        Field::new("fn_iid", DataType::FixedSizeBinary(IID_BYTE_WIDTH), true),
        Field::new("call_args", DataType::Binary, true),
        timestamp_field("valid_from"),
        timestamp_field("valid_to"),
        Field::new("unknown_tag", DataType::Utf8, true),
        Field::new("unknown_raw", DataType::Binary, true),
    ])
}

pub fn envelope_schema() -> Schema {
    let tx_ops = Field::new(
        "tx_ops",
        DataType::List(Arc::new(Field::new("item", DataType::Struct(op_struct_fields()), false))),
        false,
    );
    let fields = vec![timestamp_field("system_time"), Field::new("default_tz", DataType::Utf8, false), Field::new("user", DataType::Utf8, true), tx_ops];
    let mut metadata = std::collections::HashMap::new();
    metadata.insert(FORMAT_VERSION_METADATA_KEY.to_string(), CURRENT_FORMAT_VERSION.to_string());
    Schema::new_with_metadata(fields, metadata)
}
