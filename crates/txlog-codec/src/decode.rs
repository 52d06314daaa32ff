use std::str::FromStr;

use arrow::array::{Array, BinaryArray, FixedSizeBinaryArray, ListArray, RecordBatch, StringArray, StructArray, TimestampNanosecondArray};
use arrow::ipc::reader::StreamReader;
use chrono::{DateTime, Utc};

use crate::error::{CodecError, Result};
use crate::model::{Doc, Envelope, Field as DocField, Iid, Op, ValidTime};
use crate::schema::{CURRENT_FORMAT_VERSION, FORMAT_VERSION_METADATA_KEY};
use crate::value::Value;

/// Decode a single-record-batch Arrow IPC stream previously produced by
/// [`crate::encode::serialize`] into an [`Envelope`].
///
/// Unknown tx-ops are preserved as [`Op::Unknown`] rather than rejected; see
/// [`decode_strict`] for the variant that errors on unrecognized tags.
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    decode_inner(bytes, false)
}

/// Like [`decode`], but returns [`CodecError::UnknownOpVariant`] instead of
/// [`Op::Unknown`] when a tx-op tag is not recognized.
pub fn decode_strict(bytes: &[u8]) -> Result<Envelope> {
    decode_inner(bytes, true)
}

fn decode_inner(bytes: &[u8], strict: bool) -> Result<Envelope> {
    let mut reader = StreamReader::try_new(bytes, None)?;
    let schema = reader.schema();
    if let Some(version) = schema.metadata().get(FORMAT_VERSION_METADATA_KEY) {
        let found: u8 = version
            .parse()
            .map_err(|_| CodecError::Malformed(format!("non-numeric format version {version:?}")))?;
        if found > CURRENT_FORMAT_VERSION {
            return Err(CodecError::UnsupportedFormatVersion {
                found,
                supported: CURRENT_FORMAT_VERSION,
            });
        }
    }
    let batch = reader
        .next()
        .ok_or_else(|| CodecError::Malformed("envelope stream contains no record batch".into()))??;
    decode_batch(&batch, strict)
}

fn decode_batch(batch: &RecordBatch, strict: bool) -> Result<Envelope> {
    let system_time = column::<TimestampNanosecondArray>(batch, "system_time")?
        .iter()
        .next()
        .flatten()
        .and_then(ts_from_nanos);
    let default_tz_raw = column::<StringArray>(batch, "default_tz")?.value(0).to_string();
    let default_tz = chrono_tz::Tz::from_str(&default_tz_raw).map_err(|_| CodecError::Malformed(format!("unknown timezone {default_tz_raw:?}")))?;
    let user = column::<StringArray>(batch, "user")?.iter().next().flatten().map(str::to_string);

    let tx_ops = column::<ListArray>(batch, "tx_ops")?;
    let ops_struct = tx_ops.value(0);
    let ops_struct = ops_struct.as_any().downcast_ref::<StructArray>().ok_or_else(|| CodecError::Malformed("tx_ops element is not a struct".into()))?;

    let mut ops = Vec::with_capacity(ops_struct.len());
    for i in 0..ops_struct.len() {
        ops.push(decode_op(ops_struct, i, strict)?);
    }

    Ok(Envelope { ops, system_time, default_tz, user })
}

fn decode_op(s: &StructArray, i: usize, strict: bool) -> Result<Op> {
    let variant = struct_col::<StringArray>(s, "variant")?.value(i);
    let table = opt_str(struct_col::<StringArray>(s, "table")?, i);
    let valid = ValidTime {
        valid_from: opt_ts(struct_col::<TimestampNanosecondArray>(s, "valid_from")?, i),
        valid_to: opt_ts(struct_col::<TimestampNanosecondArray>(s, "valid_to")?, i),
    };

    match variant {
        "sql" => Ok(Op::Sql {
            query: struct_col::<StringArray>(s, "query")?.value(i).to_string(),
            args: opt_bytes(struct_col::<BinaryArray>(s, "sql_args")?, i),
        }),
        "xtql" => Ok(Op::Xtql {
            op: struct_col::<BinaryArray>(s, "xtql_op")?.value(i).to_vec(),
            args: opt_bytes(struct_col::<BinaryArray>(s, "xtql_args")?, i),
        }),
        "put-docs" | "patch-docs" => {
            let table = table.ok_or_else(|| CodecError::Malformed(format!("{variant} op missing table")))?;
            let docs = decode_docs(struct_col::<ListArray>(s, "docs")?, i)?;
            if variant == "put-docs" {
                Ok(Op::PutDocs { table, docs, valid })
            } else {
                Ok(Op::PatchDocs { table, docs, valid })
            }
        }
        "delete-docs" => Ok(Op::DeleteDocs {
            table: table.ok_or_else(|| CodecError::Malformed("delete-docs op missing table".into()))?,
            iids: decode_iids(struct_col::<ListArray>(s, "iids")?, i)?,
            valid,
        }),
        "erase-docs" => Ok(Op::EraseDocs {
            table: table.ok_or_else(|| CodecError::Malformed("erase-docs op missing table".into()))?,
            iids: decode_iids(struct_col::<ListArray>(s, "iids")?, i)?,
        }),
        "call" => Ok(Op::Call {
            fn_iid: opt_iid(struct_col::<FixedSizeBinaryArray>(s, "fn_iid")?, i).ok_or_else(|| CodecError::Malformed("call op missing fn_iid".into()))?,
            args: struct_col::<BinaryArray>(s, "call_args")?.value(i).to_vec(),
        }),
        "abort" => Ok(Op::Abort),
        "unknown" => {
            let tag = opt_str(struct_col::<StringArray>(s, "unknown_tag")?, i).unwrap_or_default();
            let raw = opt_bytes(struct_col::<BinaryArray>(s, "unknown_raw")?, i).unwrap_or_default();
            if strict {
                Err(CodecError::UnknownOpVariant { tag })
            } else {
                Ok(Op::Unknown { tag, raw })
            }
        }
        other => {
            if strict {
                Err(CodecError::UnknownOpVariant { tag: other.to_string() })
            } else {
                Ok(Op::Unknown { tag: other.to_string(), raw: Vec::new() })
            }
        }
    }
}

fn decode_docs(list: &ListArray, i: usize) -> Result<Vec<Doc>> {
    if list.is_null(i) {
        return Ok(Vec::new());
    }
    let elems = list.value(i);
    let s = elems.as_any().downcast_ref::<StructArray>().ok_or_else(|| CodecError::Malformed("docs element is not a struct".into()))?;
    let iid_col = struct_col::<FixedSizeBinaryArray>(s, "iid")?;
    let fields_col = struct_col::<ListArray>(s, "fields")?;
    let mut docs = Vec::with_capacity(s.len());
    for row in 0..s.len() {
        let iid = opt_iid(iid_col, row).ok_or_else(|| CodecError::Malformed("doc missing iid".into()))?;
        docs.push(Doc { iid, fields: decode_fields(fields_col, row)? });
    }
    Ok(docs)
}

fn decode_fields(list: &ListArray, i: usize) -> Result<Vec<DocField>> {
    if list.is_null(i) {
        return Ok(Vec::new());
    }
    let elems = list.value(i);
    let s = elems.as_any().downcast_ref::<StructArray>().ok_or_else(|| CodecError::Malformed("field element is not a struct".into()))?;
    let name_col = struct_col::<StringArray>(s, "name")?;
    let value_col = struct_col::<BinaryArray>(s, "value")?;
    let mut out = Vec::with_capacity(s.len());
    for row in 0..s.len() {
        let (value, rest) = Value::decode(value_col.value(row)).map_err(|e| CodecError::Malformed(format!("field value: {e}")))?;
        if !rest.is_empty() {
            return Err(CodecError::Malformed("trailing bytes after field value".into()));
        }
        out.push(DocField { name: name_col.value(row).to_string(), value });
    }
    Ok(out)
}

fn decode_iids(list: &ListArray, i: usize) -> Result<Vec<Iid>> {
    if list.is_null(i) {
        return Ok(Vec::new());
    }
    let elems = list.value(i);
    let arr = elems.as_any().downcast_ref::<FixedSizeBinaryArray>().ok_or_else(|| CodecError::Malformed("iids element is not fixed-size binary".into()))?;
    Ok((0..arr.len()).filter_map(|row| opt_iid(arr, row)).collect())
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| CodecError::Malformed(format!("missing or mistyped column {name:?}")))
}

fn struct_col<'a, T: Array + 'static>(s: &'a StructArray, name: &str) -> Result<&'a T> {
    s.column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| CodecError::Malformed(format!("missing or mistyped struct field {name:?}")))
}

fn opt_str(arr: &StringArray, i: usize) -> Option<String> {
    (!arr.is_null(i)).then(|| arr.value(i).to_string())
}

fn opt_bytes(arr: &BinaryArray, i: usize) -> Option<Vec<u8>> {
    (!arr.is_null(i)).then(|| arr.value(i).to_vec())
}

fn opt_ts(arr: &TimestampNanosecondArray, i: usize) -> Option<DateTime<Utc>> {
    (!arr.is_null(i)).then(|| arr.value(i)).and_then(ts_from_nanos)
}

fn opt_iid(arr: &FixedSizeBinaryArray, i: usize) -> Option<Iid> {
    if arr.is_null(i) {
        return None;
    }
    let mut iid = [0u8; 16];
    iid.copy_from_slice(arr.value(i));
    Some(iid)
}

fn ts_from_nanos(nanos: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(nanos / 1_000_000_000, (nanos.rem_euclid(1_000_000_000)) as u32)
}
