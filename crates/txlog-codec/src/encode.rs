use std::sync::Arc;

use arrow::array::{
    ArrayRef, BinaryArray, FixedSizeBinaryArray, ListArray, RecordBatch, StringArray, StructArray, TimestampNanosecondArray,
};
use arrow::buffer::{NullBuffer, OffsetBuffer};
use arrow::datatypes::{DataType, Schema};
use arrow::ipc::writer::StreamWriter;

use crate::error::{CodecError, Result};
use crate::model::{compute_iid, is_forbidden_table, normalize_table_name, Doc, Envelope, Field as DocField, Iid, Op, ValidTime};
use crate::schema::{self, envelope_schema};

/// Serialize a complete [`Envelope`] to a self-describing Arrow IPC stream
/// (a single-row record batch, schema embedded in the stream header).
///
/// Every doc/delete/erase op is validated before any Arrow array is built:
/// a forbidden table, a put/patch doc missing `_id`, or `valid-to` preceding
/// `valid-from` all fail the whole batch with no partial encoding emitted.
pub fn serialize(envelope: &Envelope) -> Result<Vec<u8>> {
    let ops = validate_and_prepare_ops(&envelope.ops)?;
    let schema = envelope_schema();
    let batch = build_batch(&schema, envelope, &ops)?;
    let mut out = Vec::new();
    {
        let mut writer = StreamWriter::try_new(&mut out, &schema)?;
        writer.write(&batch)?;
        writer.finish()?;
    }
    Ok(out)
}

/// Validate every doc/delete/erase op and fill in each put/patch doc's iid
/// from its `_id` field, rather than trusting a caller-supplied one. Returns
/// the first violation found; nothing downstream runs on a rejected batch.
fn validate_and_prepare_ops(ops: &[Op]) -> Result<Vec<Op>> {
    ops.iter().map(validate_and_prepare_op).collect()
}

fn validate_and_prepare_op(op: &Op) -> Result<Op> {
    match op {
        Op::PutDocs { table, docs, valid } => {
            check_table_allowed(table)?;
            check_valid_range(op.variant_tag(), table, valid)?;
            let docs = docs.iter().map(|d| prepare_doc(table, d)).collect::<Result<Vec<_>>>()?;
            Ok(Op::PutDocs { table: table.clone(), docs, valid: *valid })
        }
        Op::PatchDocs { table, docs, valid } => {
            check_table_allowed(table)?;
            check_valid_range(op.variant_tag(), table, valid)?;
            let docs = docs.iter().map(|d| prepare_doc(table, d)).collect::<Result<Vec<_>>>()?;
            Ok(Op::PatchDocs { table: table.clone(), docs, valid: *valid })
        }
        Op::DeleteDocs { table, valid, .. } => {
            check_table_allowed(table)?;
            check_valid_range(op.variant_tag(), table, valid)?;
            Ok(op.clone())
        }
        Op::EraseDocs { table, .. } => {
            check_table_allowed(table)?;
            Ok(op.clone())
        }
        Op::Sql { .. } | Op::Xtql { .. } | Op::Call { .. } | Op::Abort | Op::Unknown { .. } => Ok(op.clone()),
    }
}

fn check_table_allowed(table: &str) -> Result<()> {
    if is_forbidden_table(&normalize_table_name(table)) {
        return Err(CodecError::ForbiddenTable { table: table.to_string() });
    }
    Ok(())
}

fn check_valid_range(variant: &'static str, table: &str, valid: &ValidTime) -> Result<()> {
    if let (Some(from), Some(to)) = (valid.valid_from, valid.valid_to) {
        if from > to {
            return Err(CodecError::InvalidValidTimeRange { variant, table: table.to_string() });
        }
    }
    Ok(())
}

/// Locate `doc`'s `_id` field and recompute its iid from `table` + `_id`,
/// rejecting a doc with no `_id` field rather than silently encoding one.
fn prepare_doc(table: &str, doc: &Doc) -> Result<Doc> {
    let id = doc.id_value().cloned().ok_or_else(|| CodecError::MissingId { table: table.to_string() })?;
    Ok(Doc {
        iid: compute_iid(table, &id),
        fields: doc.fields.clone(),
    })
}

/// Flatten and encode just the `tx-ops` list, convenience entry point used by
/// the SQL-rewrite optimizer, which only ever produces `put-docs` ops.
pub fn write_ops(ops: &[Op], system_time: Option<chrono::DateTime<chrono::Utc>>, default_tz: chrono_tz::Tz, user: Option<String>) -> Result<Vec<u8>> {
    serialize(&Envelope {
        ops: ops.to_vec(),
        system_time,
        default_tz,
        user,
    })
}

fn build_batch(schema: &Schema, envelope: &Envelope, ops: &[Op]) -> Result<RecordBatch> {
    let system_time = TimestampNanosecondArray::from(vec![envelope.system_time.and_then(|t| t.timestamp_nanos_opt())])
        .with_timezone_opt(Some("UTC".to_string()));
    let default_tz = StringArray::from(vec![envelope.default_tz.to_string()]);
    let user = StringArray::from(vec![envelope.user.clone()]);

    let ops_array = build_ops_array(ops)?;
    let tx_ops_field = match schema.field_with_name("tx_ops")?.data_type() {
        DataType::List(f) => f.clone(),
        _ => unreachable!("tx_ops field is always a list"),
    };
    let tx_ops = ListArray::new(tx_ops_field, OffsetBuffer::new(vec![0, ops.len() as i32].into()), Arc::new(ops_array), None);

    RecordBatch::try_new(
        Arc::new(schema.clone()),
        vec![Arc::new(system_time), Arc::new(default_tz), Arc::new(user), Arc::new(tx_ops)],
    )
    .map_err(CodecError::from)
}

fn build_ops_array(ops: &[Op]) -> Result<StructArray> {
    let fields = schema::op_struct_fields();

    let mut variant = Vec::with_capacity(ops.len());
    let mut table: Vec<Option<String>> = Vec::with_capacity(ops.len());
    let mut query: Vec<Option<String>> = Vec::with_capacity(ops.len());
    let mut sql_args: Vec<Option<Vec<u8>>> = Vec::with_capacity(ops.len());
    let mut xtql_op: Vec<Option<Vec<u8>>> = Vec::with_capacity(ops.len());
    let mut xtql_args: Vec<Option<Vec<u8>>> = Vec::with_capacity(ops.len());
    let mut fn_iid: Vec<Option<Iid>> = Vec::with_capacity(ops.len());
    let mut call_args: Vec<Option<Vec<u8>>> = Vec::with_capacity(ops.len());
    let mut valid_from: Vec<Option<i64>> = Vec::with_capacity(ops.len());
    let mut valid_to: Vec<Option<i64>> = Vec::with_capacity(ops.len());
    let mut unknown_tag: Vec<Option<String>> = Vec::with_capacity(ops.len());
    let mut unknown_raw: Vec<Option<Vec<u8>>> = Vec::with_capacity(ops.len());

    let mut docs_offsets: Vec<i32> = vec![0];
    let mut docs_validity: Vec<bool> = Vec::with_capacity(ops.len());
    let mut all_docs: Vec<&Doc> = Vec::new();

    let mut iids_offsets: Vec<i32> = vec![0];
    let mut iids_validity: Vec<bool> = Vec::with_capacity(ops.len());
    let mut all_iids: Vec<Iid> = Vec::new();

    for op in ops {
        variant.push(op.variant_tag().to_string());
        table.push(op.table().map(str::to_string));

        let mut docs_for_op: &[Doc] = &[];
        let mut iids_for_op: &[Iid] = &[];
        let mut valid = ValidTime::default();

        match op {
            Op::Sql { query: q, args } => {
                query.push(Some(q.clone()));
                sql_args.push(args.clone());
                xtql_op.push(None);
                xtql_args.push(None);
            }
            Op::Xtql { op: form, args } => {
                query.push(None);
                sql_args.push(None);
                xtql_op.push(Some(form.clone()));
                xtql_args.push(args.clone());
            }
            Op::PutDocs { docs, valid: v, .. } | Op::PatchDocs { docs, valid: v, .. } => {
                query.push(None);
                sql_args.push(None);
                xtql_op.push(None);
                xtql_args.push(None);
                docs_for_op = docs;
                valid = *v;
            }
            Op::DeleteDocs { iids, valid: v, .. } => {
                query.push(None);
                sql_args.push(None);
                xtql_op.push(None);
                xtql_args.push(None);
                iids_for_op = iids;
                valid = *v;
            }
            Op::EraseDocs { iids, .. } => {
                query.push(None);
                sql_args.push(None);
                xtql_op.push(None);
                xtql_args.push(None);
                iids_for_op = iids;
            }
            Op::Call { .. } | Op::Abort | Op::Unknown { .. } => {
                query.push(None);
                sql_args.push(None);
                xtql_op.push(None);
                xtql_args.push(None);
            }
        }

        match op {
            Op::Call { fn_iid: f, args } => {
                fn_iid.push(Some(*f));
                call_args.push(Some(args.clone()));
            }
            _ => {
                fn_iid.push(None);
                call_args.push(None);
            }
        }

        match op {
            Op::Unknown { tag, raw } => {
                unknown_tag.push(Some(tag.clone()));
                unknown_raw.push(Some(raw.clone()));
            }
            _ => {
                unknown_tag.push(None);
                unknown_raw.push(None);
            }
        }

        valid_from.push(valid.valid_from.and_then(|t| t.timestamp_nanos_opt()));
        valid_to.push(valid.valid_to.and_then(|t| t.timestamp_nanos_opt()));

        docs_validity.push(!docs_for_op.is_empty() || matches!(op, Op::PutDocs { .. } | Op::PatchDocs { .. }));
        all_docs.extend(docs_for_op.iter());
        docs_offsets.push(all_docs.len() as i32);

        iids_validity.push(!iids_for_op.is_empty() || matches!(op, Op::DeleteDocs { .. } | Op::EraseDocs { .. }));
        all_iids.extend_from_slice(iids_for_op);
        iids_offsets.push(all_iids.len() as i32);
    }

    let docs_struct = build_docs_array(&all_docs)?;
    let docs_field = match fields[6].data_type() {
        DataType::List(f) => f.clone(),
        _ => unreachable!(),
    };
    let docs_array = ListArray::new(
        docs_field,
        OffsetBuffer::new(docs_offsets.into()),
        Arc::new(docs_struct),
        Some(NullBuffer::from(docs_validity)),
    );

    let iids_values = FixedSizeBinaryArray::try_from_sparse_iter_with_size(all_iids.iter().map(|i| Some(i.as_slice())), schema::IID_BYTE_WIDTH)?;
    let iids_field = match fields[7].data_type() {
        DataType::List(f) => f.clone(),
        _ => unreachable!(),
    };
    let iids_array = ListArray::new(
        iids_field,
        OffsetBuffer::new(iids_offsets.into()),
        Arc::new(iids_values),
        Some(NullBuffer::from(iids_validity)),
    );

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(variant)),
        Arc::new(StringArray::from(table)),
        Arc::new(StringArray::from(query)),
        Arc::new(BinaryArray::from(sql_args.iter().map(|o| o.as_deref()).collect::<Vec<_>>())),
        Arc::new(BinaryArray::from(xtql_op.iter().map(|o| o.as_deref()).collect::<Vec<_>>())),
        Arc::new(BinaryArray::from(xtql_args.iter().map(|o| o.as_deref()).collect::<Vec<_>>())),
        Arc::new(docs_array),
        Arc::new(iids_array),
        Arc::new(FixedSizeBinaryArray::try_from_sparse_iter_with_size(
            fn_iid.iter().map(|o| o.as_ref().map(|i| i.as_slice())),
            schema::IID_BYTE_WIDTH,
        )?),
        Arc::new(BinaryArray::from(call_args.iter().map(|o| o.as_deref()).collect::<Vec<_>>())),
        Arc::new(TimestampNanosecondArray::from(valid_from).with_timezone_opt(Some("UTC".to_string()))),
        Arc::new(TimestampNanosecondArray::from(valid_to).with_timezone_opt(Some("UTC".to_string()))),
        Arc::new(StringArray::from(unknown_tag)),
        Arc::new(BinaryArray::from(unknown_raw.iter().map(|o| o.as_deref()).collect::<Vec<_>>())),
    ];

    Ok(StructArray::new(fields, columns, None))
}

fn build_docs_array(docs: &[&Doc]) -> Result<StructArray> {
    let fields = schema::doc_struct_fields();

    let iid_array = FixedSizeBinaryArray::try_from_sparse_iter_with_size(docs.iter().map(|d| Some(d.iid.as_slice())), schema::IID_BYTE_WIDTH)?;

    let mut fields_offsets: Vec<i32> = vec![0];
    let mut all_fields: Vec<&DocField> = Vec::new();
    for doc in docs {
        all_fields.extend(doc.fields.iter());
        fields_offsets.push(all_fields.len() as i32);
    }

    let fields_struct = build_fields_array(&all_fields);
    let fields_field = match fields[1].data_type() {
        DataType::List(f) => f.clone(),
        _ => unreachable!(),
    };
    let fields_array = ListArray::new(fields_field, OffsetBuffer::new(fields_offsets.into()), Arc::new(fields_struct), None);

    Ok(StructArray::new(fields, vec![Arc::new(iid_array), Arc::new(fields_array)], None))
}

fn build_fields_array(fields_in: &[&DocField]) -> StructArray {
    let fields = schema::field_struct_fields();
    let names: Vec<&str> = fields_in.iter().map(|f| f.name.as_str()).collect();
    let mut values: Vec<u8> = Vec::new();
    let mut value_offsets: Vec<Option<Vec<u8>>> = Vec::with_capacity(fields_in.len());
    for f in fields_in {
        values.clear();
        f.value.encode(&mut values);
        value_offsets.push(Some(values.clone()));
    }
    let name_array = StringArray::from(names);
    let value_array = BinaryArray::from(value_offsets.iter().map(|o| o.as_deref()).collect::<Vec<_>>());
    StructArray::new(fields, vec![Arc::new(name_array), Arc::new(value_array)], None)
}
