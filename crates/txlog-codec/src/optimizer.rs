//! Static SQL → put-docs rewrite.
//!
//! SQL ops are offered to this optimizer before being written to the log.
//! Only the narrow shape `INSERT INTO <table> (<cols...>) VALUES (?, ?, ...)`
//! is recognized; anything else is left as a plain `sql` op. Recognizing more
//! shapes (multi-statement, ON CONFLICT, subqueries) is out of scope here —
//! those still round-trip correctly as opaque `sql` ops, just without the
//! path-specialized indexing this rewrite buys.

use crate::model::{compute_iid, normalize_table_name, Doc, Field, Op, ValidTime};
use crate::value::Value;

use crate::error::{CodecError, Result};

/// Attempt to rewrite a `sql("INSERT INTO ...", args)` op into one
/// `put-docs` op per argument row.
///
/// Returns `None` when `query` is not a recognized single-table INSERT
/// shape; the caller should then keep the op as a plain `sql` op. Returns
/// `Err` when the shape is recognized but the arguments are malformed
/// (arity mismatch, missing `_id`).
pub fn try_rewrite_insert(query: &str, args: &[Vec<Value>]) -> Option<Result<Op>> {
    let (table, columns) = parse_insert_into(query)?;

    for row in args {
        if row.len() != columns.len() {
            return Some(Err(CodecError::ArgRowArityMismatch {
                variant: "sql->put-docs",
                table: table.clone(),
                arg_count: columns.len(),
                row_count: row.len(),
            }));
        }
    }

    let table = normalize_table_name(&table);
    if crate::model::is_forbidden_table(&table) {
        return Some(Err(CodecError::ForbiddenTable { table }));
    }

    let mut docs = Vec::with_capacity(args.len());
    for row in args {
        let fields: Vec<Field> = columns
            .iter()
            .cloned()
            .zip(row.iter().cloned())
            .map(|(name, value)| Field { name, value })
            .collect();
        let doc = Doc { iid: [0u8; 16], fields };
        let id = doc.id_value().cloned();
        let Some(id) = id else {
            return Some(Err(CodecError::MissingId { table }));
        };
        let iid = compute_iid(&table, &id);
        docs.push(Doc { iid, ..doc });
    }

    Some(Ok(Op::PutDocs {
        table,
        docs,
        valid: ValidTime::default(),
    }))
}

/// Recognize `INSERT INTO <table> (<col>, ...) VALUES (?, ?, ...)`, ignoring
/// case and surrounding whitespace. Returns the table name and column list.
fn parse_insert_into(query: &str) -> Option<(String, Vec<String>)> {
    let trimmed = query.trim();
    let lower = trimmed.to_ascii_lowercase();
    if !lower.starts_with("insert into ") {
        return None;
    }
    let rest = &trimmed[12..];
    let open = rest.find('(')?;
    let table = rest[..open].trim().to_string();
    if table.is_empty() || table.contains(char::is_whitespace) {
        return None;
    }
    let close = rest[open..].find(')')? + open;
    let columns: Vec<String> = rest[open + 1..close].split(',').map(|c| c.trim().to_string()).filter(|c| !c.is_empty()).collect();
    if columns.is_empty() {
        return None;
    }

    let values_start = rest[close..].to_ascii_lowercase().find("values")? + close;
    let placeholders_open = rest[values_start..].find('(')? + values_start;
    let placeholders_close = rest[placeholders_open..].find(')')? + placeholders_open;
    let placeholder_count = rest[placeholders_open + 1..placeholders_close].split(',').filter(|s| !s.trim().is_empty()).count();
    if placeholder_count != columns.len() {
        return None;
    }

    Some((table, columns))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_simple_insert() {
        let rows = vec![vec![Value::Int(1), Value::Str("x".into())], vec![Value::Int(2), Value::Str("y".into())]];
        let op = try_rewrite_insert("INSERT INTO t (_id, v) VALUES (?, ?)", &rows).unwrap().unwrap();
        match op {
            Op::PutDocs { table, docs, .. } => {
                assert_eq!(table, "t");
                assert_eq!(docs.len(), 2);
            }
            _ => panic!("expected put-docs"),
        }
    }

    #[test]
    fn arity_mismatch_is_rejected() {
        let rows = vec![vec![Value::Int(1), Value::Int(2)], vec![Value::Int(3)]];
        let err = try_rewrite_insert("INSERT INTO t (_id, v) VALUES (?, ?)", &rows);
        assert!(matches!(err, Some(Err(CodecError::ArgRowArityMismatch { .. }))));
    }

    #[test]
    fn non_insert_statements_are_not_rewritten() {
        assert!(try_rewrite_insert("SELECT * FROM t", &[]).is_none());
    }

    #[test]
    fn missing_id_column_is_rejected() {
        let rows = vec![vec![Value::Str("x".into())]];
        let err = try_rewrite_insert("INSERT INTO t (v) VALUES (?)", &rows);
        assert!(matches!(err, Some(Err(CodecError::MissingId { .. }))));
    }
}
