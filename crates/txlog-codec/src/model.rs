use chrono::{DateTime, Utc};

use crate::value::Value;

/// 16-byte internal identifier derived from a table name and a document's
/// `_id` field. Stable under re-encoding: two docs with the same table and
/// `_id` always hash to the same iid.
pub type Iid = [u8; 16];

pub fn compute_iid(table: &str, id: &Value) -> Iid {
    let mut buf = Vec::new();
    buf.extend_from_slice(table.as_bytes());
    buf.push(0);
    id.encode(&mut buf);
    let hash = blake3::hash(&buf);
    let mut iid = [0u8; 16];
    iid.copy_from_slice(&hash.as_bytes()[..16]);
    iid
}

/// A single field of a document, carried as an opaque tagged value.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: Value,
}

/// A document row targeted by put-docs or patch-docs.
#[derive(Debug, Clone, PartialEq)]
pub struct Doc {
    pub iid: Iid,
    pub fields: Vec<Field>,
}

impl Doc {
    /// Look up the `_id` field's value, case-insensitively.
    pub fn id_value(&self) -> Option<&Value> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case("_id"))
            .map(|f| &f.value)
    }
}

/// Validity-time bounds attached to a bitemporal mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ValidTime {
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

/// A single transaction operation.
///
/// Corresponds to one leg of the `tx-ops` dense union described by the
/// wire envelope schema. [`Op::Unknown`] preserves forward compatibility:
/// a codec encountering a union tag it does not recognize carries the raw
/// bytes through rather than failing the whole batch (see
/// [`crate::error::CodecError::UnknownOpVariant`] for the alternative,
/// stricter path taken by [`crate::decode::decode_strict`]).
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Sql {
        query: String,
        args: Option<Vec<u8>>,
    },
    Xtql {
        op: Vec<u8>,
        args: Option<Vec<u8>>,
    },
    PutDocs {
        table: String,
        docs: Vec<Doc>,
        valid: ValidTime,
    },
    PatchDocs {
        table: String,
        docs: Vec<Doc>,
        valid: ValidTime,
    },
    DeleteDocs {
        table: String,
        iids: Vec<Iid>,
        valid: ValidTime,
    },
    EraseDocs {
        table: String,
        iids: Vec<Iid>,
    },
    Call {
        fn_iid: Iid,
        args: Vec<u8>,
    },
    Abort,
    Unknown {
        tag: String,
        raw: Vec<u8>,
    },
}

impl Op {
    pub fn variant_tag(&self) -> &'static str {
        match self {
            Op::Sql { .. } => "sql",
            Op::Xtql { .. } => "xtql",
            Op::PutDocs { .. } => "put-docs",
            Op::PatchDocs { .. } => "patch-docs",
            Op::DeleteDocs { .. } => "delete-docs",
            Op::EraseDocs { .. } => "erase-docs",
            Op::Call { .. } => "call",
            Op::Abort => "abort",
            Op::Unknown { .. } => "unknown",
        }
    }

    pub fn table(&self) -> Option<&str> {
        match self {
            Op::PutDocs { table, .. }
            | Op::PatchDocs { table, .. }
            | Op::DeleteDocs { table, .. }
            | Op::EraseDocs { table, .. } => Some(table),
            _ => None,
        }
    }
}

/// The outer tx-ops envelope decoded from, or about to be encoded into, one
/// Arrow IPC record batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub ops: Vec<Op>,
    pub system_time: Option<DateTime<Utc>>,
    pub default_tz: chrono_tz::Tz,
    pub user: Option<String>,
}

/// Table name prefixes reserved for system use; a table beginning with any
/// of these may never appear as the target of a user-submitted tx-op,
/// except for the literal carve-out below.
pub const FORBIDDEN_TABLE_PREFIXES: &[&str] = &["xt/", "information_schema/", "pg_catalog/"];

/// The one table under a forbidden prefix that user tx-ops may still target.
pub const FORBIDDEN_TABLE_EXCEPTION: &str = "xt/tx_fns";

pub fn normalize_table_name(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

pub fn is_forbidden_table(table: &str) -> bool {
    if table == FORBIDDEN_TABLE_EXCEPTION {
        return false;
    }
    FORBIDDEN_TABLE_PREFIXES.iter().any(|prefix| table.starts_with(prefix))
}
