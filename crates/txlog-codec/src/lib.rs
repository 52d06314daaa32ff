//! Tx-op envelope codec.
//!
//! Encodes and decodes the transaction-log wire envelope: a self-describing
//! Arrow IPC stream carrying a `tx-ops` list alongside `system-time`,
//! `default-tz` and an optional `user` field. See [`model::Op`] for the
//! tagged-union operation set and [`optimizer`] for the SQL→put-docs static
//! rewrite.

pub mod decode;
pub mod encode;
pub mod error;
pub mod model;
pub mod optimizer;
pub mod schema;
pub mod value;

pub use decode::{decode, decode_strict};
pub use encode::{serialize, write_ops};
pub use error::{CodecError, Result};
pub use model::{
    compute_iid, is_forbidden_table, normalize_table_name, Doc, Envelope, Field, Iid, Op, ValidTime, FORBIDDEN_TABLE_EXCEPTION,
    FORBIDDEN_TABLE_PREFIXES,
};
pub use value::Value;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_envelope() -> Envelope {
        let doc = Doc {
            iid: compute_iid("accounts", &Value::Int(1)),
            fields: vec![
                Field { name: "_id".into(), value: Value::Int(1) },
                Field { name: "balance".into(), value: Value::Float(10.5) },
            ],
        };
        Envelope {
            ops: vec![
                Op::PutDocs { table: "accounts".into(), docs: vec![doc], valid: ValidTime::default() },
                Op::Sql { query: "SELECT 1".into(), args: None },
                Op::Call { fn_iid: [9u8; 16], args: vec![1, 2, 3] },
                Op::Abort,
            ],
            system_time: Some(Utc::now()),
            default_tz: chrono_tz::UTC,
            user: Some("alice".into()),
        }
    }

    #[test]
    fn roundtrips_a_mixed_envelope() {
        let envelope = sample_envelope();
        let bytes = serialize(&envelope).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.ops.len(), envelope.ops.len());
        assert_eq!(decoded.default_tz, envelope.default_tz);
        assert_eq!(decoded.user, envelope.user);
        match (&decoded.ops[0], &envelope.ops[0]) {
            (Op::PutDocs { table: t1, docs: d1, .. }, Op::PutDocs { table: t2, docs: d2, .. }) => {
                assert_eq!(t1, t2);
                assert_eq!(d1, d2);
            }
            _ => panic!("expected put-docs in position 0"),
        }
    }

    #[test]
    fn unknown_variant_round_trips_as_unknown() {
        let bytes = serialize(&Envelope {
            ops: vec![Op::Unknown { tag: "future-op".into(), raw: vec![0xAB, 0xCD] }],
            system_time: None,
            default_tz: chrono_tz::UTC,
            user: None,
        })
        .unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.ops, vec![Op::Unknown { tag: "future-op".into(), raw: vec![0xAB, 0xCD] }]);

        let err = decode_strict(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::UnknownOpVariant { .. }));
    }

    #[test]
    fn forbidden_table_name_is_rejected_by_normalize_check() {
        assert!(is_forbidden_table(&normalize_table_name("XT/tables")));
        assert!(is_forbidden_table(&normalize_table_name("Information_Schema/x")));
        assert!(is_forbidden_table(&normalize_table_name("pg_catalog/pg_type")));
        assert!(!is_forbidden_table(&normalize_table_name("xt/tx_fns")));
        assert!(!is_forbidden_table(&normalize_table_name("accounts")));
    }

    #[test]
    fn serialize_rejects_put_docs_on_a_forbidden_table() {
        let envelope = Envelope {
            ops: vec![Op::PutDocs {
                table: "information_schema/x".into(),
                docs: vec![Doc {
                    iid: compute_iid("information_schema/x", &Value::Int(1)),
                    fields: vec![Field { name: "_id".into(), value: Value::Int(1) }],
                }],
                valid: ValidTime::default(),
            }],
            system_time: None,
            default_tz: chrono_tz::UTC,
            user: None,
        };
        let err = serialize(&envelope).unwrap_err();
        assert!(matches!(err, CodecError::ForbiddenTable { .. }));
    }

    #[test]
    fn serialize_rejects_a_doc_missing_id() {
        let envelope = Envelope {
            ops: vec![Op::PutDocs {
                table: "accounts".into(),
                docs: vec![Doc { iid: [0u8; 16], fields: vec![Field { name: "balance".into(), value: Value::Float(1.0) }] }],
                valid: ValidTime::default(),
            }],
            system_time: None,
            default_tz: chrono_tz::UTC,
            user: None,
        };
        let err = serialize(&envelope).unwrap_err();
        assert!(matches!(err, CodecError::MissingId { .. }));
    }

    #[test]
    fn serialize_rejects_valid_to_before_valid_from() {
        let doc = Doc { iid: compute_iid("accounts", &Value::Int(1)), fields: vec![Field { name: "_id".into(), value: Value::Int(1) }] };
        let envelope = Envelope {
            ops: vec![Op::PutDocs {
                table: "accounts".into(),
                docs: vec![doc],
                valid: ValidTime {
                    valid_from: Some(Utc::now()),
                    valid_to: Some(Utc::now() - chrono::Duration::seconds(1)),
                },
            }],
            system_time: None,
            default_tz: chrono_tz::UTC,
            user: None,
        };
        let err = serialize(&envelope).unwrap_err();
        assert!(matches!(err, CodecError::InvalidValidTimeRange { .. }));
    }
}
