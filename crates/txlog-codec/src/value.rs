//! A small tagged-byte encoding for document field values.
//!
//! Documents are schemaless at the codec layer: the tx-op codec does not know
//! a table's column types, so each field value is carried as an opaque,
//! self-describing byte blob rather than as a native Arrow column. This
//! mirrors how `sql` arguments and `xtql` op forms are already carried as
//! opaque blobs in the envelope; `Value` just gives the put/patch-docs path
//! the same treatment for field values.

use chrono::{DateTime, Utc};

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_TIMESTAMP: u8 = 6;
const TAG_UUID: u8 = 7;
const TAG_LIST: u8 = 8;

/// A document field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Uuid([u8; 16]),
    List(Vec<Value>),
}

impl Value {
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Value::Null => out.push(TAG_NULL),
            Value::Bool(b) => {
                out.push(TAG_BOOL);
                out.push(*b as u8);
            }
            Value::Int(i) => {
                out.push(TAG_INT);
                out.extend_from_slice(&i.to_le_bytes());
            }
            Value::Float(f) => {
                out.push(TAG_FLOAT);
                out.extend_from_slice(&f.to_le_bytes());
            }
            Value::Str(s) => {
                out.push(TAG_STR);
                out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Value::Bytes(b) => {
                out.push(TAG_BYTES);
                out.extend_from_slice(&(b.len() as u32).to_le_bytes());
                out.extend_from_slice(b);
            }
            Value::Timestamp(ts) => {
                out.push(TAG_TIMESTAMP);
                out.extend_from_slice(&ts.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
            }
            Value::Uuid(u) => {
                out.push(TAG_UUID);
                out.extend_from_slice(u);
            }
            Value::List(items) => {
                out.push(TAG_LIST);
                out.extend_from_slice(&(items.len() as u32).to_le_bytes());
                for item in items {
                    item.encode(out);
                }
            }
        }
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let (&tag, rest) = buf.split_first().ok_or(DecodeError::Eof)?;
        match tag {
            TAG_NULL => Ok((Value::Null, rest)),
            TAG_BOOL => {
                let (&b, rest) = rest.split_first().ok_or(DecodeError::Eof)?;
                Ok((Value::Bool(b != 0), rest))
            }
            TAG_INT => {
                let (head, rest) = take(rest, 8)?;
                Ok((Value::Int(i64::from_le_bytes(head.try_into().unwrap())), rest))
            }
            TAG_FLOAT => {
                let (head, rest) = take(rest, 8)?;
                Ok((Value::Float(f64::from_le_bytes(head.try_into().unwrap())), rest))
            }
            TAG_STR => {
                let (len, rest) = take_u32(rest)?;
                let (head, rest) = take(rest, len as usize)?;
                let s = String::from_utf8(head.to_vec()).map_err(|_| DecodeError::InvalidUtf8)?;
                Ok((Value::Str(s), rest))
            }
            TAG_BYTES => {
                let (len, rest) = take_u32(rest)?;
                let (head, rest) = take(rest, len as usize)?;
                Ok((Value::Bytes(head.to_vec()), rest))
            }
            TAG_TIMESTAMP => {
                let (head, rest) = take(rest, 8)?;
                let nanos = i64::from_le_bytes(head.try_into().unwrap());
                let ts = DateTime::<Utc>::from_timestamp(nanos / 1_000_000_000, (nanos % 1_000_000_000) as u32)
                    .ok_or(DecodeError::InvalidTimestamp)?;
                Ok((Value::Timestamp(ts), rest))
            }
            TAG_UUID => {
                let (head, rest) = take(rest, 16)?;
                let mut u = [0u8; 16];
                u.copy_from_slice(head);
                Ok((Value::Uuid(u), rest))
            }
            TAG_LIST => {
                let (len, mut rest) = take_u32(rest)?;
                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    let (item, tail) = Value::decode(rest)?;
                    items.push(item);
                    rest = tail;
                }
                Ok((Value::List(items), rest))
            }
            other => Err(DecodeError::UnknownTag(other)),
        }
    }
}

fn take(buf: &[u8], n: usize) -> Result<(&[u8], &[u8]), DecodeError> {
    if buf.len() < n {
        return Err(DecodeError::Eof);
    }
    Ok(buf.split_at(n))
}

fn take_u32(buf: &[u8]) -> Result<(u32, &[u8]), DecodeError> {
    let (head, rest) = take(buf, 4)?;
    Ok((u32::from_le_bytes(head.try_into().unwrap()), rest))
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of value buffer")]
    Eof,
    #[error("value string is not valid utf-8")]
    InvalidUtf8,
    #[error("value timestamp is out of range")]
    InvalidTimestamp,
    #[error("unknown value tag {0}")]
    UnknownTag(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: Value) {
        let mut buf = Vec::new();
        v.encode(&mut buf);
        let (decoded, rest) = Value::decode(&buf).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, v);
    }

    #[test]
    fn roundtrips_all_variants() {
        roundtrip(Value::Null);
        roundtrip(Value::Bool(true));
        roundtrip(Value::Int(-42));
        roundtrip(Value::Float(1.5));
        roundtrip(Value::Str("hello".into()));
        roundtrip(Value::Bytes(vec![1, 2, 3]));
        roundtrip(Value::Uuid([7u8; 16]));
        roundtrip(Value::List(vec![Value::Int(1), Value::Str("x".into())]));
    }
}
