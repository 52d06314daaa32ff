use thiserror::Error;

/// Error produced while encoding or decoding a tx-op envelope.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("put-docs/patch-docs row for table {table:?} is missing an `_id` field")]
    MissingId { table: String },

    #[error("table name {table:?} is reserved and cannot be targeted by a tx-op")]
    ForbiddenTable { table: String },

    #[error("op {variant} on table {table:?} mixes {arg_count} args with {row_count} id rows")]
    ArgRowArityMismatch {
        variant: &'static str,
        table: String,
        arg_count: usize,
        row_count: usize,
    },

    #[error("unknown op tag {tag:?} decoded without a registered variant")]
    UnknownOpVariant { tag: String },

    #[error("op {variant} on table {table:?} has valid-to before valid-from")]
    InvalidValidTimeRange { variant: &'static str, table: String },

    #[error("log format version {found} is not supported (expected <= {supported})")]
    UnsupportedFormatVersion { found: u8, supported: u8 },

    #[error("tx-ops envelope is malformed: {0}")]
    Malformed(String),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),
}

pub type Result<T> = std::result::Result<T, CodecError>;
