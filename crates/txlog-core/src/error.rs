use thiserror::Error;

use crate::record::FrameError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("log is closed")]
    Closed,
    #[error("failed to append record")]
    Append(#[source] std::io::Error),
    #[error("failed to read record at offset {offset}")]
    Read {
        offset: u64,
        #[source]
        source: FrameError,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
