//! Append-only, totally-ordered transaction log.
//!
//! [`Log`] is the abstraction the rest of the pipeline is built against.
//! Two reference backends are provided: [`memory::MemoryLog`] for tests and
//! single-process deployments, and [`local::LocalLog`] for a durable
//! single-file-per-log store on disk. Both assign monotonically increasing,
//! dense offsets at append time and notify subscribers via a shared
//! [`tokio::sync::Notify`] so `txlog-subscription` can implement a
//! push-based dispatcher without polling.

pub mod error;
pub mod instant;
pub mod local;
pub mod memory;
pub mod record;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

pub use error::{Error, Result};
pub use instant::{InstantSource, SystemInstantSource};
pub use local::{LocalLog, LocalLogOptions};
pub use memory::MemoryLog;
pub use record::{Record, RecordKind};

/// The append-only log contract shared by every backend.
///
/// Guarantees: FIFO per-log delivery order; an `append_*` future only
/// resolves once the record is durable per the backing implementation
/// (fsync'd for [`LocalLog`], committed to the ring for [`MemoryLog`]);
/// `close` is idempotent.
#[async_trait]
pub trait Log: Send + Sync {
    /// Durably append a transaction envelope, returning its assigned offset.
    async fn append_tx(&self, bytes: Vec<u8>) -> Result<u64>;

    /// Durably append a non-Tx control message (e.g. a flush-chunk marker).
    async fn append_message(&self, kind: RecordKind, bytes: Vec<u8>) -> Result<u64>;

    /// Read up to `max` records strictly after `after_offset` (or from the
    /// start, if `None`), in offset order. May return fewer than `max`,
    /// including zero, without that being an error.
    fn read_records(&self, after_offset: Option<u64>, max: usize) -> Result<Vec<Record>>;

    /// The highest offset known to the log, even if not yet delivered to any
    /// subscriber. `None` if the log is empty.
    fn latest_submitted_offset(&self) -> Option<u64>;

    /// A shared signal released once per append; used by the notifying
    /// subscription strategy in `txlog-subscription` to avoid polling.
    fn notify_handle(&self) -> Arc<Notify>;
}

#[cfg(test)]
mod shared_tests {
    use super::*;
    use crate::memory::MemoryLog;

    #[tokio::test]
    async fn offsets_are_dense_and_monotonic() {
        let log = MemoryLog::new(1024);
        let o1 = log.append_tx(b"a".to_vec()).await.unwrap();
        let o2 = log.append_tx(b"b".to_vec()).await.unwrap();
        let o3 = log.append_message(RecordKind::FlushChunk, b"c".to_vec()).await.unwrap();
        assert_eq!([o1, o2, o3], [0, 1, 2]);
        assert_eq!(log.latest_submitted_offset(), Some(2));
    }

    #[tokio::test]
    async fn read_records_respects_after_offset_and_max() {
        let log = MemoryLog::new(1024);
        for i in 0..5u8 {
            log.append_tx(vec![i]).await.unwrap();
        }
        let page = log.read_records(Some(1), 2).unwrap();
        assert_eq!(page.iter().map(|r| r.offset).collect::<Vec<_>>(), vec![2, 3]);
    }
}
