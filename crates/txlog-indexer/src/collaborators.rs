use async_trait::async_trait;
use chrono::{DateTime, Utc};
use txlog_codec::Envelope;

use crate::flusher::FlushChunk;

/// Descriptor returned by a successful [`Indexer::index_tx`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedTx {
    pub tx_id: i64,
    pub offset: u64,
}

/// The indexing engine this pipeline drives. Implemented outside this crate
/// (e.g. by the bitemporal storage engine); the log processor only ever
/// calls it, never implements it.
#[async_trait]
pub trait Indexer: Send + Sync {
    async fn index_tx(&self, offset: u64, ts: Option<DateTime<Utc>>, batch: Envelope) -> Result<AppliedTx, IndexerError>;
    async fn force_flush(&self, chunk: FlushChunk) -> Result<(), IndexerError>;
    fn latest_completed_tx(&self) -> Option<i64>;
    fn latest_completed_chunk_tx(&self) -> Option<i64>;
    fn indexer_error(&self) -> Option<IndexerError>;
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("indexer error: {0}")]
pub struct IndexerError(pub String);

/// The trie/structural catalog the pipeline notifies about newly created
/// tries, e.g. in response to a `TriesAdded` control record.
#[async_trait]
pub trait TrieCatalog: Send + Sync {
    async fn add_trie(&self, table: &str, key: &str) -> Result<(), IndexerError>;
}
