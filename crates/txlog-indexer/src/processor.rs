use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info_span, Instrument};
use txlog_core::{Log, Record, RecordKind};
use txlog_subscription::{Subscriber, SubscriberError};

use crate::collaborators::{AppliedTx, Indexer, IndexerError, TrieCatalog};
use crate::flusher::{FlushChunk, Flusher, TriesAdded};
use crate::registry::WatchRegistry;

/// Drives an [`Indexer`] from the log, one record at a time, in the strict
/// order delivered by `txlog-subscription`.
///
/// Each record is processed sequentially: there is no internal parallelism,
/// since the indexer's own state (current chunk, completed tx id) is only
/// well-defined between records. A processing failure does not stop the
/// offset from advancing in the [`WatchRegistry`] — it is recorded as the
/// result for that offset, and the registry's sticky-error semantics halt
/// any further progress observed by awaiters.
pub struct Processor<I, T> {
    log: Arc<dyn Log>,
    indexer: Arc<I>,
    trie_catalog: Arc<T>,
    flusher: tokio::sync::Mutex<Flusher>,
    registry: Arc<WatchRegistry>,
}

impl<I, T> Processor<I, T>
where
    I: Indexer + 'static,
    T: TrieCatalog + 'static,
{
    pub fn new(log: Arc<dyn Log>, indexer: Arc<I>, trie_catalog: Arc<T>, flush_timeout: Duration, registry: Arc<WatchRegistry>) -> Self {
        Self {
            log,
            indexer,
            trie_catalog,
            flusher: tokio::sync::Mutex::new(Flusher::new(flush_timeout, Arc::new(txlog_core::SystemInstantSource))),
            registry,
        }
    }

    async fn maybe_flush(&self, current_chunk_tx_id: i64) {
        let maybe_chunk = {
            let mut flusher = self.flusher.lock().await;
            flusher.check(current_chunk_tx_id, self.indexer.latest_completed_tx())
        };
        if let Some(chunk) = maybe_chunk {
            if let Err(err) = self.log.append_message(RecordKind::FlushChunk, chunk.encode()).await {
                error!(%err, "failed to append flush-chunk control record");
            }
        }
    }

    /// Process one record. The offset always advances in the registry, even
    /// on failure: a malformed frame or a failing indexer call is recorded
    /// as that offset's result, never silently skipped.
    async fn process_one(&self, record: Record) -> Result<(), IndexerError> {
        let span = info_span!("process_record", offset = record.offset, kind = ?record.kind);
        let result = self.process_one_inner(&record).instrument(span).await;
        self.report(record.offset, result.clone()).await;
        result.map(|_| ())
    }

    async fn process_one_inner(&self, record: &Record) -> Result<AppliedTx, IndexerError> {
        match record.kind {
            RecordKind::Tx => {
                let envelope = txlog_codec::decode(&record.payload).map_err(|e| IndexerError(e.to_string()))?;
                let current_chunk_tx_id = record.offset as i64;
                self.maybe_flush(current_chunk_tx_id).await;
                let ts = envelope.system_time;
                self.indexer.index_tx(record.offset, ts, envelope).await
            }
            RecordKind::FlushChunk => {
                let chunk = FlushChunk::decode(&record.payload).ok_or_else(|| IndexerError("malformed flush-chunk record".into()))?;
                self.indexer.force_flush(chunk).await?;
                Ok(AppliedTx { tx_id: chunk.expected_prev_chunk_tx_id, offset: record.offset })
            }
            RecordKind::TriesAdded => {
                let payload =
                    TriesAdded::decode(&record.payload).ok_or_else(|| IndexerError("malformed tries-added record".into()))?;
                for (table, key) in &payload.entries {
                    self.trie_catalog.add_trie(table, key).await?;
                }
                Ok(AppliedTx { tx_id: record.offset as i64, offset: record.offset })
            }
        }
    }

    async fn report(&self, offset: u64, result: Result<AppliedTx, IndexerError>) {
        if let Err(err) = &result {
            error!(offset, %err, "indexer reported an error for this offset");
        }
        self.registry.notify(offset, result);
    }

    /// Append a `TriesAdded` control record so the catalog update is
    /// durable and replayed through the normal dispatch path on recovery,
    /// rather than applied directly and potentially lost on a crash between
    /// the direct call and the next checkpoint.
    pub async fn append_tries_added(&self, entries: Vec<(String, String)>) -> Result<(), IndexerError> {
        let payload = TriesAdded { entries };
        self.log
            .append_message(RecordKind::TriesAdded, payload.encode())
            .await
            .map(|_| ())
            .map_err(|e| IndexerError(e.to_string()))
    }
}

#[async_trait]
impl<I, T> Subscriber for Processor<I, T>
where
    I: Indexer + 'static,
    T: TrieCatalog + 'static,
{
    fn name(&self) -> &str {
        "indexer-driver"
    }

    async fn deliver(&self, record: Record) -> Result<(), SubscriberError> {
        self.process_one(record).await.map_err(|e| SubscriberError(e.to_string()))
    }
}
