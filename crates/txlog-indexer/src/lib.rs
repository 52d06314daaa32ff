//! Drives an external indexer from the transaction log: the flush-timeout
//! state machine (C4), the sequential per-record dispatcher (C5), and the
//! await/watch registry (C6) that callers use to wait for a submitted
//! transaction to be durably applied.

pub mod collaborators;
pub mod flusher;
pub mod processor;
pub mod registry;

pub use collaborators::{AppliedTx, Indexer, IndexerError, TrieCatalog};
pub use flusher::{FlushChunk, Flusher};
pub use processor::Processor;
pub use registry::WatchRegistry;
