use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::Result;
use crate::instant::{InstantSource, SystemInstantSource};
use crate::record::{Record, RecordKind};
use crate::Log;

struct Entry {
    record: Record,
    #[allow(dead_code)] // retained for tests that want to assert on append timing
    appended_at: std::time::Instant,
}

/// An in-memory, bounded-ring log backend.
///
/// Oldest records are evicted once `capacity` is exceeded; this is fine for
/// its intended use (tests, ephemeral single-process deployments) where
/// subscribers are expected to keep up, but it means `read_records` for an
/// offset older than the retained window silently returns fewer records
/// than requested rather than erroring.
pub struct MemoryLog {
    capacity: usize,
    entries: Mutex<VecDeque<Entry>>,
    next_offset: AtomicU64,
    notify: Arc<Notify>,
    clock: Arc<dyn InstantSource>,
}

impl MemoryLog {
    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, Arc::new(SystemInstantSource))
    }

    pub fn with_clock(capacity: usize, clock: Arc<dyn InstantSource>) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            next_offset: AtomicU64::new(0),
            notify: Arc::new(Notify::new()),
            clock,
        }
    }

    fn append(&self, kind: RecordKind, payload: Vec<u8>) -> u64 {
        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        let record = Record { offset, kind, payload };
        let appended_at = self.clock.now();
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(Entry { record, appended_at });
        drop(entries);
        self.notify.notify_waiters();
        offset
    }
}

#[async_trait]
impl Log for MemoryLog {
    async fn append_tx(&self, bytes: Vec<u8>) -> Result<u64> {
        Ok(self.append(RecordKind::Tx, bytes))
    }

    async fn append_message(&self, kind: RecordKind, bytes: Vec<u8>) -> Result<u64> {
        Ok(self.append(kind, bytes))
    }

    fn read_records(&self, after_offset: Option<u64>, max: usize) -> Result<Vec<Record>> {
        let entries = self.entries.lock();
        let start = after_offset.map(|o| o + 1).unwrap_or(0);
        Ok(entries
            .iter()
            .filter(|e| e.record.offset >= start)
            .take(max)
            .map(|e| e.record.clone())
            .collect())
    }

    fn latest_submitted_offset(&self) -> Option<u64> {
        let next = self.next_offset.load(Ordering::SeqCst);
        (next > 0).then(|| next - 1)
    }

    fn notify_handle(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}
