use std::time::{Duration, Instant};

use txlog_core::InstantSource;

/// A flush-timeout-driven state machine owned by the log processor.
///
/// Emits a `FlushChunk` message when the log has gone idle (no new chunk
/// progress) for `flush_timeout` and there is a completed transaction that
/// has not yet been flushed. This avoids a "herd" of redundant flushes: once
/// a flush has been issued for a given `latest_completed_tx_id`, further
/// calls with the same value are no-ops until real progress is observed.
pub struct Flusher {
    flush_timeout: Duration,
    last_flush_check: Instant,
    previous_chunk_tx_id: Option<i64>,
    flushed_tx_id: Option<i64>,
    clock: std::sync::Arc<dyn InstantSource>,
}

impl Flusher {
    pub fn new(flush_timeout: Duration, clock: std::sync::Arc<dyn InstantSource>) -> Self {
        let now = clock.now();
        Self {
            flush_timeout,
            last_flush_check: now,
            previous_chunk_tx_id: None,
            flushed_tx_id: None,
            clock,
        }
    }

    /// Evaluate the state machine. `current_chunk_tx_id` is the tx-id of the
    /// chunk currently being built; `latest_completed_tx_id` is the highest
    /// tx-id the indexer has fully applied.
    pub fn check(&mut self, current_chunk_tx_id: i64, latest_completed_tx_id: Option<i64>) -> Option<FlushChunk> {
        let now = self.clock.now();

        if now.duration_since(self.last_flush_check) < self.flush_timeout {
            return None;
        }

        let Some(latest_completed_tx_id) = latest_completed_tx_id else {
            return None;
        };

        if self.flushed_tx_id == Some(latest_completed_tx_id) {
            return None;
        }

        if self.previous_chunk_tx_id != Some(current_chunk_tx_id) {
            self.last_flush_check = now;
            self.previous_chunk_tx_id = Some(current_chunk_tx_id);
            return None;
        }

        self.last_flush_check = now;
        self.flushed_tx_id = Some(latest_completed_tx_id);
        Some(FlushChunk {
            expected_prev_chunk_tx_id: current_chunk_tx_id,
        })
    }
}

/// The payload of a `FlushChunk` control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushChunk {
    pub expected_prev_chunk_tx_id: i64,
}

impl FlushChunk {
    pub fn encode(&self) -> Vec<u8> {
        self.expected_prev_chunk_tx_id.to_le_bytes().to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 8] = bytes.try_into().ok()?;
        Some(Self { expected_prev_chunk_tx_id: i64::from_le_bytes(arr) })
    }
}

/// The payload of a `TriesAdded` control message: a list of `(table,
/// trie-key)` pairs the trie catalog should be notified about, in order.
///
/// Encoded as `[count:4 LE]` followed by, per entry,
/// `[table-len:2 LE][table bytes][key-len:2 LE][key bytes]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriesAdded {
    pub entries: Vec<(String, String)>,
}

impl TriesAdded {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for (table, key) in &self.entries {
            out.extend_from_slice(&(table.len() as u16).to_le_bytes());
            out.extend_from_slice(table.as_bytes());
            out.extend_from_slice(&(key.len() as u16).to_le_bytes());
            out.extend_from_slice(key.as_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let mut pos = 0usize;
        let read_u32 = |bytes: &[u8], pos: &mut usize| -> Option<u32> {
            let v = u32::from_le_bytes(bytes.get(*pos..*pos + 4)?.try_into().ok()?);
            *pos += 4;
            Some(v)
        };
        let read_u16 = |bytes: &[u8], pos: &mut usize| -> Option<u16> {
            let v = u16::from_le_bytes(bytes.get(*pos..*pos + 2)?.try_into().ok()?);
            *pos += 2;
            Some(v)
        };
        let read_str = |bytes: &[u8], pos: &mut usize, len: usize| -> Option<String> {
            let s = std::str::from_utf8(bytes.get(*pos..*pos + len)?).ok()?.to_string();
            *pos += len;
            Some(s)
        };

        let count = read_u32(bytes, &mut pos)?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let table_len = read_u16(bytes, &mut pos)? as usize;
            let table = read_str(bytes, &mut pos, table_len)?;
            let key_len = read_u16(bytes, &mut pos)? as usize;
            let key = read_str(bytes, &mut pos, key_len)?;
            entries.push((table, key));
        }
        Some(Self { entries })
    }
}

#[cfg(test)]
mod tries_added_tests {
    use super::*;

    #[test]
    fn roundtrips_entries() {
        let payload = TriesAdded {
            entries: vec![("users".into(), "k1".into()), ("orders".into(), "k2".into())],
        };
        let bytes = payload.encode();
        assert_eq!(TriesAdded::decode(&bytes), Some(payload));
    }

    #[test]
    fn roundtrips_empty() {
        let payload = TriesAdded::default();
        assert_eq!(TriesAdded::decode(&payload.encode()), Some(payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct FakeClock(Mutex<Instant>);

    impl InstantSource for FakeClock {
        fn now(&self) -> Instant {
            *self.0.lock().unwrap()
        }
    }

    impl FakeClock {
        fn advance(&self, d: Duration) {
            let mut guard = self.0.lock().unwrap();
            *guard += d;
        }
    }

    #[test]
    fn does_not_flush_before_timeout() {
        let clock = Arc::new(FakeClock(Mutex::new(Instant::now())));
        let mut flusher = Flusher::new(Duration::from_secs(5), clock.clone());
        assert_eq!(flusher.check(1, Some(1)), None);
    }

    #[test]
    fn chunk_progress_resets_the_timer_without_flushing() {
        let clock = Arc::new(FakeClock(Mutex::new(Instant::now())));
        let mut flusher = Flusher::new(Duration::from_secs(5), clock.clone());
        clock.advance(Duration::from_secs(10));
        assert_eq!(flusher.check(1, Some(1)), None);
        clock.advance(Duration::from_secs(10));
        assert_eq!(flusher.check(2, Some(1)), None);
    }

    #[test]
    fn flushes_once_idle_past_timeout_with_no_progress() {
        let clock = Arc::new(FakeClock(Mutex::new(Instant::now())));
        let mut flusher = Flusher::new(Duration::from_secs(5), clock.clone());
        clock.advance(Duration::from_secs(10));
        assert_eq!(flusher.check(1, Some(1)), None); // first sight of chunk 1: progress, no flush
        clock.advance(Duration::from_secs(10));
        assert_eq!(flusher.check(1, Some(1)), Some(FlushChunk { expected_prev_chunk_tx_id: 1 }));
    }

    #[test]
    fn does_not_reflush_the_same_completed_tx() {
        let clock = Arc::new(FakeClock(Mutex::new(Instant::now())));
        let mut flusher = Flusher::new(Duration::from_secs(5), clock.clone());
        clock.advance(Duration::from_secs(10));
        flusher.check(1, Some(1));
        clock.advance(Duration::from_secs(10));
        assert_eq!(flusher.check(1, Some(1)), Some(FlushChunk { expected_prev_chunk_tx_id: 1 }));
        clock.advance(Duration::from_secs(10));
        assert_eq!(flusher.check(1, Some(1)), None);
    }
}
