//! Delivers log records to subscribers in strict offset order, at-least-once.
//!
//! Two worker strategies are provided: [`polling`] for logs that cannot push
//! notifications, and [`notifying`] for logs that can (see
//! [`txlog_core::Log::notify_handle`]). Both deliver strictly in order and
//! support cancellation via [`SubscriptionHandle::close`].

pub mod error;
pub mod notifying;
pub mod polling;

use std::sync::Arc;

use async_trait::async_trait;
use prometheus::{GaugeVec, Opts};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use error::SubscriberError;
use txlog_core::Record;

/// The maximum number of records read from the log in a single dispatch
/// pass, whether draining catch-up batches or live-mode permits. Fixed
/// rather than configurable: see `DESIGN.md` for why.
pub(crate) const LIVE_READ_CAP: usize = 100;

/// Receives records delivered by a dispatcher worker.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// A stable name used to label the per-subscriber lag metric.
    fn name(&self) -> &str;

    /// Handle one record. An `Err` return permanently stops delivery to this
    /// subscriber; it is not retried.
    async fn deliver(&self, record: Record) -> Result<(), SubscriberError>;
}

/// A handle to a running dispatcher worker.
pub struct SubscriptionHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub(crate) fn new(cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self { cancel, task }
    }

    /// Idempotently stop the worker and wait for it to finish. The
    /// subscriber is guaranteed not to be called again after this returns.
    pub async fn close(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

fn lag_metric() -> GaugeVec {
    GaugeVec::new(
        Opts::new("txlog_subscription_lag_offsets", "latest_submitted_offset minus delivered cursor, per subscriber"),
        &["subscriber"],
    )
    .expect("static metric descriptor is valid")
}

/// Lazily-registered lag gauge, shared across dispatcher workers in a
/// process. Registration failures (e.g. duplicate registration against a
/// custom registry) are logged and otherwise ignored: the metric is purely
/// observational and must never affect delivery.
pub fn register_lag_metric(registry: &prometheus::Registry) -> GaugeVec {
    let gauge = lag_metric();
    if let Err(err) = registry.register(Box::new(gauge.clone())) {
        tracing::warn!(%err, "failed to register subscription lag gauge");
    }
    gauge
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex as AsyncMutex;
    use txlog_core::{Log, MemoryLog};

    struct Collecting {
        name: String,
        delivered: AsyncMutex<Vec<Record>>,
        count: AtomicUsize,
    }

    #[async_trait]
    impl Subscriber for Collecting {
        fn name(&self) -> &str {
            &self.name
        }

        async fn deliver(&self, record: Record) -> Result<(), SubscriberError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            self.delivered.lock().await.push(record);
            Ok(())
        }
    }

    #[tokio::test]
    async fn polling_delivers_existing_then_new_records_in_order() {
        let log = Arc::new(MemoryLog::new(1024));
        for i in 0..3u8 {
            log.append_tx(vec![i]).await.unwrap();
        }
        let sub = Arc::new(Collecting {
            name: "s1".into(),
            delivered: AsyncMutex::new(Vec::new()),
            count: AtomicUsize::new(0),
        });
        let registry = prometheus::Registry::new();
        let lag = register_lag_metric(&registry);
        let handle = polling::spawn(log.clone(), sub.clone(), Duration::from_millis(5), None, lag);

        for i in 3..5u8 {
            log.append_tx(vec![i]).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.close().await;

        let delivered = sub.delivered.lock().await;
        assert_eq!(delivered.iter().map(|r| r.payload.clone()).collect::<Vec<_>>(), vec![vec![0], vec![1], vec![2], vec![3], vec![4]]);
        assert!(delivered.windows(2).all(|w| w[0].offset < w[1].offset));
    }

    #[tokio::test]
    async fn notifying_delivers_catch_up_then_live() {
        let log = Arc::new(MemoryLog::new(1024));
        for i in 0..3u8 {
            log.append_tx(vec![i]).await.unwrap();
        }
        let sub = Arc::new(Collecting {
            name: "s1".into(),
            delivered: AsyncMutex::new(Vec::new()),
            count: AtomicUsize::new(0),
        });
        let registry = prometheus::Registry::new();
        let lag = register_lag_metric(&registry);
        let handle = notifying::spawn(log.clone(), sub.clone(), None, lag);

        for i in 3..5u8 {
            log.append_tx(vec![i]).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.close().await;

        let delivered = sub.delivered.lock().await;
        assert_eq!(delivered.len(), 5);
        assert!(delivered.windows(2).all(|w| w[0].offset < w[1].offset));
    }
}
