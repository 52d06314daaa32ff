use std::sync::Arc;
use std::time::Duration;

use prometheus::GaugeVec;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use txlog_core::Log;

use crate::{Subscriber, SubscriptionHandle, LIVE_READ_CAP};

/// Start a polling dispatcher worker for `subscriber`.
///
/// Used when the log cannot push notifications. Reads up to
/// [`LIVE_READ_CAP`] records after the last delivered offset; if none are
/// available, sleeps for `poll_sleep` before retrying. `read_records`
/// errors are logged and the loop retries rather than tearing down the
/// worker.
pub fn spawn(log: Arc<dyn Log>, subscriber: Arc<dyn Subscriber>, poll_sleep: Duration, start_after: Option<u64>, lag: GaugeVec) -> SubscriptionHandle {
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        run(log, subscriber, poll_sleep, start_after, lag, task_cancel).await;
    });
    SubscriptionHandle::new(cancel, task)
}

async fn run(log: Arc<dyn Log>, subscriber: Arc<dyn Subscriber>, poll_sleep: Duration, start_after: Option<u64>, lag: GaugeVec, cancel: CancellationToken) {
    let mut cursor = start_after;
    loop {
        if cancel.is_cancelled() {
            return;
        }
        match log.read_records(cursor, LIVE_READ_CAP) {
            Ok(batch) if batch.is_empty() => {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(poll_sleep) => {}
                }
            }
            Ok(batch) => {
                for record in batch {
                    if cancel.is_cancelled() {
                        return;
                    }
                    if subscriber.deliver(record.clone()).await.is_err() {
                        return;
                    }
                    cursor = Some(record.offset);
                }
                if let Some(latest) = log.latest_submitted_offset() {
                    lag.with_label_values(&[subscriber.name()]).set(latest.saturating_sub(cursor.unwrap_or(0)) as f64);
                }
            }
            Err(err) => {
                warn!(subscriber = subscriber.name(), %err, "read_records failed, retrying after backoff");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(poll_sleep) => {}
                }
            }
        }
    }
}
