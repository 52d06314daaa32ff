use std::sync::Arc;

use prometheus::GaugeVec;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use txlog_core::Log;

use crate::{Subscriber, SubscriptionHandle, LIVE_READ_CAP};

/// Start a notifying dispatcher worker for `subscriber`.
///
/// Used when the log can push offsets via [`txlog_core::Log::notify_handle`].
/// Runs catch-up mode (draining everything at or below the offset known at
/// subscribe time) and then live mode (blocking on a counting signal,
/// draining up to [`LIVE_READ_CAP`] permits per wakeup).
pub fn spawn(log: Arc<dyn Log>, subscriber: Arc<dyn Subscriber>, start_after: Option<u64>, lag: GaugeVec) -> SubscriptionHandle {
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        run(log, subscriber, start_after, lag, task_cancel).await;
    });
    SubscriptionHandle::new(cancel, task)
}

async fn run(log: Arc<dyn Log>, subscriber: Arc<dyn Subscriber>, start_after: Option<u64>, lag: GaugeVec, cancel: CancellationToken) {
    let latest_at_subscribe = log.latest_submitted_offset();
    let mut cursor = start_after;

    // The log only exposes a best-effort wakeup (`Notify::notify_waiters`),
    // not a true counting semaphore. Turn it into one here so live mode can
    // "acquire one permit, then drain up to the cap" as specified.
    let semaphore = Arc::new(Semaphore::new(0));
    let forward_cancel = cancel.clone();
    let forward_semaphore = semaphore.clone();
    let notify = log.notify_handle();
    let forwarder = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = forward_cancel.cancelled() => return,
                _ = notify.notified() => {
                    if forward_semaphore.available_permits() < LIVE_READ_CAP {
                        forward_semaphore.add_permits(1);
                    }
                }
            }
        }
    });

    if let Some(latest) = latest_at_subscribe {
        'catch_up: loop {
            if cancel.is_cancelled() {
                forwarder.abort();
                return;
            }
            if cursor.is_some_and(|c| c >= latest) {
                break 'catch_up;
            }
            let batch = match log.read_records(cursor, LIVE_READ_CAP) {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(subscriber = subscriber.name(), %err, "catch-up read failed, retrying");
                    continue;
                }
            };
            if batch.is_empty() {
                break 'catch_up;
            }
            for record in batch.into_iter().filter(|r| r.offset <= latest) {
                if subscriber.deliver(record.clone()).await.is_err() {
                    forwarder.abort();
                    return;
                }
                cursor = Some(record.offset);
            }
            lag.with_label_values(&[subscriber.name()]).set(latest.saturating_sub(cursor.unwrap_or(0)) as f64);
        }
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                forwarder.abort();
                return;
            }
            permit = semaphore.acquire() => {
                let Ok(permit) = permit else {
                    forwarder.abort();
                    return;
                };
                permit.forget();
                let mut batch_size = 1;
                while batch_size < LIVE_READ_CAP {
                    match semaphore.try_acquire() {
                        Ok(p) => {
                            p.forget();
                            batch_size += 1;
                        }
                        Err(_) => break,
                    }
                }
                let batch = match log.read_records(cursor, batch_size) {
                    Ok(batch) => batch,
                    Err(err) => {
                        warn!(subscriber = subscriber.name(), %err, "live read failed, retrying");
                        continue;
                    }
                };
                for record in batch {
                    if subscriber.deliver(record.clone()).await.is_err() {
                        forwarder.abort();
                        return;
                    }
                    cursor = Some(record.offset);
                }
                if let Some(latest) = log.latest_submitted_offset() {
                    lag.with_label_values(&[subscriber.name()]).set(latest.saturating_sub(cursor.unwrap_or(0)) as f64);
                }
            }
        }
    }
}
