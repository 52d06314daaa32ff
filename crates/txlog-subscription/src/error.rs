use thiserror::Error;

/// Returned by a [`crate::Subscriber`] to signal it can no longer accept
/// deliveries. Any error terminates the dispatcher worker for that
/// subscriber; it is never retried.
#[derive(Debug, Error)]
#[error("subscriber rejected delivery: {0}")]
pub struct SubscriberError(pub String);
