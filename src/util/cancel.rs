use std::future::Future;

use tokio::time::{sleep_until, Instant};
use tonic::Status;

/// Runs `op` until it finishes or `interrupt` resolves, whichever comes first.
/// The status produced by `interrupt` is returned in the latter case and `op`
/// is dropped mid-flight.
pub(crate) async fn run_until<T, F, I>(op: F, interrupt: I) -> Result<T, Status>
where
    F: Future<Output = Result<T, Status>>,
    I: Future<Output = Status>,
{
    tokio::select! {
        biased;
        status = interrupt => Err(status),
        res = op => res,
    }
}

pub(crate) async fn cancelled<C: Future<Output = ()>>(signal: C) -> Status {
    signal.await;
    Status::cancelled("operation was cancelled by the caller")
}

pub(crate) async fn deadline(at: Instant) -> Status {
    sleep_until(at).await;
    Status::deadline_exceeded("deadline exceeded")
}
