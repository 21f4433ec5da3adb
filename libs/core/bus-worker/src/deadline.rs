//! Wall-clock deadline around a job's processing.

use crate::error::WorkerError;
use std::future::Future;
use std::time::Duration;

/// Run `task` under a wall-clock cap.
///
/// If the deadline elapses first the task future is dropped, which cancels
/// its pending I/O at the next suspension point, and the caller observes
/// `WorkerError::DeadlineExceeded`. State shared with the task (e.g. a
/// phase recorder) remains readable afterwards.
pub async fn run_with_deadline<T>(
    deadline: Duration,
    task: impl Future<Output = Result<T, WorkerError>>,
) -> Result<T, WorkerError> {
    match tokio::time::timeout(deadline, task).await {
        Ok(result) => result,
        Err(_) => Err(WorkerError::DeadlineExceeded {
            elapsed_ms: deadline.as_millis() as u64,
        }),
    }
}
