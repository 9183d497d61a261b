//! # Execution Module
//!
//! Bounded spawning of per-message work plus the cancellation helpers every
//! loop, sleep and network call in the pipeline goes through.

pub mod task_runner;

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, PipelineResult};

pub use task_runner::{BoundedTaskRunner, TaskSlot};

/// Sleep for `duration`. Returns `false` if the token was cancelled first.
pub async fn sleep_cancellable(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Race `future` against cancellation
pub async fn cancellable<T, F>(
    token: &CancellationToken,
    operation: &str,
    future: F,
) -> PipelineResult<T>
where
    F: Future<Output = PipelineResult<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(PipelineError::cancelled(operation)),
        result = future => result,
    }
}
