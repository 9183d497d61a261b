//! # Bounded Task Runner
//!
//! Caps the number of in-flight message-processing tasks per stage.
//!
//! ```text
//! poll loop → acquire slot (blocks while full) → tokio::spawn(work)
//!                                                   │
//!                                  on_success(T) ◄──┼──► on_failure(PipelineError)
//!                                                   │
//!                                             slot released
//! ```
//!
//! Slot acquisition races the cancellation token so a poll loop blocked on a
//! full runner can stop at shutdown. Work that is already running is never
//! aborted; [`BoundedTaskRunner::drain`] waits for it.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{PipelineError, PipelineResult};

/// A held concurrency slot. Released when the spawned work finishes, or
/// when dropped unused.
#[derive(Debug)]
pub struct TaskSlot {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Clone)]
pub struct BoundedTaskRunner {
    name: String,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
}

impl BoundedTaskRunner {
    pub fn new(name: impl Into<String>, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            name: name.into(),
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.concurrency.saturating_sub(self.available())
    }

    /// Wait for a free slot, or fail with `Cancelled` if the token fires first
    pub async fn acquire(&self, token: &CancellationToken) -> PipelineResult<TaskSlot> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(PipelineError::cancelled(format!("{} slot acquisition", self.name))),
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                let permit = permit.map_err(|_| {
                    PipelineError::cancelled(format!("{} runner closed", self.name))
                })?;
                Ok(TaskSlot { _permit: permit })
            }
        }
    }

    /// Spawn `work` in an already-acquired slot. Exactly one callback runs,
    /// then the slot is released. Panics inside `work` reach `on_failure`
    /// as `TaskPanicked`.
    pub fn spawn_in<T, W, S, F>(
        &self,
        slot: TaskSlot,
        work: W,
        on_success: S,
        on_failure: F,
    ) -> JoinHandle<()>
    where
        T: Send + 'static,
        W: Future<Output = PipelineResult<T>> + Send + 'static,
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(PipelineError) + Send + 'static,
    {
        let name = self.name.clone();
        tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(runner = %name, panic = %message, "💥 Task panicked");
                    Err(PipelineError::TaskPanicked(message))
                }
            };

            match outcome {
                Ok(value) => on_success(value),
                Err(e) => on_failure(e),
            }

            drop(slot);
            debug!(runner = %name, "Task slot released");
        })
    }

    /// Acquire a slot (blocking while the runner is full) and spawn `work`
    pub async fn start<T, W, S, F>(
        &self,
        token: &CancellationToken,
        work: W,
        on_success: S,
        on_failure: F,
    ) -> PipelineResult<JoinHandle<()>>
    where
        T: Send + 'static,
        W: Future<Output = PipelineResult<T>> + Send + 'static,
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(PipelineError) + Send + 'static,
    {
        let slot = self.acquire(token).await?;
        Ok(self.spawn_in(slot, work, on_success, on_failure))
    }

    /// Wait until every in-flight task has released its slot
    pub async fn drain(&self) {
        let Ok(total) = u32::try_from(self.concurrency) else {
            return;
        };
        if let Ok(permits) = self.semaphore.acquire_many(total).await {
            drop(permits);
        }
        debug!(runner = %self.name, "Task runner drained");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
