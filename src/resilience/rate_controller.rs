//! # Adaptive Rate Controller
//!
//! Process-wide inter-dequeue delay shared by every stage processor. Busy
//! responses from a downstream endpoint raise the delay; a periodic decay
//! loop lowers it again, never below the configured floor.
//!
//! The delay is a single `AtomicU64` updated with `fetch_update`, so
//! concurrent busy reports and decay ticks never lose an update.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::execution::sleep_cancellable;

#[derive(Debug)]
pub struct RateController {
    current_ms: AtomicU64,
    floor_ms: u64,
    increment_ms: u64,
}

impl RateController {
    /// `floor_ms` is the baseline delay; `increment_ms` is added per busy
    /// signal without a suggestion and removed per decay tick.
    pub fn new(floor_ms: u64, increment_ms: u64) -> Self {
        Self {
            current_ms: AtomicU64::new(floor_ms),
            floor_ms,
            increment_ms,
        }
    }

    pub fn current_delay_ms(&self) -> u64 {
        self.current_ms.load(Ordering::Acquire)
    }

    pub fn floor_ms(&self) -> u64 {
        self.floor_ms
    }

    pub fn delay_before_dequeue(&self) -> Duration {
        Duration::from_millis(self.current_delay_ms())
    }

    /// Raise the delay by `suggested_delay_ms`, or by the fixed increment
    /// when the downstream gave no usable suggestion. Returns the new delay.
    pub fn report_busy(&self, suggested_delay_ms: Option<u64>) -> u64 {
        let added = suggested_delay_ms
            .filter(|ms| *ms > 0)
            .unwrap_or(self.increment_ms);
        let previous = self
            .current_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(added))
            })
            .unwrap_or_else(|current| current);
        let updated = previous.saturating_add(added);

        warn!(
            added_ms = added,
            delay_ms = updated,
            "🐢 Downstream busy, increasing delay between dequeues"
        );
        updated
    }

    /// Lower the delay by the fixed increment, floored. Returns the new delay.
    pub fn decay_tick(&self) -> u64 {
        let floor = self.floor_ms;
        let step = self.increment_ms;
        let previous = self
            .current_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(step).max(floor))
            })
            .unwrap_or_else(|current| current);
        let updated = previous.saturating_sub(step).max(floor);

        if updated != previous {
            debug!(
                previous_ms = previous,
                delay_ms = updated,
                "🐇 Relaxing delay between dequeues"
            );
        }
        updated
    }

    /// Sleep for the current delay. Returns `false` if cancelled first.
    pub async fn wait_before_dequeue(&self, token: &CancellationToken) -> bool {
        let delay = self.delay_before_dequeue();
        if delay.is_zero() {
            return !token.is_cancelled();
        }
        sleep_cancellable(delay, token).await
    }

    /// Run decay ticks every `interval` until cancelled. A zero interval
    /// disables decay and returns immediately.
    pub async fn run_decay_loop(
        controller: Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) {
        if interval.is_zero() {
            info!("⏸️ Rate decay disabled");
            return;
        }

        info!(
            interval_ms = interval.as_millis() as u64,
            floor_ms = controller.floor_ms,
            increment_ms = controller.increment_ms,
            "🔄 Rate decay loop started"
        );
        while sleep_cancellable(interval, &token).await {
            controller.decay_tick();
        }
        info!("🛑 Rate decay loop stopped");
    }
}
