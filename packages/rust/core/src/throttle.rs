//! Run-wide ceiling on external calls per minute.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window permit counter shared by every stage of a run.
///
/// Sits above the per-service rate limiters: each generation call and each
/// tool invocation takes one slot.
#[derive(Debug)]
pub struct RequestThrottle {
    max_per_window: usize,
    window: Duration,
    slots: Mutex<VecDeque<Instant>>,
}

impl RequestThrottle {
    /// `max_rpm` of zero is treated as one.
    pub fn per_minute(max_rpm: usize) -> Self {
        Self::with_window(max_rpm, WINDOW)
    }

    pub fn with_window(max_per_window: usize, window: Duration) -> Self {
        Self {
            max_per_window: max_per_window.max(1),
            window,
            slots: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait until a slot is free, then take it. Returns how long we waited.
    pub async fn acquire(&self) -> Duration {
        let mut slots = self.slots.lock().await;
        let started = Instant::now();

        loop {
            let now = Instant::now();
            while slots
                .front()
                .is_some_and(|oldest| now.duration_since(*oldest) >= self.window)
            {
                slots.pop_front();
            }

            if slots.len() < self.max_per_window {
                slots.push_back(now);
                return now.duration_since(started);
            }

            // Full window: sleep until the oldest slot expires.
            let Some(oldest) = slots.front().copied() else {
                continue;
            };
            let wait = self.window.saturating_sub(now.duration_since(oldest));
            debug!(wait_ms = wait.as_millis() as u64, "request ceiling reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Slots taken within the current window.
    #[cfg(test)]
    pub(crate) async fn in_window(&self) -> usize {
        let slots = self.slots.lock().await;
        let now = Instant::now();
        slots
            .iter()
            .filter(|t| now.duration_since(**t) < self.window)
            .count()
    }
}
