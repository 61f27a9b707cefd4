//! Minimum-interval rate limiting per external service.
//!
//! Each service gets its own timer and interval. A retriever owns (or shares
//! via `Arc`) one [`RateLimiter`]; independent runs build independent
//! limiters, so nothing here is process-global.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// External services that are rate limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceId {
    Embedding,
    WebSearch,
}

impl ServiceId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Embedding => "embedding",
            Self::WebSearch => "web_search",
        }
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last-call bookkeeping for one service.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    pub service_id: ServiceId,
    pub min_interval: Duration,
    pub last_call_at: Option<Instant>,
}

impl RateLimitState {
    fn new(service_id: ServiceId, min_interval: Duration) -> Self {
        Self {
            service_id,
            min_interval,
            last_call_at: None,
        }
    }

    /// How long a call issued at `now` has to wait.
    fn wait_at(&self, now: Instant) -> Duration {
        match self.last_call_at {
            Some(last) => self.min_interval.saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }
}

/// Enforces a minimum delay between successive calls to the same service.
#[derive(Debug, Default)]
pub struct RateLimiter {
    services: HashMap<ServiceId, Mutex<RateLimitState>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A limiter tracking a single service.
    pub fn single(service_id: ServiceId, min_interval: Duration) -> Self {
        Self::new().with_service(service_id, min_interval)
    }

    /// Register a service with its minimum interval.
    pub fn with_service(mut self, service_id: ServiceId, min_interval: Duration) -> Self {
        self.services
            .insert(service_id, Mutex::new(RateLimitState::new(service_id, min_interval)));
        self
    }

    /// Suspend until `min_interval` has passed since the previous call to
    /// `service_id`, then record now as the new last call.
    ///
    /// Returns how long the caller waited. Unregistered services never wait.
    pub async fn wait_if_needed(&self, service_id: ServiceId) -> Duration {
        let Some(state) = self.services.get(&service_id) else {
            debug!(service = %service_id, "no rate limit registered");
            return Duration::ZERO;
        };

        // The lock is held across the sleep so same-service callers queue up.
        let mut state = state.lock().await;
        let wait = state.wait_at(Instant::now());
        if !wait.is_zero() {
            debug!(service = %service_id, wait_ms = wait.as_millis() as u64, "rate limit delay");
            tokio::time::sleep(wait).await;
        }
        state.last_call_at = Some(Instant::now());
        wait
    }

    /// Snapshot of a service's state, if registered.
    pub async fn state(&self, service_id: ServiceId) -> Option<RateLimitState> {
        match self.services.get(&service_id) {
            Some(state) => Some(state.lock().await.clone()),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(80);

    #[tokio::test]
    async fn first_call_does_not_wait() {
        let limiter = RateLimiter::single(ServiceId::Embedding, INTERVAL);
        let waited = limiter.wait_if_needed(ServiceId::Embedding).await;
        assert_eq!(waited, Duration::ZERO);
        let state = limiter.state(ServiceId::Embedding).await.unwrap();
        assert!(state.last_call_at.is_some());
    }

    #[tokio::test]
    async fn back_to_back_calls_are_spaced_by_interval() {
        let limiter = RateLimiter::single(ServiceId::WebSearch, INTERVAL);
        limiter.wait_if_needed(ServiceId::WebSearch).await;
        let first = limiter.state(ServiceId::WebSearch).await.unwrap().last_call_at.unwrap();

        limiter.wait_if_needed(ServiceId::WebSearch).await;
        let second = limiter.state(ServiceId::WebSearch).await.unwrap().last_call_at.unwrap();

        assert!(second.duration_since(first) >= INTERVAL);
    }

    #[tokio::test]
    async fn services_have_independent_timers() {
        let limiter = RateLimiter::new()
            .with_service(ServiceId::Embedding, Duration::from_secs(60))
            .with_service(ServiceId::WebSearch, Duration::from_secs(60));

        limiter.wait_if_needed(ServiceId::Embedding).await;
        let start = Instant::now();
        let waited = limiter.wait_if_needed(ServiceId::WebSearch).await;
        assert_eq!(waited, Duration::ZERO);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn unregistered_service_never_waits() {
        let limiter = RateLimiter::single(ServiceId::Embedding, Duration::from_secs(60));
        assert_eq!(limiter.wait_if_needed(ServiceId::WebSearch).await, Duration::ZERO);
        assert_eq!(limiter.wait_if_needed(ServiceId::WebSearch).await, Duration::ZERO);
        assert!(limiter.state(ServiceId::WebSearch).await.is_none());
    }

    #[test]
    fn wait_is_remaining_part_of_interval() {
        let now = Instant::now();
        let mut state = RateLimitState::new(ServiceId::Embedding, Duration::from_secs(2));
        assert_eq!(state.wait_at(now), Duration::ZERO);

        state.last_call_at = Some(now);
        let later = now + Duration::from_millis(500);
        assert_eq!(state.wait_at(later), Duration::from_millis(1500));

        let much_later = now + Duration::from_secs(5);
        assert_eq!(state.wait_at(much_later), Duration::ZERO);
    }
}
