//! Sliding window log.
//!
//! Each request is recorded as a uniquely named entry scored by its timestamp
//! in milliseconds. The window is `(now - window, now]`: an entry exactly
//! `window` old no longer counts.
//!
//! The fast-reject read happens before, and separately from, the atomic
//! remove/add/count batch. Concurrent callers can all pass the read and all
//! write. Each still gets an exact count from its own batch, so admissions stay
//! within the limit, but the log can hold up to `limit + concurrency` entries
//! for the rest of the window.

use super::{window_end, window_millis, State, WindowRequest, WindowResult};
use crate::clock::{Clock, SystemClock};
use crate::error::ThrottlerResult;
use crate::store::CounterStore;
use std::sync::Arc;
use uuid::Uuid;

pub const SLIDING_WINDOW_PREFIX: &str = "sliding_window:";

pub struct SlidingWindowCounter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowCounter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn run(&self, request: &WindowRequest) -> ThrottlerResult<WindowResult> {
        let key = request.key.namespaced(SLIDING_WINDOW_PREFIX);
        let now = self.clock.now();
        let now_ms = self.clock.unix_millis();
        let cutoff = now_ms - window_millis(request.window)?;
        let expired_at = window_end(now, request.window)?;

        let in_window = self.store.count_since(&key, cutoff).await?;
        if in_window >= request.limit {
            tracing::debug!(
                key = %request.key,
                total_requests = in_window,
                limit = request.limit,
                "sliding window rejected without write"
            );
            return Ok(WindowResult {
                state: State::Deny,
                total_requests: in_window,
                expired_at,
            });
        }

        let member = Uuid::new_v4().to_string();
        let total_requests = self
            .store
            .slide(&key, cutoff, &member, now_ms, request.window)
            .await?;

        let state = if total_requests > request.limit {
            State::Deny
        } else {
            State::Allow
        };

        tracing::debug!(
            key = %request.key,
            total_requests,
            limit = request.limit,
            state = %state,
            "sliding window recorded request"
        );

        Ok(WindowResult {
            state,
            total_requests,
            expired_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::RateKey;
    use crate::clock::ManualClock;
    use crate::error::ThrottlerError;
    use crate::memory_store::MemoryStore;
    use std::time::Duration;

    fn counter() -> (SlidingWindowCounter, Arc<MemoryStore>, ManualClock) {
        let clock = ManualClock::at_unix(1_652_174_100);
        let store = Arc::new(MemoryStore::with_clock(Arc::new(clock.clone())));
        let counter =
            SlidingWindowCounter::new(store.clone()).with_clock(Arc::new(clock.clone()));
        (counter, store, clock)
    }

    fn request(limit: u64, window: Duration) -> WindowRequest {
        WindowRequest {
            key: RateKey::new("user").unwrap(),
            limit,
            window,
        }
    }

    #[tokio::test]
    async fn test_denies_at_limit_without_writing() {
        let (counter, store, clock) = counter();
        let req = request(3, Duration::from_secs(60));

        for expected in 1..=3 {
            let result = counter.run(&req).await.unwrap();
            assert_eq!(result.state, State::Allow);
            assert_eq!(result.total_requests, expected);
        }

        let denied = counter.run(&req).await.unwrap();
        assert_eq!(denied.state, State::Deny);
        assert_eq!(denied.total_requests, 3);
        assert_eq!(denied.expired_at, clock.now() + Duration::from_secs(60));

        let logged = store
            .count_since("sliding_window:user", i64::MIN)
            .await
            .unwrap();
        assert_eq!(logged, 3);
    }

    #[tokio::test]
    async fn test_same_millisecond_requests_are_distinct() {
        let (counter, _store, _clock) = counter();
        let req = request(10, Duration::from_secs(1));

        counter.run(&req).await.unwrap();
        let result = counter.run(&req).await.unwrap();
        assert_eq!(result.total_requests, 2);
    }

    #[tokio::test]
    async fn test_entry_at_window_boundary_is_excluded() {
        let (counter, _store, clock) = counter();
        let req = request(1, Duration::from_secs(60));
        assert_eq!(counter.run(&req).await.unwrap().state, State::Allow);

        clock.advance(Duration::from_millis(59_999));
        assert_eq!(counter.run(&req).await.unwrap().state, State::Deny);

        clock.advance(Duration::from_millis(1));
        let result = counter.run(&req).await.unwrap();
        assert_eq!(result.state, State::Allow);
        assert_eq!(result.total_requests, 1);
    }

    #[tokio::test]
    async fn test_window_slides_continuously() {
        let (counter, _store, clock) = counter();
        let req = request(2, Duration::from_secs(10));

        counter.run(&req).await.unwrap();
        clock.advance(Duration::from_secs(6));
        counter.run(&req).await.unwrap();
        clock.advance(Duration::from_secs(2));
        assert_eq!(counter.run(&req).await.unwrap().state, State::Deny);

        // The first entry is now 10s old, the second 4s.
        clock.advance(Duration::from_secs(2));
        let result = counter.run(&req).await.unwrap();
        assert_eq!(result.state, State::Allow);
        assert_eq!(result.total_requests, 2);
    }

    #[tokio::test]
    async fn test_concurrent_over_admission_is_bounded() {
        let (counter, store, _clock) = counter();
        store.set_latency(Duration::from_millis(1));
        let req = request(5, Duration::from_secs(60));
        let callers = 16u64;

        let runs = (0..callers).map(|_| counter.run(&req));
        let results: Vec<_> = futures::future::join_all(runs)
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();

        let allowed = results.iter().filter(|r| r.state.is_allowed()).count() as u64;
        assert!(allowed <= req.limit + callers);
        assert_eq!(allowed, req.limit);

        store.set_latency(Duration::ZERO);
        let logged = store
            .count_since("sliding_window:user", i64::MIN)
            .await
            .unwrap();
        assert!(logged <= req.limit + callers);
    }

    #[tokio::test]
    async fn test_store_failure_is_returned() {
        let (counter, store, _clock) = counter();
        store.set_unavailable(true);
        let err = counter
            .run(&request(1, Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, ThrottlerError::StoreUnavailable(_)));
    }
}
