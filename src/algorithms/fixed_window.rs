use super::{window_end, State, WindowRequest, WindowResult};
use crate::clock::{Clock, SystemClock};
use crate::error::ThrottlerResult;
use crate::store::{CounterStore, KeyTtl};
use std::sync::Arc;

pub const FIXED_WINDOW_PREFIX: &str = "fixed_window:";

/// Fixed window counter.
///
/// The first request of a window creates the counter and arms its TTL; the
/// window ends when the store expires the key. Any request that finds the
/// counter without a TTL arms it, so a counter can never outlive its window
/// indefinitely even if the request that created it died before expiring it.
pub struct FixedWindowCounter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl FixedWindowCounter {
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
        let key = request.key.namespaced(FIXED_WINDOW_PREFIX);
        let now = self.clock.now();
        window_end(now, request.window)?;
        let (total_requests, ttl) = self.store.incr_with_ttl(&key).await?;

        let remaining = match ttl {
            KeyTtl::Expires(remaining) => remaining,
            KeyTtl::Missing | KeyTtl::Persistent => {
                self.store.expire_if_unset(&key, request.window).await?;
                request.window
            }
        };

        let expired_at = window_end(now, remaining)?;
        let state = if total_requests > request.limit {
            State::Deny
        } else {
            State::Allow
        };

        tracing::debug!(
            key = %request.key,
            total_requests,
            limit = request.limit,
            ttl_ms = remaining.as_millis() as u64,
            state = %state,
            "fixed window counted request"
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
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    // 2022-05-10T09:15:00Z
    const START: u64 = 1_652_174_100;

    fn counter() -> (FixedWindowCounter, Arc<MemoryStore>, ManualClock) {
        let clock = ManualClock::at_unix(START);
        let store = Arc::new(MemoryStore::with_clock(Arc::new(clock.clone())));
        let counter = FixedWindowCounter::new(store.clone()).with_clock(Arc::new(clock.clone()));
        (counter, store, clock)
    }

    fn request(limit: u64) -> WindowRequest {
        WindowRequest {
            key: RateKey::new("user").unwrap(),
            limit,
            window: Duration::from_secs(60),
        }
    }

    fn at(seconds_after_start: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(START + seconds_after_start)
    }

    async fn run_times(
        counter: &FixedWindowCounter,
        request: &WindowRequest,
        runs: usize,
        clock: &ManualClock,
        advance: Duration,
    ) -> WindowResult {
        let mut last = None;
        for _ in 0..runs {
            last = Some(counter.run(request).await.unwrap());
            clock.advance(advance);
        }
        last.unwrap()
    }

    #[tokio::test]
    async fn test_allows_under_limit() {
        let (counter, _store, clock) = counter();
        let result = run_times(&counter, &request(60), 50, &clock, Duration::ZERO).await;

        assert_eq!(
            result,
            WindowResult {
                state: State::Allow,
                total_requests: 50,
                expired_at: at(60),
            }
        );
    }

    #[tokio::test]
    async fn test_denies_over_limit() {
        let (counter, _store, clock) = counter();
        let result = run_times(&counter, &request(50), 51, &clock, Duration::ZERO).await;

        assert_eq!(
            result,
            WindowResult {
                state: State::Deny,
                total_requests: 51,
                expired_at: at(60),
            }
        );
    }

    #[tokio::test]
    async fn test_key_expires_and_window_restarts() {
        let (counter, _store, clock) = counter();
        let result =
            run_times(&counter, &request(100), 100, &clock, Duration::from_secs(1)).await;

        assert_eq!(
            result,
            WindowResult {
                state: State::Allow,
                total_requests: 40,
                expired_at: at(120),
            }
        );
    }

    #[tokio::test]
    async fn test_first_call_after_expiry_counts_one() {
        let (counter, _store, clock) = counter();
        let req = request(2);
        for _ in 0..3 {
            counter.run(&req).await.unwrap();
        }
        assert_eq!(counter.run(&req).await.unwrap().state, State::Deny);

        clock.advance(Duration::from_secs(60));
        let result = counter.run(&req).await.unwrap();
        assert_eq!(result.state, State::Allow);
        assert_eq!(result.total_requests, 1);
    }

    #[tokio::test]
    async fn test_rearms_missing_ttl() {
        let (counter, store, clock) = counter();
        // A counter left behind without any expiry.
        store.incr_with_ttl("fixed_window:user").await.unwrap();

        let result = counter.run(&request(10)).await.unwrap();
        assert_eq!(result.total_requests, 2);
        assert_eq!(result.expired_at, at(60));

        clock.advance(Duration::from_secs(60));
        assert_eq!(counter.run(&request(10)).await.unwrap().total_requests, 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_requests_always_arm_ttl() {
        let (counter, store, _clock) = counter();
        let req = request(1_000);

        let runs = (0..32).map(|_| counter.run(&req));
        let results = futures::future::join_all(runs).await;
        assert!(results.iter().all(|r| r.is_ok()));

        let (count, ttl) = store.incr_with_ttl("fixed_window:user").await.unwrap();
        assert_eq!(count, 33);
        assert!(matches!(ttl, KeyTtl::Expires(_)));
    }

    #[tokio::test]
    async fn test_store_failure_is_returned() {
        let (counter, store, _clock) = counter();
        store.set_unavailable(true);
        let err = counter.run(&request(10)).await.unwrap_err();
        assert!(matches!(err, ThrottlerError::StoreUnavailable(_)));
    }
}
