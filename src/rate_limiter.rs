//! The limiter façade: one algorithm behind a uniform decision contract.

use crate::algorithms::{
    seconds_until, FixedWindowCounter, LeakyBucket, RateKey, SlidingWindowCounter, State,
    TokenBucket, WindowRequest, WindowResult,
};
use crate::clock::{Clock, SystemClock};
use crate::error::{ThrottlerError, ThrottlerResult};
use crate::rate_limit_config::{AlgorithmKind, LimiterSettings};
use crate::store::CounterStore;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use validator::Validate;

/// Input to [`RateLimiter::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub key: RateKey,
}

impl Request {
    pub fn new(key: impl Into<String>) -> ThrottlerResult<Self> {
        Ok(Self {
            key: RateKey::new(key)?,
        })
    }
}

/// Admission decision for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub state: State,
    /// Bucket capacity or window limit.
    pub request_limit: u64,
    /// Seconds the caller should wait before the outcome can change.
    pub remaining_time_secs: u64,
    /// Requests counted in the current window (window algorithms only).
    pub total_requests: Option<u64>,
    /// End of the current window (window algorithms only).
    pub expired_at: Option<SystemTime>,
}

/// The algorithm a [`RateLimiter`] runs, with its configuration.
pub enum Algorithm {
    TokenBucket(TokenBucket),
    LeakyBucket(LeakyBucket),
    FixedWindow {
        counter: FixedWindowCounter,
        limit: u64,
        window: Duration,
    },
    SlidingWindow {
        counter: SlidingWindowCounter,
        limit: u64,
        window: Duration,
    },
}

impl Algorithm {
    pub fn kind(&self) -> AlgorithmKind {
        match self {
            Algorithm::TokenBucket(_) => AlgorithmKind::TokenBucket,
            Algorithm::LeakyBucket(_) => AlgorithmKind::LeakyBucket,
            Algorithm::FixedWindow { .. } => AlgorithmKind::FixedWindow,
            Algorithm::SlidingWindow { .. } => AlgorithmKind::SlidingWindow,
        }
    }
}

/// Wraps exactly one [`Algorithm`].
///
/// Store failures and deadline expiry come back as errors for every
/// algorithm; a request is never admitted or denied without a fresh read of
/// the store.
pub struct RateLimiter {
    algorithm: Algorithm,
    clock: Arc<dyn Clock>,
    timeout: Option<Duration>,
}

impl RateLimiter {
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            clock: Arc::new(SystemClock),
            timeout: None,
        }
    }

    /// Build the limiter described by `settings` over `store`.
    pub fn from_settings(
        store: Arc<dyn CounterStore>,
        settings: &LimiterSettings,
        clock: Arc<dyn Clock>,
    ) -> ThrottlerResult<Self> {
        settings.validate()?;

        let algorithm = match settings.algorithm {
            AlgorithmKind::TokenBucket => Algorithm::TokenBucket(
                TokenBucket::new(store, settings.rate, settings.capacity)?
                    .with_clock(clock.clone()),
            ),
            AlgorithmKind::LeakyBucket => Algorithm::LeakyBucket(
                LeakyBucket::new(store, settings.rate, settings.capacity)?
                    .with_clock(clock.clone()),
            ),
            AlgorithmKind::FixedWindow => Algorithm::FixedWindow {
                counter: FixedWindowCounter::new(store).with_clock(clock.clone()),
                limit: settings.limit,
                window: settings.window,
            },
            AlgorithmKind::SlidingWindow => Algorithm::SlidingWindow {
                counter: SlidingWindowCounter::new(store).with_clock(clock.clone()),
                limit: settings.limit,
                window: settings.window,
            },
        };

        Ok(Self {
            algorithm,
            clock,
            timeout: None,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Fail any decision that takes longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn kind(&self) -> AlgorithmKind {
        self.algorithm.kind()
    }

    pub fn request_limit(&self) -> u64 {
        match &self.algorithm {
            Algorithm::TokenBucket(bucket) => bucket.capacity(),
            Algorithm::LeakyBucket(bucket) => bucket.capacity(),
            Algorithm::FixedWindow { limit, .. } | Algorithm::SlidingWindow { limit, .. } => {
                *limit
            }
        }
    }

    pub async fn run(&self, request: &Request) -> ThrottlerResult<Decision> {
        let result = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.decide(request))
                .await
                .unwrap_or_else(|_| Err(deadline_exceeded(timeout))),
            None => self.decide(request).await,
        };

        match &result {
            Ok(decision) => tracing::debug!(
                key = %request.key,
                algorithm = %self.kind(),
                state = %decision.state,
                retry_after = decision.remaining_time_secs,
                "rate limit decision"
            ),
            Err(err) => tracing::warn!(
                key = %request.key,
                algorithm = %self.kind(),
                error = %err,
                "rate limit decision failed"
            ),
        }
        result
    }

    async fn decide(&self, request: &Request) -> ThrottlerResult<Decision> {
        match &self.algorithm {
            Algorithm::TokenBucket(bucket) => {
                let grant = bucket.take(&request.key, 1).await?;
                Ok(Decision {
                    state: if grant.granted > 0 {
                        State::Allow
                    } else {
                        State::Deny
                    },
                    request_limit: bucket.capacity(),
                    remaining_time_secs: grant.retry_after_secs,
                    total_requests: None,
                    expired_at: None,
                })
            }
            Algorithm::LeakyBucket(bucket) => {
                let admission = bucket.add(&request.key).await?;
                Ok(Decision {
                    state: if admission.admitted {
                        State::Allow
                    } else {
                        State::Deny
                    },
                    request_limit: bucket.capacity(),
                    remaining_time_secs: admission.retry_after_secs,
                    total_requests: None,
                    expired_at: None,
                })
            }
            Algorithm::FixedWindow {
                counter,
                limit,
                window,
            } => {
                let result = counter.run(&self.window_request(request, *limit, *window)).await?;
                Ok(self.window_decision(result, *limit))
            }
            Algorithm::SlidingWindow {
                counter,
                limit,
                window,
            } => {
                let result = counter.run(&self.window_request(request, *limit, *window)).await?;
                Ok(self.window_decision(result, *limit))
            }
        }
    }

    fn window_request(&self, request: &Request, limit: u64, window: Duration) -> WindowRequest {
        WindowRequest {
            key: request.key.clone(),
            limit,
            window,
        }
    }

    fn window_decision(&self, result: WindowResult, limit: u64) -> Decision {
        Decision {
            state: result.state,
            request_limit: limit,
            remaining_time_secs: seconds_until(self.clock.now(), result.expired_at),
            total_requests: Some(result.total_requests),
            expired_at: Some(result.expired_at),
        }
    }
}

fn deadline_exceeded(timeout: Duration) -> ThrottlerError {
    ThrottlerError::StoreTimeout(format!("no answer within {:?}", timeout))
}
