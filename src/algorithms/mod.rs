//! Rate limiting algorithms.
//!
//! Four interchangeable strategies, each a stateless decision function over
//! counters kept in a [`crate::store::CounterStore`]:
//!
//! - [`TokenBucket`]: refills at a fixed rate, each request spends tokens
//! - [`LeakyBucket`]: queues requests, drains at a fixed rate
//! - [`FixedWindowCounter`]: counts requests in aligned windows reset by TTL
//! - [`SlidingWindowCounter`]: keeps a log of request timestamps over a moving window
//!
//! Every algorithm namespaces its store keys with its own prefix so several can
//! run over the same [`RateKey`] without colliding.

pub mod bucket;
pub mod fixed_window;
pub mod leaky_bucket;
pub mod sliding_window;
pub mod token_bucket;

pub use bucket::{BucketOp, BucketOutcome, BucketState};
pub use fixed_window::FixedWindowCounter;
pub use leaky_bucket::LeakyBucket;
pub use sliding_window::SlidingWindowCounter;
pub use token_bucket::TokenBucket;

use crate::error::{ThrottlerError, ThrottlerResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};

/// Identity a limit is enforced against. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey(String);

impl RateKey {
    pub fn new(key: impl Into<String>) -> ThrottlerResult<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(ThrottlerError::InvalidKey(
                "rate limit key cannot be empty".to_string(),
            ));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Store key for this subject under an algorithm namespace.
    pub fn namespaced(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.0)
    }
}

impl fmt::Display for RateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-call parameters for the window algorithms.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowRequest {
    pub key: RateKey,
    pub limit: u64,
    pub window: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    Deny,
    Allow,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Allow => "Allow",
            State::Deny => "Deny",
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, State::Allow)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a window algorithm run.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowResult {
    pub state: State,
    pub total_requests: u64,
    pub expired_at: SystemTime,
}

/// Longest window a limiter accepts.
pub const MAX_WINDOW: Duration = Duration::from_secs(u32::MAX as u64);

/// Window length in milliseconds, as stored scores and TTLs use it.
pub(crate) fn window_millis(window: Duration) -> ThrottlerResult<i64> {
    if window > MAX_WINDOW {
        return Err(window_too_long(window));
    }
    i64::try_from(window.as_millis()).map_err(|_| window_too_long(window))
}

/// `now + window`, or a configuration error if that is not a representable time.
pub(crate) fn window_end(now: SystemTime, window: Duration) -> ThrottlerResult<SystemTime> {
    if window > MAX_WINDOW {
        return Err(window_too_long(window));
    }
    now.checked_add(window)
        .ok_or_else(|| window_too_long(window))
}

fn window_too_long(window: Duration) -> ThrottlerError {
    ThrottlerError::Configuration(format!(
        "window {:?} is longer than the maximum of {:?}",
        window, MAX_WINDOW
    ))
}

/// Seconds from `now` until `at`, rounded up.
pub(crate) fn seconds_until(now: SystemTime, at: SystemTime) -> u64 {
    let remaining = at.duration_since(now).unwrap_or_default();
    let secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// Seconds needed to accumulate `deficit` units at `rate` per second, rounded up.
pub(crate) fn seconds_to_recover(deficit: f64, rate: f64) -> u64 {
    if deficit <= 0.0 {
        return 0;
    }
    if rate <= 0.0 {
        return u64::MAX;
    }
    (deficit / rate).ceil() as u64
}
