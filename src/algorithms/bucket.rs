//! Persisted bucket record and the update rules shared by the token bucket
//! and the leaky bucket.
//!
//! The transition is a pure function of the prior record and the current time
//! so that every [`crate::store::CounterStore`] applies exactly the same rules,
//! whether it runs them in-process or as a server-side script.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `{count, last_update}` as stored per key.
///
/// `count` is kept in `[0, capacity]` and `last_update` (Unix seconds) never
/// moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    pub count: f64,
    pub last_update: i64,
}

/// One atomic update of a bucket record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BucketOp {
    /// Refill at `rate` tokens/second up to `capacity`, then take `amount`
    /// tokens if that many are available.
    Take { rate: f64, capacity: f64, amount: f64 },
    /// Leak at `rate` requests/second, then queue one request if the bucket
    /// is not full.
    Pour { rate: f64, capacity: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketOutcome {
    pub admitted: bool,
    pub state: BucketState,
}

impl BucketOp {
    pub fn rate(&self) -> f64 {
        match *self {
            BucketOp::Take { rate, .. } | BucketOp::Pour { rate, .. } => rate,
        }
    }

    pub fn capacity(&self) -> f64 {
        match *self {
            BucketOp::Take { capacity, .. } | BucketOp::Pour { capacity, .. } => capacity,
        }
    }

    /// Record used when the key has never been written: a token bucket starts
    /// full, a leaky bucket starts empty.
    pub fn initial_state(&self, now: i64) -> BucketState {
        match *self {
            BucketOp::Take { capacity, .. } => BucketState {
                count: capacity,
                last_update: now,
            },
            BucketOp::Pour { .. } => BucketState {
                count: 0.0,
                last_update: now,
            },
        }
    }

    pub fn apply(&self, prior: Option<BucketState>, now: i64) -> BucketOutcome {
        let prior = prior.unwrap_or_else(|| self.initial_state(now));
        let now = now.max(prior.last_update);
        let elapsed = (now - prior.last_update) as f64;

        match *self {
            BucketOp::Take {
                rate,
                capacity,
                amount,
            } => {
                let mut count = (prior.count + elapsed * rate).clamp(0.0, capacity);
                let admitted = count >= amount;
                if admitted {
                    count -= amount;
                }
                BucketOutcome {
                    admitted,
                    state: BucketState {
                        count,
                        last_update: now,
                    },
                }
            }
            BucketOp::Pour { rate, capacity } => {
                let mut count = (prior.count - elapsed * rate).clamp(0.0, capacity);
                let admitted = count < capacity;
                if admitted {
                    count = (count + 1.0).min(capacity);
                }
                BucketOutcome {
                    admitted,
                    state: BucketState {
                        count,
                        last_update: now,
                    },
                }
            }
        }
    }

    /// How long an untouched record stays meaningful: the time to refill or
    /// drain the whole bucket, plus one second of slack. After that the record
    /// is equivalent to a missing one and the store may drop it.
    pub fn idle_ttl(&self) -> Duration {
        let rate = self.rate();
        if rate <= 0.0 {
            return super::MAX_WINDOW;
        }
        let seconds = (self.capacity() / rate).ceil() as u64;
        Duration::from_secs(seconds.saturating_add(1)).min(super::MAX_WINDOW)
    }
}
