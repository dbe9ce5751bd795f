use super::bucket::BucketOp;
use super::{seconds_to_recover, RateKey};
use crate::clock::{Clock, SystemClock};
use crate::error::{ThrottlerError, ThrottlerResult};
use crate::store::CounterStore;
use std::sync::Arc;

pub const TOKEN_BUCKET_PREFIX: &str = "token_bucket:";

/// Tokens handed out by one [`TokenBucket::take`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grant {
    /// Either the requested amount or zero.
    pub granted: u64,
    /// Tokens left in the bucket after this call.
    pub remaining: f64,
    /// Seconds until the requested amount would be available; zero when
    /// granted. `u64::MAX` when `amount` exceeds the capacity, since such a
    /// request can never be granted.
    pub retry_after_secs: u64,
}

/// Token bucket over a shared [`CounterStore`].
///
/// The bucket holds up to `capacity` tokens and refills at `rate` tokens per
/// second. A key that has never been seen starts with a full bucket.
pub struct TokenBucket {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    rate: f64,
    capacity: u64,
}

impl TokenBucket {
    pub fn new(store: Arc<dyn CounterStore>, rate: f64, capacity: u64) -> ThrottlerResult<Self> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ThrottlerError::Configuration(format!(
                "token bucket rate must be a positive number, got {}",
                rate
            )));
        }
        if capacity == 0 {
            return Err(ThrottlerError::Configuration(
                "token bucket capacity must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            store,
            clock: Arc::new(SystemClock),
            rate,
            capacity,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Refill, then take `amount` tokens if the bucket holds at least that many.
    ///
    /// An `amount` larger than the capacity still refreshes the stored bucket
    /// but is never granted.
    pub async fn take(&self, key: &RateKey, amount: u64) -> ThrottlerResult<Grant> {
        let op = BucketOp::Take {
            rate: self.rate,
            capacity: self.capacity as f64,
            amount: amount as f64,
        };
        let store_key = key.namespaced(TOKEN_BUCKET_PREFIX);
        let outcome = self
            .store
            .apply_bucket(&store_key, op, self.clock.unix_seconds())
            .await?;

        let remaining = outcome.state.count;
        let grant = if outcome.admitted {
            Grant {
                granted: amount,
                remaining,
                retry_after_secs: 0,
            }
        } else if amount > self.capacity {
            Grant {
                granted: 0,
                remaining,
                retry_after_secs: u64::MAX,
            }
        } else {
            Grant {
                granted: 0,
                remaining,
                retry_after_secs: seconds_to_recover(amount as f64 - remaining, self.rate),
            }
        };

        tracing::debug!(
            key = %key,
            amount,
            granted = grant.granted,
            remaining = grant.remaining,
            "token bucket take"
        );
        Ok(grant)
    }
}
