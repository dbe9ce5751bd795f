use super::bucket::BucketOp;
use super::{seconds_to_recover, RateKey};
use crate::clock::{Clock, SystemClock};
use crate::error::{ThrottlerError, ThrottlerResult};
use crate::store::CounterStore;
use std::sync::Arc;

pub const LEAKY_BUCKET_PREFIX: &str = "leaky_bucket:";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admission {
    pub admitted: bool,
    /// Bucket level after this call.
    pub level: f64,
    pub retry_after_secs: u64,
}

/// Leaky bucket over a shared [`CounterStore`].
///
/// Each admitted request adds one unit; the bucket drains at `rate` units per
/// second and rejects requests once it holds `capacity` units. A key that has
/// never been seen starts empty.
pub struct LeakyBucket {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    rate: f64,
    capacity: u64,
}

impl LeakyBucket {
    pub fn new(store: Arc<dyn CounterStore>, rate: f64, capacity: u64) -> ThrottlerResult<Self> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ThrottlerError::Configuration(format!(
                "leaky bucket rate must be a positive number, got {}",
                rate
            )));
        }
        if capacity == 0 {
            return Err(ThrottlerError::Configuration(
                "leaky bucket capacity must be greater than 0".to_string(),
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

    /// Leak, then queue one request unless the bucket is full.
    ///
    /// A full bucket is reported as `admitted: false`, not as an error.
    pub async fn add(&self, key: &RateKey) -> ThrottlerResult<Admission> {
        let op = BucketOp::Pour {
            rate: self.rate,
            capacity: self.capacity as f64,
        };
        let store_key = key.namespaced(LEAKY_BUCKET_PREFIX);
        let outcome = self
            .store
            .apply_bucket(&store_key, op, self.clock.unix_seconds())
            .await?;

        let level = outcome.state.count;
        let retry_after_secs = if outcome.admitted {
            0
        } else {
            seconds_to_recover(level + 1.0 - self.capacity as f64, self.rate).max(1)
        };

        if !outcome.admitted {
            tracing::debug!(key = %key, level, "leaky bucket is full");
        }
        Ok(Admission {
            admitted: outcome.admitted,
            level,
            retry_after_secs,
        })
    }
}
