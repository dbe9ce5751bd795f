//! The Shared Counter Store contract.
//!
//! Each method is one round trip and one atomic unit on the store side.
//! Algorithms compose these and never cache what they read.

use crate::algorithms::bucket::{BucketOp, BucketOutcome};
use crate::error::ThrottlerResult;
use async_trait::async_trait;
use std::time::Duration;

/// Remaining lifetime of a key as reported alongside an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key does not exist.
    Missing,
    /// Key exists without an expiry.
    Persistent,
    Expires(Duration),
}

impl KeyTtl {
    /// Decode a Redis `PTTL` reply.
    pub fn from_pttl(millis: i64) -> Self {
        match millis {
            -2 => KeyTtl::Missing,
            m if m < 0 => KeyTtl::Persistent,
            m => KeyTtl::Expires(Duration::from_millis(m as u64)),
        }
    }

    pub fn remaining(&self) -> Option<Duration> {
        match self {
            KeyTtl::Expires(d) => Some(*d),
            _ => None,
        }
    }
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the integer at `key` and read its TTL in the same batch.
    async fn incr_with_ttl(&self, key: &str) -> ThrottlerResult<(u64, KeyTtl)>;

    /// Arm a TTL on `key` unless one is already set.
    async fn expire_if_unset(&self, key: &str, ttl: Duration) -> ThrottlerResult<()>;

    /// Count log entries at `key` scored strictly after `cutoff_millis`.
    async fn count_since(&self, key: &str, cutoff_millis: i64) -> ThrottlerResult<u64>;

    /// In one atomic batch: drop entries scored at or before `cutoff_millis`,
    /// add `member` at `score_millis`, re-arm the purge `ttl`, and return the
    /// number of entries left.
    async fn slide(
        &self,
        key: &str,
        cutoff_millis: i64,
        member: &str,
        score_millis: i64,
        ttl: Duration,
    ) -> ThrottlerResult<u64>;

    /// Atomically read, transition and write the bucket record at `key`.
    async fn apply_bucket(
        &self,
        key: &str,
        op: BucketOp,
        now_secs: i64,
    ) -> ThrottlerResult<BucketOutcome>;

    async fn ping(&self) -> ThrottlerResult<()>;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pttl_decoding() {
        assert_eq!(KeyTtl::from_pttl(-2), KeyTtl::Missing);
        assert_eq!(KeyTtl::from_pttl(-1), KeyTtl::Persistent);
        assert_eq!(
            KeyTtl::from_pttl(1_500),
            KeyTtl::Expires(Duration::from_millis(1_500))
        );
        assert_eq!(KeyTtl::Persistent.remaining(), None);
    }
}
