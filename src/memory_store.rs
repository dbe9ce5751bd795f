//! In-process [`CounterStore`].
//!
//! Backs single-instance deployments and the test suite. Expiry is driven by
//! the injected [`Clock`], so advancing a [`crate::clock::ManualClock`] expires
//! keys the same way waiting would on a real store.

use crate::algorithms::bucket::{BucketOp, BucketOutcome, BucketState};
use crate::clock::{Clock, SystemClock};
use crate::error::{ThrottlerError, ThrottlerResult};
use crate::store::{CounterStore, KeyTtl};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// How often, by the store's clock, expired keys are swept out of the map.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
enum Value {
    Counter(u64),
    Log(HashMap<String, i64>),
    Bucket(BucketState),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<SystemTime>,
}

pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
    last_sweep_ms: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            unavailable: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            last_sweep_ms: AtomicU64::new(0),
        }
    }

    /// Make every subsequent call fail as if the store were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every subsequent call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Read back a bucket record, mainly for assertions.
    pub fn bucket(&self, key: &str) -> ThrottlerResult<Option<BucketState>> {
        let now = self.clock.now();
        let mut entries = self.lock(now)?;
        match live_entry(&mut entries, key, now) {
            Some(Entry {
                value: Value::Bucket(state),
                ..
            }) => Ok(Some(*state)),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .lock()
            .map(|entries| {
                entries
                    .values()
                    .filter(|e| e.expires_at.map_or(true, |at| at > now))
                    .count()
            })
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn round_trip(&self) -> ThrottlerResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ThrottlerError::StoreUnavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    /// Lock the map, first sweeping expired keys if a sweep is due at `now`.
    ///
    /// Lazy expiry alone only frees a key when it is touched again, so keys
    /// that never come back would otherwise stay in the map.
    fn lock(&self, now: SystemTime) -> ThrottlerResult<MutexGuard<'_, HashMap<String, Entry>>> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| ThrottlerError::Internal("memory store lock poisoned".to_string()))?;

        let now_ms = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let last_ms = self.last_sweep_ms.load(Ordering::SeqCst);
        if now_ms.saturating_sub(last_ms) >= SWEEP_INTERVAL.as_millis() as u64 {
            let before = entries.len();
            entries.retain(|_, e| e.expires_at.map_or(true, |at| at > now));
            self.last_sweep_ms.store(now_ms, Ordering::SeqCst);
            if entries.len() < before {
                tracing::debug!(
                    evicted = before - entries.len(),
                    remaining = entries.len(),
                    "swept expired keys from memory store"
                );
            }
        }
        Ok(entries)
    }
}

fn wrong_type(key: &str) -> ThrottlerError {
    ThrottlerError::StoreUnavailable(format!(
        "WRONGTYPE operation against key {} holding the wrong kind of value",
        key
    ))
}

fn expiry(now: SystemTime, ttl: Duration) -> ThrottlerResult<SystemTime> {
    now.checked_add(ttl)
        .ok_or_else(|| ThrottlerError::Configuration(format!("ttl {:?} is out of range", ttl)))
}

/// Drop `key` if it has expired, then return whatever is left.
fn live_entry<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
    now: SystemTime,
) -> Option<&'a mut Entry> {
    let expired = entries
        .get(key)
        .and_then(|e| e.expires_at)
        .is_some_and(|at| at <= now);
    if expired {
        entries.remove(key);
    }
    entries.get_mut(key)
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn incr_with_ttl(&self, key: &str) -> ThrottlerResult<(u64, KeyTtl)> {
        self.round_trip().await?;
        let now = self.clock.now();
        let mut entries = self.lock(now)?;

        if live_entry(&mut entries, key, now).is_none() {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Counter(0),
                    expires_at: None,
                },
            );
        }
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| ThrottlerError::Internal("counter vanished".to_string()))?;

        let count = match &mut entry.value {
            Value::Counter(count) => {
                *count += 1;
                *count
            }
            _ => return Err(wrong_type(key)),
        };
        let ttl = match entry.expires_at {
            Some(at) => KeyTtl::Expires(at.duration_since(now).unwrap_or_default()),
            None => KeyTtl::Persistent,
        };
        Ok((count, ttl))
    }

    async fn expire_if_unset(&self, key: &str, ttl: Duration) -> ThrottlerResult<()> {
        self.round_trip().await?;
        let now = self.clock.now();
        let mut entries = self.lock(now)?;
        if let Some(entry) = live_entry(&mut entries, key, now) {
            if entry.expires_at.is_none() {
                entry.expires_at = Some(expiry(now, ttl)?);
            }
        }
        Ok(())
    }

    async fn count_since(&self, key: &str, cutoff_millis: i64) -> ThrottlerResult<u64> {
        self.round_trip().await?;
        let now = self.clock.now();
        let mut entries = self.lock(now)?;
        match live_entry(&mut entries, key, now) {
            Some(Entry {
                value: Value::Log(log),
                ..
            }) => Ok(log.values().filter(|&&score| score > cutoff_millis).count() as u64),
            Some(_) => Err(wrong_type(key)),
            None => Ok(0),
        }
    }

    async fn slide(
        &self,
        key: &str,
        cutoff_millis: i64,
        member: &str,
        score_millis: i64,
        ttl: Duration,
    ) -> ThrottlerResult<u64> {
        self.round_trip().await?;
        let now = self.clock.now();
        let mut entries = self.lock(now)?;

        if live_entry(&mut entries, key, now).is_none() {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Log(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| ThrottlerError::Internal("log vanished".to_string()))?;

        let Value::Log(log) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        log.retain(|_, score| *score > cutoff_millis);
        log.insert(member.to_string(), score_millis);
        let count = log.len() as u64;
        entry.expires_at = Some(expiry(now, ttl)?);
        Ok(count)
    }

    async fn apply_bucket(
        &self,
        key: &str,
        op: BucketOp,
        now_secs: i64,
    ) -> ThrottlerResult<BucketOutcome> {
        self.round_trip().await?;
        let now = self.clock.now();
        let mut entries = self.lock(now)?;

        let prior = match live_entry(&mut entries, key, now) {
            Some(Entry {
                value: Value::Bucket(state),
                ..
            }) => Some(*state),
            Some(_) => return Err(wrong_type(key)),
            None => None,
        };
        let outcome = op.apply(prior, now_secs);
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Bucket(outcome.state),
                expires_at: Some(expiry(now, op.idle_ttl())?),
            },
        );
        Ok(outcome)
    }

    async fn ping(&self) -> ThrottlerResult<()> {
        self.round_trip().await
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store() -> (MemoryStore, ManualClock) {
        let clock = ManualClock::at_unix(1_652_174_100);
        (MemoryStore::with_clock(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_incr_reports_missing_ttl_until_armed() {
        let (store, clock) = store();

        let (count, ttl) = store.incr_with_ttl("k").await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(ttl, KeyTtl::Persistent);

        store
            .expire_if_unset("k", Duration::from_secs(60))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(10));

        let (count, ttl) = store.incr_with_ttl("k").await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(ttl, KeyTtl::Expires(Duration::from_secs(50)));
    }

    #[tokio::test]
    async fn test_expire_if_unset_does_not_extend() {
        let (store, clock) = store();
        store.incr_with_ttl("k").await.unwrap();
        store
            .expire_if_unset("k", Duration::from_secs(60))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(30));
        store
            .expire_if_unset("k", Duration::from_secs(60))
            .await
            .unwrap();

        let (_, ttl) = store.incr_with_ttl("k").await.unwrap();
        assert_eq!(ttl.remaining(), Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_counter_expires_with_clock() {
        let (store, clock) = store();
        store.incr_with_ttl("k").await.unwrap();
        store
            .expire_if_unset("k", Duration::from_secs(1))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(1));
        let (count, ttl) = store.incr_with_ttl("k").await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(ttl, KeyTtl::Persistent);
    }

    #[tokio::test]
    async fn test_slide_drops_entries_at_cutoff() {
        let (store, _clock) = store();
        let ttl = Duration::from_secs(60);
        store.slide("log", 0, "a", 100, ttl).await.unwrap();
        store.slide("log", 0, "b", 200, ttl).await.unwrap();

        assert_eq!(store.count_since("log", 100).await.unwrap(), 1);

        let count = store.slide("log", 100, "c", 300, ttl).await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_wrong_type_is_an_error() {
        let (store, _clock) = store();
        store.incr_with_ttl("k").await.unwrap();
        let err = store.count_since("k", 0).await.unwrap_err();
        assert!(matches!(err, ThrottlerError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_calls() {
        let (store, _clock) = store();
        store.set_unavailable(true);
        assert!(store.ping().await.is_err());
        store.set_unavailable(false);
        assert!(store.ping().await.is_ok());
    }

    fn raw_len(store: &MemoryStore) -> usize {
        store.entries.lock().unwrap().len()
    }

    #[tokio::test]
    async fn test_expired_keys_are_swept_without_being_touched() {
        let (store, clock) = store();
        for i in 0..10_000 {
            let key = format!("fixed_window:client-{}", i);
            store.incr_with_ttl(&key).await.unwrap();
            store
                .expire_if_unset(&key, Duration::from_secs(1))
                .await
                .unwrap();
        }
        assert_eq!(raw_len(&store), 10_000);

        clock.advance(Duration::from_secs(3600));
        store.incr_with_ttl("fixed_window:latecomer").await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(raw_len(&store), 1);
    }

    #[tokio::test]
    async fn test_sweep_keeps_live_keys() {
        let (store, clock) = store();
        store.incr_with_ttl("short").await.unwrap();
        store
            .expire_if_unset("short", Duration::from_secs(1))
            .await
            .unwrap();
        store.incr_with_ttl("long").await.unwrap();
        store
            .expire_if_unset("long", Duration::from_secs(600))
            .await
            .unwrap();

        clock.advance(SWEEP_INTERVAL);
        store.ping().await.unwrap();
        store.count_since("absent", 0).await.unwrap();

        assert_eq!(raw_len(&store), 1);
        let (count, _) = store.incr_with_ttl("long").await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_bucket_record_expires_after_idle_ttl() {
        let (store, clock) = store();
        let op = BucketOp::Take {
            rate: 1.0,
            capacity: 2.0,
            amount: 1.0,
        };
        store
            .apply_bucket("b", op, clock.unix_seconds())
            .await
            .unwrap();
        assert!(store.bucket("b").unwrap().is_some());

        clock.advance(op.idle_ttl());
        assert!(store.bucket("b").unwrap().is_none());
        assert!(store.is_empty());
    }
}
