//! Redis-backed [`CounterStore`].
//!
//! Window updates go out as `MULTI`/`EXEC` pipelines. Bucket updates run as a
//! Lua script, so the read, the refill/leak arithmetic and the write happen as
//! one unit on the server no matter how many instances share the key.
//!
//! `tests/redis_store.rs` runs these against a live server.

use crate::algorithms::bucket::{BucketOp, BucketOutcome, BucketState};
use crate::error::{ThrottlerError, ThrottlerResult};
use crate::store::{CounterStore, KeyTtl};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

/// Mirrors [`BucketOp::apply`]. ARGV: mode, rate, capacity, amount, now, ttl.
const BUCKET_LUA: &str = r#"
local mode = ARGV[1]
local rate = tonumber(ARGV[2])
local capacity = tonumber(ARGV[3])
local amount = tonumber(ARGV[4])
local now = tonumber(ARGV[5])
local ttl = tonumber(ARGV[6])

local record = redis.call('HMGET', KEYS[1], 'count', 'last_update')
local count = tonumber(record[1])
local last = tonumber(record[2])
if count == nil or last == nil then
  if mode == 'take' then count = capacity else count = 0 end
  last = now
end
if now < last then now = last end

local elapsed = now - last
local admitted = 0
if mode == 'take' then
  count = math.min(capacity, math.max(0, count + elapsed * rate))
  if count >= amount then
    count = count - amount
    admitted = 1
  end
else
  count = math.min(capacity, math.max(0, count - elapsed * rate))
  if count < capacity then
    count = math.min(capacity, count + 1)
    admitted = 1
  end
end

redis.call('HSET', KEYS[1], 'count', tostring(count), 'last_update', now)
redis.call('EXPIRE', KEYS[1], ttl)
return {admitted, tostring(count), now}
"#;

static BUCKET_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(BUCKET_LUA));

pub struct RedisStore {
    connection: ConnectionManager,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to `redis_url` (e.g. `redis://127.0.0.1:6379`).
    ///
    /// The connection manager reconnects on its own after transient failures;
    /// calls made while it is down fail with `StoreUnavailable`.
    pub async fn connect(redis_url: &str) -> ThrottlerResult<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            ThrottlerError::Configuration(format!("invalid Redis URL {}: {}", redis_url, e))
        })?;
        let connection = ConnectionManager::new(client).await.map_err(|e| {
            ThrottlerError::StoreUnavailable(format!("failed to connect to Redis: {}", e))
        })?;

        tracing::info!(redis_url = %redis_url, "connected to Redis");
        Ok(Self { connection })
    }

    fn conn(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn incr_with_ttl(&self, key: &str) -> ThrottlerResult<(u64, KeyTtl)> {
        let mut conn = self.conn();
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("INCR").arg(key).cmd("PTTL").arg(key);

        let (count, pttl): (u64, i64) = pipe.query_async(&mut conn).await?;
        Ok((count, KeyTtl::from_pttl(pttl)))
    }

    async fn expire_if_unset(&self, key: &str, ttl: Duration) -> ThrottlerResult<()> {
        let mut conn = self.conn();
        redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl.as_millis() as u64)
            .arg("NX")
            .query_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn count_since(&self, key: &str, cutoff_millis: i64) -> ThrottlerResult<u64> {
        let mut conn = self.conn();
        let count: u64 = redis::cmd("ZCOUNT")
            .arg(key)
            .arg(format!("({}", cutoff_millis))
            .arg("+inf")
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn slide(
        &self,
        key: &str,
        cutoff_millis: i64,
        member: &str,
        score_millis: i64,
        ttl: Duration,
    ) -> ThrottlerResult<u64> {
        let mut conn = self.conn();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(cutoff_millis)
            .ignore()
            .cmd("ZADD")
            .arg(key)
            .arg(score_millis)
            .arg(member)
            .ignore()
            .cmd("ZCARD")
            .arg(key)
            .cmd("PEXPIRE")
            .arg(key)
            .arg(ttl.as_millis() as u64)
            .ignore();

        let (count,): (u64,) = pipe.query_async(&mut conn).await?;
        Ok(count)
    }

    async fn apply_bucket(
        &self,
        key: &str,
        op: BucketOp,
        now_secs: i64,
    ) -> ThrottlerResult<BucketOutcome> {
        let (mode, amount) = match op {
            BucketOp::Take { amount, .. } => ("take", amount),
            BucketOp::Pour { .. } => ("pour", 1.0),
        };

        let mut conn = self.conn();
        let (admitted, count, last_update): (i64, String, i64) = BUCKET_SCRIPT
            .key(key)
            .arg(mode)
            .arg(op.rate())
            .arg(op.capacity())
            .arg(amount)
            .arg(now_secs)
            .arg(op.idle_ttl().as_secs())
            .invoke_async(&mut conn)
            .await?;

        let count = count.parse::<f64>().map_err(|e| {
            ThrottlerError::Internal(format!("bucket script returned bad count {:?}: {}", count, e))
        })?;

        Ok(BucketOutcome {
            admitted: admitted == 1,
            state: BucketState { count, last_update },
        })
    }

    async fn ping(&self) -> ThrottlerResult<()> {
        let mut conn = self.conn();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
