//! Redis-backed throttle store.
//!
//! Keys are plain strings with `EX` expiry, so several service instances can
//! share throttling state. `set_if_absent` maps to `SET key value NX EX ttl`,
//! `incr_capped` to a Lua script and `take` to `GETDEL`.

use anyhow::{Context, Result};
use redis::{AsyncCommands, Script, aio::ConnectionManager};
use std::time::Duration;
use tracing::{Instrument, info_span};

use super::store::{StoreFuture, ThrottleStore};

#[derive(Clone)]
pub struct RedisThrottleStore {
    conn: ConnectionManager,
}

impl RedisThrottleStore {
    /// Connect to Redis and keep a reconnecting multiplexed connection.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the first connection fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("Invalid Redis URL")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;
        Ok(Self { conn })
    }
}

impl std::fmt::Debug for RedisThrottleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisThrottleStore").finish_non_exhaustive()
    }
}

// Returns the incremented value, or -1 when the counter already reached ARGV[1].
const INCR_CAPPED_SCRIPT: &str = r"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current == nil then
    return redis.error_reply('counter is not an integer')
end
if current >= tonumber(ARGV[1]) then
    return -1
end
local count = redis.call('INCR', KEYS[1])
redis.call('EXPIRE', KEYS[1], ARGV[2])
return count
";

fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

impl ThrottleStore for RedisThrottleStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let span = info_span!("redis.command", db.system = "redis", db.operation = "GET");
            let value: Option<String> = conn
                .get(key)
                .instrument(span)
                .await
                .with_context(|| format!("failed to read {key}"))?;
            Ok(value)
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str, ttl: Duration) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let span = info_span!("redis.command", db.system = "redis", db.operation = "SET");
            let _: () = conn
                .set_ex(key, value, ttl_seconds(ttl))
                .instrument(span)
                .await
                .with_context(|| format!("failed to write {key}"))?;
            Ok(())
        })
    }

    fn set_if_absent<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Duration,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let span = info_span!(
                "redis.command",
                db.system = "redis",
                db.operation = "SET NX"
            );
            // Redis replies "OK" when written and nil when the key already exists.
            let reply: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("EX")
                .arg(ttl_seconds(ttl))
                .query_async(&mut conn)
                .instrument(span)
                .await
                .with_context(|| format!("failed to claim {key}"))?;
            Ok(reply.is_some())
        })
    }

    fn incr_capped<'a>(
        &'a self,
        key: &'a str,
        limit: u32,
        ttl: Duration,
    ) -> StoreFuture<'a, Option<u32>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let span = info_span!(
                "redis.command",
                db.system = "redis",
                db.operation = "EVALSHA"
            );
            let reply: i64 = Script::new(INCR_CAPPED_SCRIPT)
                .key(key)
                .arg(limit)
                .arg(ttl_seconds(ttl))
                .invoke_async(&mut conn)
                .instrument(span)
                .await
                .with_context(|| format!("failed to increment {key}"))?;
            capped_reply(reply).with_context(|| format!("unexpected reply for {key}"))
        })
    }

    fn take<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let span = info_span!("redis.command", db.system = "redis", db.operation = "GETDEL");
            let value: Option<String> = redis::cmd("GETDEL")
                .arg(key)
                .query_async(&mut conn)
                .instrument(span)
                .await
                .with_context(|| format!("failed to take {key}"))?;
            Ok(value)
        })
    }

    fn delete<'a>(&'a self, keys: &'a [&'a str]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            if keys.is_empty() {
                return Ok(());
            }
            let mut conn = self.conn.clone();
            let span = info_span!("redis.command", db.system = "redis", db.operation = "DEL");
            let _: () = conn
                .del(keys)
                .instrument(span)
                .await
                .context("failed to delete OTP keys")?;
            Ok(())
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let span = info_span!("redis.ping", db.system = "redis", db.operation = "PING");
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .instrument(span)
                .await
                .context("failed to ping Redis")?;
            Ok(())
        })
    }
}

fn capped_reply(reply: i64) -> Result<Option<u32>> {
    if reply < 0 {
        return Ok(None);
    }
    u32::try_from(reply).map(Some).context("counter out of range")
}
