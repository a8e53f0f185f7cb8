//! Throttle store abstraction and the in-memory implementation.
//!
//! The store holds every piece of OTP state as an independent key with a TTL.
//! An expired key must be indistinguishable from a key that was never set.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Key-value store with per-key expiry (second granularity).
pub trait ThrottleStore: Send + Sync {
    /// Read a key; `None` when absent or expired.
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    /// Write a key, replacing any previous value and TTL.
    fn set<'a>(&'a self, key: &'a str, value: &'a str, ttl: Duration) -> StoreFuture<'a, ()>;

    /// Atomically write a key only if it is absent. Returns `true` when written.
    fn set_if_absent<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Duration,
    ) -> StoreFuture<'a, bool>;

    /// Atomically increment a counter and refresh its TTL, unless it already
    /// holds `limit` or more. Returns the new value, or `None` when capped
    /// (nothing written). An absent counter counts as zero.
    fn incr_capped<'a>(
        &'a self,
        key: &'a str,
        limit: u32,
        ttl: Duration,
    ) -> StoreFuture<'a, Option<u32>>;

    /// Atomically read and remove a key.
    fn take<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    /// Remove keys; missing keys are ignored.
    fn delete<'a>(&'a self, keys: &'a [&'a str]) -> StoreFuture<'a, ()>;

    /// Round-trip to the backend, used by `/health`.
    fn ping(&self) -> StoreFuture<'_, ()>;
}

#[derive(Debug)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

#[derive(Debug)]
struct MemoryState {
    entries: HashMap<String, MemoryEntry>,
    // Added to `Instant::now()` so tests can move time forward.
    skew: Duration,
}

impl MemoryState {
    fn now(&self) -> Instant {
        Instant::now() + self.skew
    }

    fn live(&mut self, key: &str) -> Option<&MemoryEntry> {
        let now = self.now();
        if self
            .entries
            .get(key)
            .is_some_and(|entry| entry.expires_at <= now)
        {
            self.entries.remove(key);
        }
        self.entries.get(key)
    }
}

/// Process-local store for tests and single-instance development.
///
/// Time can be advanced with [`MemoryThrottleStore::advance`] to simulate TTL
/// expiry without sleeping.
#[derive(Debug)]
pub struct MemoryThrottleStore {
    state: Mutex<MemoryState>,
}

impl MemoryThrottleStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                entries: HashMap::new(),
                skew: Duration::ZERO,
            }),
        }
    }

    /// Move the store clock forward.
    pub async fn advance(&self, by: Duration) {
        let mut state = self.state.lock().await;
        state.skew += by;
    }

    /// Remaining lifetime of a key, rounded up to whole seconds like Redis `TTL`.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let mut state = self.state.lock().await;
        let now = state.now();
        state.live(key).map(|entry| {
            let left = entry.expires_at.saturating_duration_since(now);
            let seconds = left.as_secs() + u64::from(left.subsec_nanos() > 0);
            Duration::from_secs(seconds)
        })
    }

    pub async fn contains(&self, key: &str) -> bool {
        let mut state = self.state.lock().await;
        state.live(key).is_some()
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let mut state = self.state.lock().await;
        let now = state.now();
        state.entries.retain(|_, entry| entry.expires_at > now);
        state.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryThrottleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ThrottleStore for MemoryThrottleStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            Ok(state.live(key).map(|entry| entry.value.clone()))
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str, ttl: Duration) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let expires_at = state.now() + ttl;
            state.entries.insert(
                key.to_string(),
                MemoryEntry {
                    value: value.to_string(),
                    expires_at,
                },
            );
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
            let mut state = self.state.lock().await;
            if state.live(key).is_some() {
                return Ok(false);
            }
            let expires_at = state.now() + ttl;
            state.entries.insert(
                key.to_string(),
                MemoryEntry {
                    value: value.to_string(),
                    expires_at,
                },
            );
            Ok(true)
        })
    }

    fn incr_capped<'a>(
        &'a self,
        key: &'a str,
        limit: u32,
        ttl: Duration,
    ) -> StoreFuture<'a, Option<u32>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let current = match state.live(key) {
                Some(entry) => entry
                    .value
                    .trim()
                    .parse::<u32>()
                    .with_context(|| format!("corrupt counter at {key}: {:?}", entry.value))?,
                None => 0,
            };
            if current >= limit {
                return Ok(None);
            }
            let next = current + 1;
            let expires_at = state.now() + ttl;
            state.entries.insert(
                key.to_string(),
                MemoryEntry {
                    value: next.to_string(),
                    expires_at,
                },
            );
            Ok(Some(next))
        })
    }

    fn take<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.live(key).is_none() {
                return Ok(None);
            }
            Ok(state.entries.remove(key).map(|entry| entry.value))
        })
    }

    fn delete<'a>(&'a self, keys: &'a [&'a str]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            for key in keys {
                state.entries.remove(*key);
            }
            Ok(())
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}
