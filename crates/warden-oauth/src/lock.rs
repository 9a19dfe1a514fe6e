//! Cross-process refresh serialization
//!
//! Most providers rotate refresh tokens on use, so two instances refreshing
//! the same identity concurrently would invalidate each other's tokens. A
//! [`ServerLock`] entry keyed by identity serializes them fleet-wide.
//! Deployments back this with a shared store; [`MemoryServerLock`] covers
//! single-instance setups and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use warden_core::{AuthnError, Result};

#[async_trait]
pub trait ServerLock: Send + Sync {
    /// Attempts to take the lock, returning false when it is already held.
    /// The entry expires after `ttl` even if never released.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool>;
    async fn release(&self, key: &str) -> Result<()>;
}

/// In-process lock table with TTL entries.
#[derive(Default)]
pub struct MemoryServerLock {
    held: DashMap<String, Instant>,
}

impl MemoryServerLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServerLock for MemoryServerLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        match self.held.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if *entry.get() > now {
                    return Ok(false);
                }
                entry.insert(now + ttl);
                Ok(true)
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(now + ttl);
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str) -> Result<()> {
        self.held.remove(key);
        Ok(())
    }
}

/// Retry policy for taking the refresh lock.
#[derive(Debug, Clone)]
pub struct LockRetryConfig {
    pub attempts: u32,
    /// Backoff between attempts is drawn uniformly from
    /// `[min_backoff, max_backoff]` so retrying instances spread out.
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    /// How long a taken lock survives a crashed holder.
    pub ttl: Duration,
}

impl Default for LockRetryConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            min_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            ttl: Duration::from_secs(30),
        }
    }
}

/// Takes the lock with bounded, jittered retries. Exhausting every attempt
/// fails with [`AuthnError::RetriesExhausted`].
pub async fn acquire_with_retries(
    lock: &dyn ServerLock,
    key: &str,
    config: &LockRetryConfig,
) -> Result<()> {
    for attempt in 0..config.attempts {
        if lock.try_acquire(key, config.ttl).await? {
            return Ok(());
        }
        if attempt + 1 < config.attempts {
            let spread = config.max_backoff.saturating_sub(config.min_backoff);
            let backoff = config.min_backoff + spread.mul_f64(rand::random::<f64>());
            debug!(key, attempt, ?backoff, "refresh lock busy, backing off");
            tokio::time::sleep(backoff).await;
        }
    }
    Err(AuthnError::RetriesExhausted)
}
