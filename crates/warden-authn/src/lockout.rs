//! In-memory login attempt lockout
//!
//! Counts failed password attempts per `(username, client IP)` inside a
//! sliding TTL window. Deployments with more than one instance back this
//! with shared storage instead; the trait boundary is the same.

use moka::future::Cache;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use async_trait::async_trait;
use warden_core::{AuthnError, LoginAttemptService, Result};

pub struct MemoryLoginAttempts {
    max_attempts: u32,
    attempts: Cache<String, Arc<AtomicU32>>,
}

impl MemoryLoginAttempts {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        let attempts = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(window)
            .build();
        Self {
            max_attempts,
            attempts,
        }
    }

    fn key(username: &str, client_ip: &str) -> String {
        // Usernames are folded so `Admin` and `admin` share a counter.
        format!("{}:{}", username.to_lowercase(), client_ip)
    }
}

#[async_trait]
impl LoginAttemptService for MemoryLoginAttempts {
    async fn validate(&self, username: &str, client_ip: &str) -> Result<()> {
        let key = Self::key(username, client_ip);
        if let Some(counter) = self.attempts.get(&key).await {
            if counter.load(Ordering::Relaxed) >= self.max_attempts {
                warn!(username, client_ip, "login locked out");
                return Err(AuthnError::TooManyAttempts);
            }
        }
        Ok(())
    }

    async fn record_failure(&self, username: &str, client_ip: &str) -> Result<()> {
        let key = Self::key(username, client_ip);
        let counter = self
            .attempts
            .get_with(key, async { Arc::new(AtomicU32::new(0)) })
            .await;
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn reset(&self, username: &str, client_ip: &str) -> Result<()> {
        self.attempts.invalidate(&Self::key(username, client_ip)).await;
        Ok(())
    }
}
