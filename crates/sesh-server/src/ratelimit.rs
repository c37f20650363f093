//! Fixed-window rate limiting keyed by command and session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sesh_core::SessionId;
use sesh_settings::RateLimitRule;
use tokio::time::Instant;
use tracing::debug;

use crate::stores::{self, Result};

/// Atomic increment-and-expire primitive.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` and return the new count. Missing keys start at zero.
    async fn incr(&self, key: &str) -> Result<i64>;
    /// Expire `key` after `ttl`, at millisecond precision.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;
}

/// Per-command, per-session fixed-window limiter.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    timeout: Duration,
}

impl RateLimiter {
    /// Wrap a counter store. Each store call is bounded by `timeout`.
    pub fn new(store: Arc<dyn CounterStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Counter key for a command and session.
    pub fn key(command: &str, session_id: &SessionId) -> String {
        format!("ratelimits:{command}/{session_id}")
    }

    /// Count one invocation and report whether it fits in the window.
    ///
    /// The first increment in a window starts the window's expiry.
    pub async fn allow(
        &self,
        command: &str,
        session_id: &SessionId,
        rule: RateLimitRule,
    ) -> Result<bool> {
        let key = Self::key(command, session_id);
        let count = stores::bounded(self.timeout, self.store.incr(&key)).await?;
        if count == 1 {
            let window = Duration::from_millis(rule.interval_ms);
            stores::bounded(self.timeout, self.store.expire(&key, window)).await?;
        }
        let allowed = count <= i64::from(rule.limit);
        if !allowed {
            debug!(command, session_id = %session_id, count, limit = rule.limit, "rate limited");
        }
        Ok(allowed)
    }
}

// ── In-memory store ─────────────────────────────────────────────────

struct Counter {
    count: i64,
    expires_at: Option<Instant>,
}

/// Process-local counter store for single-instance deployments and tests.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, Counter>>,
}

impl MemoryCounterStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str) -> Result<i64> {
        let now = Instant::now();
        let mut counters = self.counters.lock();
        counters.retain(|_, c| c.expires_at.is_none_or(|at| at > now));
        let counter = counters.entry(key.to_owned()).or_insert(Counter {
            count: 0,
            expires_at: None,
        });
        counter.count += 1;
        Ok(counter.count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        if let Some(counter) = self.counters.lock().get_mut(key) {
            counter.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::StoreError;
    use assert_matches::assert_matches;

    fn limiter() -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryCounterStore::new()), Duration::from_secs(1))
    }

    #[test]
    fn key_format() {
        let id = SessionId::from("abc");
        assert_eq!(RateLimiter::key("SendMessage", &id), "ratelimits:SendMessage/abc");
    }

    #[tokio::test(start_paused = true)]
    async fn excess_attempts_blocked_until_window_ends() {
        let limiter = limiter();
        let id = SessionId::from("s1");
        let rule = RateLimitRule::new(10_000, 3);

        for _ in 0..3 {
            assert!(limiter.allow("Join", &id, rule).await.unwrap());
        }
        assert!(!limiter.allow("Join", &id, rule).await.unwrap());
        assert!(!limiter.allow("Join", &id, rule).await.unwrap());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(limiter.allow("Join", &id, rule).await.unwrap());
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = limiter();
        let rule = RateLimitRule::new(10_000, 1);
        let a = SessionId::from("a");
        let b = SessionId::from("b");
        assert!(limiter.allow("Join", &a, rule).await.unwrap());
        assert!(limiter.allow("Join", &b, rule).await.unwrap());
        assert!(limiter.allow("CreateGroup", &a, rule).await.unwrap());
        assert!(!limiter.allow("Join", &a, rule).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn fractional_second_window_is_honored() {
        let limiter = limiter();
        let id = SessionId::from("s");
        let rule = RateLimitRule::new(1500, 1);
        assert!(limiter.allow("X", &id, rule).await.unwrap());

        tokio::time::advance(Duration::from_millis(1200)).await;
        assert!(!limiter.allow("X", &id, rule).await.unwrap());

        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(limiter.allow("X", &id, rule).await.unwrap());
    }

    struct StalledStore;

    #[async_trait]
    impl CounterStore for StalledStore {
        async fn incr(&self, _key: &str) -> Result<i64> {
            std::future::pending().await
        }
        async fn expire(&self, _key: &str, _ttl: Duration) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_store_times_out() {
        let limiter = RateLimiter::new(Arc::new(StalledStore), Duration::from_millis(50));
        let err = limiter
            .allow("Join", &SessionId::from("s"), RateLimitRule::new(1000, 1))
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::Timeout(_));
    }
}
