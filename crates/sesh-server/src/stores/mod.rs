//! External key-value stores backing the rate limiter and device presence.
//!
//! [`redis::RedisStore`] is the production backend. The in-memory stores in
//! [`crate::ratelimit`] and [`crate::presence`] serve single-process
//! deployments and tests.

pub mod redis;

use std::future::Future;
use std::time::Duration;

/// Errors from a backing store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Redis command or connection failure.
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// The store did not answer in time.
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
}

/// Convenience alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Bound a store call by `limit`.
pub async fn bounded<T>(limit: Duration, call: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test(start_paused = true)]
    async fn bounded_times_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(1)
        };
        let err = bounded(Duration::from_secs(2), slow).await.unwrap_err();
        assert_matches!(err, StoreError::Timeout(d) if d == Duration::from_secs(2));
    }

    #[tokio::test]
    async fn bounded_passes_through() {
        let value = bounded(Duration::from_secs(1), async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
