//! Per-request concurrency limiting.
//!
//! Every [`Request`](crate::Request) owns one [`RateLimiter`], created with
//! the request's concurrency limit. The limiter bounds how many executions of
//! that request are in flight at the same time; it says nothing about other
//! requests in the same batch.

use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::{ErrorKind, Result};

/// Bounds concurrent executions of a single request.
///
/// Clones share the underlying slots. A request replicated into N queue
/// entries is therefore still capped at its own limit: the surplus entries
/// queue up on the semaphore in FIFO order.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl RateLimiter {
    /// Create a limiter with the given number of slots.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConcurrency`] if `limit` is zero.
    pub fn new(limit: usize) -> Result<Self> {
        if limit == 0 {
            return Err(ErrorKind::InvalidConcurrency(limit));
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        })
    }

    /// Wait until a slot is free and take it.
    ///
    /// The slot is held until the returned permit is dropped, on every exit
    /// path. Waiters are admitted in the order they called `acquire`.
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        self.semaphore
            .acquire()
            .await
            // SAFETY: this should not panic as we never close the semaphore
            .expect("Semaphore was closed unexpectedly")
    }

    /// The configured number of slots
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Slots not currently held
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_zero_limit_is_rejected() {
        assert!(matches!(
            RateLimiter::new(0),
            Err(ErrorKind::InvalidConcurrency(0))
        ));
    }

    #[tokio::test]
    async fn test_acquire_takes_and_returns_slots() {
        let limiter = RateLimiter::new(2).unwrap();
        assert_eq!(limiter.available_slots(), 2);

        let first = limiter.acquire().await;
        let second = limiter.acquire().await;
        assert_eq!(limiter.available_slots(), 0);

        drop(first);
        assert_eq!(limiter.available_slots(), 1);
        drop(second);
        assert_eq!(limiter.available_slots(), 2);
    }

    #[tokio::test]
    async fn test_clones_share_slots() {
        let limiter = RateLimiter::new(1).unwrap();
        let clone = limiter.clone();

        let permit = limiter.acquire().await;
        assert_eq!(clone.available_slots(), 0);
        drop(permit);
        assert_eq!(clone.available_slots(), 1);
    }
}
