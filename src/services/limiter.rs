//! Bound on simultaneous remote requests.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{AppError, Result};

/// Process-wide cap on in-flight remote calls.
///
/// Waiters are served in arrival order; a released permit is handed straight
/// to the longest waiter.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyLimiter {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a permit. Dropping the permit releases it.
    pub async fn acquire(&self) -> Result<RequestPermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| AppError::crawl("concurrency limiter", e))?;
        Ok(RequestPermit { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// A held request slot, released on drop.
#[derive(Debug)]
pub struct RequestPermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::sync::mpsc;

    #[tokio::test]
    async fn acquire_returns_immediately_while_permits_remain() {
        let limiter = ConcurrencyLimiter::new(2);
        let a = limiter.acquire().await.unwrap();
        let b = limiter.acquire().await.unwrap();
        assert_eq!(limiter.available(), 0);
        drop(a);
        drop(b);
        assert_eq!(limiter.available(), 2);
    }

    #[tokio::test]
    async fn second_acquisition_waits_for_first_release() {
        let limiter = ConcurrencyLimiter::new(1);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first = limiter.acquire().await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let _permit = limiter.acquire().await.unwrap();
                tx.send("acquired").unwrap();
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send("released").unwrap();
        drop(first);

        waiter.await.unwrap();
        assert_eq!(rx.recv().await, Some("released"));
        assert_eq!(rx.recv().await, Some("acquired"));
    }

    #[tokio::test]
    async fn waiters_are_served_in_arrival_order() {
        let limiter = ConcurrencyLimiter::new(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let held = limiter.acquire().await.unwrap();

        let mut handles = Vec::new();
        for n in 0..3 {
            let limiter = limiter.clone();
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire().await.unwrap();
                tx.send(n).unwrap();
            }));
            // Let each waiter enqueue before spawning the next.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        drop(held);
        for handle in handles {
            handle.await.unwrap();
        }
        drop(tx);

        let mut order = Vec::new();
        while let Some(n) = rx.recv().await {
            order.push(n);
        }
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        assert_eq!(ConcurrencyLimiter::new(0).capacity(), 1);
    }
}
