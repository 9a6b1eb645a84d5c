use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use super::waiter::{Waiter, WaiterOutcome};
use crate::error::{AcquireError, ConfigError, DisposedError, RateLimitExceeded};
use crate::stats::Statistics;

const ALGO: &str = "LeakyBucket";

/// Construction parameters for [`LeakyBucketLimiter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeakyBucketOptions {
    pub capacity: u64,
    #[serde(with = "crate::config::duration_millis")]
    pub leak_interval: Duration,
}

impl LeakyBucketOptions {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::new("capacity must be greater than 0"));
        }
        if self.leak_interval.is_zero() {
            return Err(ConfigError::new("leak_interval must be greater than 0"));
        }
        Ok(())
    }
}

struct Inner {
    capacity: u64,
    leak_interval: Duration,
    queue: Mutex<VecDeque<Arc<Waiter>>>,
    acquired: AtomicU64,
    rejected: AtomicU64,
    disposed: AtomicBool,
    leak_task: Mutex<Option<JoinHandle<()>>>,
}

/// FIFO queue with periodic drain and immediate-overflow rejection.
/// Produces exactly one resolution per `leak_interval` regardless of
/// input burst shape.
#[derive(Clone)]
pub struct LeakyBucketLimiter(Arc<Inner>);

impl LeakyBucketLimiter {
    pub fn new(opts: LeakyBucketOptions) -> Result<Self, ConfigError> {
        opts.validate()?;
        let inner = Arc::new(Inner {
            capacity: opts.capacity,
            leak_interval: opts.leak_interval,
            queue: Mutex::new(VecDeque::new()),
            acquired: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            leak_task: Mutex::new(None),
        });

        let task_inner = inner.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(task_inner.leak_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                Self::on_leak(&task_inner).await;
            }
        });
        *inner.leak_task.try_lock().expect("uncontended") = Some(handle);

        Ok(Self(inner))
    }

    async fn on_leak(inner: &Inner) {
        let mut q = inner.queue.lock().await;
        if let Some(waiter) = q.pop_front() {
            if waiter.is_pending() && waiter.grant() {
                inner.acquired.fetch_add(1, Ordering::Relaxed);
            }
            // A non-pending head is an already-admitted `try_acquire`
            // placeholder (counted at admission time) — drop silently.
        }
    }

    pub async fn try_acquire(&self) -> Result<bool, DisposedError> {
        if self.0.disposed.load(Ordering::Acquire) {
            return Err(DisposedError);
        }
        let mut q = self.0.queue.lock().await;
        if (q.len() as u64) < self.0.capacity {
            let waiter = Waiter::new();
            waiter.grant();
            q.push_back(waiter);
            self.0.acquired.fetch_add(1, Ordering::Relaxed);
            Ok(true)
        } else {
            self.0.rejected.fetch_add(1, Ordering::Relaxed);
            Ok(false)
        }
    }

    pub async fn acquire(&self, deadline: Option<Instant>) -> Result<(), AcquireError> {
        if self.0.disposed.load(Ordering::Acquire) {
            return Err(DisposedError.into());
        }

        let waiter = {
            let mut q = self.0.queue.lock().await;
            if (q.len() as u64) >= self.0.capacity {
                self.0.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(AcquireError::from(
                    RateLimitExceeded::new(ALGO, "queue is full")
                        .with_retry_after(self.0.leak_interval),
                ));
            }
            let waiter = Waiter::new();
            q.push_back(waiter.clone());
            waiter
        };

        let outcome = match deadline {
            None => waiter.wait().await,
            Some(dl) => {
                tokio::select! {
                    biased;
                    o = waiter.wait() => o,
                    _ = tokio::time::sleep_until(dl) => {
                        if waiter.fail() {
                            let position = self.remove_from_queue_with_position(&waiter).await;
                            self.0.rejected.fetch_add(1, Ordering::Relaxed);
                            return Err(AcquireError::from(
                                RateLimitExceeded::new(ALGO, "deadline expired while queued")
                                    .with_retry_after(self.0.leak_interval * position),
                            ));
                        }
                        waiter.wait().await
                    }
                }
            }
        };

        match outcome {
            WaiterOutcome::Granted => Ok(()),
            WaiterOutcome::Failed => {
                if self.0.disposed.load(Ordering::Acquire) {
                    Err(DisposedError.into())
                } else {
                    self.0.rejected.fetch_add(1, Ordering::Relaxed);
                    Err(AcquireError::from(
                        RateLimitExceeded::new(ALGO, "deadline expired while queued")
                            .with_retry_after(self.0.leak_interval),
                    ))
                }
            }
        }
    }

    /// Remove `waiter` from the queue and report its 1-based position at
    /// the moment of removal (used to scale the retry-after estimate by
    /// how many leak ticks remained ahead of it).
    async fn remove_from_queue_with_position(&self, waiter: &Arc<Waiter>) -> u32 {
        let mut q = self.0.queue.lock().await;
        let position = q
            .iter()
            .position(|w| Arc::ptr_eq(w, waiter))
            .map(|idx| idx as u32 + 1)
            .unwrap_or(1);
        q.retain(|w| !Arc::ptr_eq(w, waiter));
        position
    }

    pub async fn statistics(&self) -> Result<Statistics, DisposedError> {
        if self.0.disposed.load(Ordering::Acquire) {
            return Err(DisposedError);
        }
        let q = self.0.queue.lock().await;
        let depth = q.iter().filter(|w| w.is_pending()).count();
        Ok(Statistics {
            permits_acquired: self.0.acquired.load(Ordering::Relaxed),
            permits_rejected: self.0.rejected.load(Ordering::Relaxed),
            current_permits: self.0.capacity.saturating_sub(q.len() as u64),
            max_permits: self.0.capacity,
            queue_depth: depth,
        })
    }

    pub async fn release(&self) -> Result<(), DisposedError> {
        if self.0.disposed.load(Ordering::Acquire) {
            return Err(DisposedError);
        }
        Ok(())
    }

    pub async fn dispose(&self) {
        if self.0.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(algorithm = ALGO, "disposing rate limiter");
        if let Some(handle) = self.0.leak_task.lock().await.take() {
            handle.abort();
        }
        let mut q = self.0.queue.lock().await;
        for waiter in q.drain(..) {
            waiter.fail();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn constant_spacing_between_consecutive_resolutions() {
        // capacity=3, leak_interval=50ms, three concurrent blocking
        // acquires.
        let lb = LeakyBucketLimiter::new(LeakyBucketOptions {
            capacity: 3,
            leak_interval: Duration::from_millis(50),
        })
        .unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for id in 0..3u32 {
            let limiter = lb.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire(None).await.unwrap();
                order.lock().await.push(id);
            }));
        }
        tokio::task::yield_now().await;

        for _ in 0..3 {
            tokio::time::advance(Duration::from_millis(55)).await;
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().await, vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn try_acquire_caps_at_capacity() {
        let lb = LeakyBucketLimiter::new(LeakyBucketOptions {
            capacity: 2,
            leak_interval: Duration::from_millis(50),
        })
        .unwrap();

        assert!(lb.try_acquire().await.unwrap());
        assert!(lb.try_acquire().await.unwrap());
        assert!(!lb.try_acquire().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_rejects_immediately_when_queue_is_full() {
        let lb = LeakyBucketLimiter::new(LeakyBucketOptions {
            capacity: 1,
            leak_interval: Duration::from_millis(50),
        })
        .unwrap();
        assert!(lb.try_acquire().await.unwrap());

        let err = lb.acquire(Some(Instant::now())).await.unwrap_err();
        match err {
            AcquireError::RateLimitExceeded(e) => assert_eq!(e.algorithm, ALGO),
            other => panic!("expected RateLimitExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_construction_with_zero_capacity() {
        let err = LeakyBucketLimiter::new(LeakyBucketOptions {
            capacity: 0,
            leak_interval: Duration::from_millis(50),
        })
        .unwrap_err();
        assert!(err.message.contains("capacity"));
    }
}
