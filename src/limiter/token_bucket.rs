use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use super::waiter::{Waiter, WaiterOutcome};
use crate::error::{AcquireError, ConfigError, DisposedError};
use crate::stats::Statistics;

const ALGO: &str = "TokenBucket";

/// Construction parameters for [`TokenBucketLimiter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBucketOptions {
    pub capacity: u64,
    pub refill_amount: u64,
    #[serde(with = "crate::config::duration_millis")]
    pub refill_interval: Duration,
    /// Clamped to `[0, capacity]`. Defaults to `capacity` (start full).
    #[serde(default)]
    pub initial_tokens: Option<u64>,
}

impl TokenBucketOptions {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::new("capacity must be greater than 0"));
        }
        if self.refill_amount == 0 {
            return Err(ConfigError::new("refill_amount must be greater than 0"));
        }
        if self.refill_interval.is_zero() {
            return Err(ConfigError::new("refill_interval must be greater than 0"));
        }
        Ok(())
    }
}

struct State {
    tokens: u64,
    queue: VecDeque<Arc<Waiter>>,
}

struct Inner {
    capacity: u64,
    refill_amount: u64,
    refill_interval: Duration,
    state: Mutex<State>,
    acquired: AtomicU64,
    rejected: AtomicU64,
    disposed: AtomicBool,
    refill_task: Mutex<Option<JoinHandle<()>>>,
}

/// Continuous refill, burst capacity, FIFO blocking queue.
#[derive(Clone)]
pub struct TokenBucketLimiter(Arc<Inner>);

impl TokenBucketLimiter {
    pub fn new(opts: TokenBucketOptions) -> Result<Self, ConfigError> {
        opts.validate()?;
        let initial = opts.initial_tokens.unwrap_or(opts.capacity).min(opts.capacity);
        let inner = Arc::new(Inner {
            capacity: opts.capacity,
            refill_amount: opts.refill_amount,
            refill_interval: opts.refill_interval,
            state: Mutex::new(State {
                tokens: initial,
                queue: VecDeque::new(),
            }),
            acquired: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            refill_task: Mutex::new(None),
        });

        let task_inner = inner.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(task_inner.refill_interval);
            ticker.tick().await; // first tick fires immediately; consume it
            loop {
                ticker.tick().await;
                Self::on_refill(&task_inner).await;
            }
        });
        // `try_lock` is safe here: no other task can see `inner` before
        // this function returns.
        *inner.refill_task.try_lock().expect("uncontended") = Some(handle);

        Ok(Self(inner))
    }

    async fn on_refill(inner: &Inner) {
        let mut st = inner.state.lock().await;
        st.tokens = (st.tokens + inner.refill_amount).min(inner.capacity);
        while st.tokens > 0 {
            let Some(waiter) = st.queue.pop_front() else {
                break;
            };
            // Consume a token only if this call actually wins the grant.
            // `grant()` races the deadline path's `fail()`, which runs
            // off the state lock — checking `is_pending()` first and
            // decrementing before the grant is confirmed would let a
            // losing race silently drop a token with no permit granted.
            if waiter.grant() {
                st.tokens -= 1;
                inner.acquired.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub async fn try_acquire(&self) -> Result<bool, DisposedError> {
        if self.0.disposed.load(Ordering::Acquire) {
            return Err(DisposedError);
        }
        let mut st = self.0.state.lock().await;
        if st.tokens > 0 {
            st.tokens -= 1;
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

        {
            let mut st = self.0.state.lock().await;
            if st.tokens > 0 {
                st.tokens -= 1;
                self.0.acquired.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        }

        let waiter = Waiter::new();
        {
            let mut st = self.0.state.lock().await;
            st.queue.push_back(waiter.clone());
        }

        let outcome = match deadline {
            None => waiter.wait().await,
            Some(dl) => {
                tokio::select! {
                    biased;
                    o = waiter.wait() => o,
                    _ = tokio::time::sleep_until(dl) => {
                        if waiter.fail() {
                            self.remove_from_queue(&waiter).await;
                            WaiterOutcome::Failed
                        } else {
                            waiter.wait().await
                        }
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
                        crate::error::RateLimitExceeded::new(
                            ALGO,
                            "deadline expired while waiting for a token",
                        )
                        .with_retry_after(self.0.refill_interval),
                    ))
                }
            }
        }
    }

    async fn remove_from_queue(&self, waiter: &Arc<Waiter>) {
        let mut st = self.0.state.lock().await;
        st.queue.retain(|w| !Arc::ptr_eq(w, waiter));
    }

    pub async fn statistics(&self) -> Result<Statistics, DisposedError> {
        if self.0.disposed.load(Ordering::Acquire) {
            return Err(DisposedError);
        }
        let st = self.0.state.lock().await;
        Ok(Statistics {
            permits_acquired: self.0.acquired.load(Ordering::Relaxed),
            permits_rejected: self.0.rejected.load(Ordering::Relaxed),
            current_permits: st.tokens,
            max_permits: self.0.capacity,
            queue_depth: st.queue.len(),
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
        if let Some(handle) = self.0.refill_task.lock().await.take() {
            handle.abort();
        }
        let mut st = self.0.state.lock().await;
        for waiter in st.queue.drain(..) {
            waiter.fail();
        }
    }
}
