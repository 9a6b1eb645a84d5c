use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::waiter::{Waiter, WaiterOutcome};
use crate::error::{AcquireError, ConfigError, DisposedError, RateLimitExceeded};
use crate::stats::Statistics;

const ALGO: &str = "Concurrency";

/// Construction parameters for [`ConcurrencyLimiter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyOptions {
    pub max_concurrency: u64,
}

impl ConcurrencyOptions {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::new("max_concurrency must be greater than 0"));
        }
        Ok(())
    }
}

struct State {
    in_flight: u64,
    queue: VecDeque<Arc<Waiter>>,
}

struct Inner {
    max_concurrency: u64,
    state: Mutex<State>,
    acquired: AtomicU64,
    rejected: AtomicU64,
    disposed: AtomicBool,
}

/// Semaphore with FIFO queue and explicit release. The only algorithm
/// that overrides the default no-op `release`: a release dispatches the
/// next pending waiter, if any, skipping over waiters already failed by
/// their own deadline timer.
#[derive(Clone)]
pub struct ConcurrencyLimiter(Arc<Inner>);

impl ConcurrencyLimiter {
    pub fn new(opts: ConcurrencyOptions) -> Result<Self, ConfigError> {
        opts.validate()?;
        Ok(Self(Arc::new(Inner {
            max_concurrency: opts.max_concurrency,
            state: Mutex::new(State {
                in_flight: 0,
                queue: VecDeque::new(),
            }),
            acquired: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        })))
    }

    pub async fn try_acquire(&self) -> Result<bool, DisposedError> {
        if self.0.disposed.load(Ordering::Acquire) {
            return Err(DisposedError);
        }
        let mut st = self.0.state.lock().await;
        if st.in_flight < self.0.max_concurrency {
            st.in_flight += 1;
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
            if st.in_flight < self.0.max_concurrency {
                st.in_flight += 1;
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
                    // No retry-after: the moment concurrency frees up is
                    // driven by callers' `release()`, not a timer, so
                    // there is nothing to estimate.
                    Err(AcquireError::from(RateLimitExceeded::new(
                        ALGO,
                        "deadline expired while queued for a concurrency slot",
                    )))
                }
            }
        }
    }

    async fn remove_from_queue(&self, waiter: &Arc<Waiter>) {
        let mut st = self.0.state.lock().await;
        st.queue.retain(|w| !Arc::ptr_eq(w, waiter));
    }

    /// Decrement `in_flight` and dispatch the next queued waiter, if
    /// any. Over-releasing (calling this with `in_flight == 0`) is a
    /// silent no-op — a deliberate, lenient policy choice.
    pub async fn release(&self) -> Result<(), DisposedError> {
        if self.0.disposed.load(Ordering::Acquire) {
            return Err(DisposedError);
        }
        let mut st = self.0.state.lock().await;
        if st.in_flight == 0 {
            return Ok(());
        }
        st.in_flight -= 1;
        loop {
            if st.in_flight >= self.0.max_concurrency {
                break;
            }
            let Some(waiter) = st.queue.pop_front() else {
                break;
            };
            // Only take the slot if this call actually wins the grant.
            // `grant()` races the deadline path's `fail()`, which runs
            // off the state lock — incrementing `in_flight` before the
            // grant is confirmed would permanently leak a slot whenever
            // the deadline wins: the caller that already saw
            // `RateLimitExceeded` will never call `release()` to free it.
            if waiter.grant() {
                st.in_flight += 1;
                self.0.acquired.fetch_add(1, Ordering::Relaxed);
                break;
            }
            // Already failed by its own deadline timer; discard and
            // keep looking for a waiter to dispatch.
        }
        Ok(())
    }

    pub async fn statistics(&self) -> Result<Statistics, DisposedError> {
        if self.0.disposed.load(Ordering::Acquire) {
            return Err(DisposedError);
        }
        let st = self.0.state.lock().await;
        Ok(Statistics {
            permits_acquired: self.0.acquired.load(Ordering::Relaxed),
            permits_rejected: self.0.rejected.load(Ordering::Relaxed),
            current_permits: self.0.max_concurrency.saturating_sub(st.in_flight),
            max_permits: self.0.max_concurrency,
            queue_depth: st.queue.len(),
        })
    }

    pub async fn dispose(&self) {
        if self.0.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(algorithm = ALGO, "disposing rate limiter");
        let mut st = self.0.state.lock().await;
        for waiter in st.queue.drain(..) {
            waiter.fail();
        }
        st.in_flight = 0;
    }
}
