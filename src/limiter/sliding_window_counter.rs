use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::error::{AcquireError, ConfigError, DisposedError, RateLimitExceeded};
use crate::stats::Statistics;

const ALGO: &str = "SlidingWindow";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Construction parameters for [`SlidingWindowCounterLimiter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlidingWindowCounterOptions {
    pub max_permits: u64,
    #[serde(with = "crate::config::duration_millis")]
    pub window_duration: Duration,
    #[serde(with = "crate::config::duration_millis", default = "default_poll_interval")]
    pub poll_interval: Duration,
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

impl SlidingWindowCounterOptions {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_permits == 0 {
            return Err(ConfigError::new("max_permits must be greater than 0"));
        }
        if self.window_duration.is_zero() {
            return Err(ConfigError::new("window_duration must be greater than 0"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::new("poll_interval must be greater than 0"));
        }
        Ok(())
    }
}

struct State {
    prev: u64,
    curr: u64,
    slot_start: Instant,
}

struct Inner {
    max_permits: u64,
    window_duration: Duration,
    poll_interval: Duration,
    state: Mutex<State>,
    acquired: AtomicU64,
    rejected: AtomicU64,
    disposed: AtomicBool,
}

/// Weighted two-slot estimate, O(1) memory. Approximate: the estimate is
/// within one window of truth.
#[derive(Clone)]
pub struct SlidingWindowCounterLimiter(Arc<Inner>);

impl SlidingWindowCounterLimiter {
    pub fn new(opts: SlidingWindowCounterOptions) -> Result<Self, ConfigError> {
        opts.validate()?;
        Ok(Self(Arc::new(Inner {
            max_permits: opts.max_permits,
            window_duration: opts.window_duration,
            poll_interval: opts.poll_interval,
            state: Mutex::new(State {
                prev: 0,
                curr: 0,
                slot_start: Instant::now(),
            }),
            acquired: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        })))
    }

    fn advance(inner: &Inner, st: &mut State, now: Instant) {
        let elapsed = now.saturating_duration_since(st.slot_start);
        if elapsed < inner.window_duration {
            return;
        }
        let slots_passed = (elapsed.as_nanos() / inner.window_duration.as_nanos()) as u32;
        if slots_passed >= 2 {
            st.prev = 0;
        } else {
            st.prev = st.curr;
        }
        st.curr = 0;
        st.slot_start += inner.window_duration * slots_passed;
    }

    fn estimate(inner: &Inner, st: &State, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(st.slot_start).as_secs_f64();
        let window = inner.window_duration.as_secs_f64();
        let weight = (1.0 - elapsed / window).max(0.0);
        st.prev as f64 * weight + st.curr as f64
    }

    /// Time until the current slot next advances (used both as the
    /// retry-after estimate and as the poll wake-up bound).
    fn time_until_advance(inner: &Inner, st: &State, now: Instant) -> Duration {
        let slot_end = st.slot_start + inner.window_duration;
        slot_end.saturating_duration_since(now)
    }

    pub async fn try_acquire(&self) -> Result<bool, DisposedError> {
        if self.0.disposed.load(Ordering::Acquire) {
            return Err(DisposedError);
        }
        let mut st = self.0.state.lock().await;
        let now = Instant::now();
        Self::advance(&self.0, &mut st, now);
        if Self::estimate(&self.0, &st, now) < self.0.max_permits as f64 {
            st.curr += 1;
            self.0.acquired.fetch_add(1, Ordering::Relaxed);
            Ok(true)
        } else {
            self.0.rejected.fetch_add(1, Ordering::Relaxed);
            Ok(false)
        }
    }

    pub async fn acquire(&self, deadline: Option<Instant>) -> Result<(), AcquireError> {
        loop {
            if self.0.disposed.load(Ordering::Acquire) {
                return Err(DisposedError.into());
            }
            let (admitted, retry_after) = {
                let mut st = self.0.state.lock().await;
                let now = Instant::now();
                Self::advance(&self.0, &mut st, now);
                if Self::estimate(&self.0, &st, now) < self.0.max_permits as f64 {
                    st.curr += 1;
                    self.0.acquired.fetch_add(1, Ordering::Relaxed);
                    (true, Duration::ZERO)
                } else {
                    (false, Self::time_until_advance(&self.0, &st, now))
                }
            };
            if admitted {
                return Ok(());
            }

            let now = Instant::now();
            if deadline.is_some_and(|dl| dl <= now) {
                self.0.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(AcquireError::from(
                    RateLimitExceeded::new(ALGO, "deadline expired waiting for slot capacity")
                        .with_retry_after(retry_after),
                ));
            }

            let wait = retry_after.min(self.0.poll_interval);
            let wake_at = match deadline {
                Some(dl) => (now + wait).min(dl),
                None => now + wait,
            };
            tokio::time::sleep_until(wake_at).await;
        }
    }

    pub async fn statistics(&self) -> Result<Statistics, DisposedError> {
        if self.0.disposed.load(Ordering::Acquire) {
            return Err(DisposedError);
        }
        let mut st = self.0.state.lock().await;
        let now = Instant::now();
        Self::advance(&self.0, &mut st, now);
        let estimate = Self::estimate(&self.0, &st, now);
        let current = (self.0.max_permits as f64 - estimate).max(0.0) as u64;
        Ok(Statistics {
            permits_acquired: self.0.acquired.load(Ordering::Relaxed),
            permits_rejected: self.0.rejected.load(Ordering::Relaxed),
            current_permits: current,
            max_permits: self.0.max_permits,
            queue_depth: 0,
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
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_max_per_window_then_rejects() {
        let sw = SlidingWindowCounterLimiter::new(SlidingWindowCounterOptions {
            max_permits: 3,
            window_duration: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
        })
        .unwrap();

        for _ in 0..3 {
            assert!(sw.try_acquire().await.unwrap());
        }
        assert!(!sw.try_acquire().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn admits_again_once_previous_slot_weight_decays() {
        let sw = SlidingWindowCounterLimiter::new(SlidingWindowCounterOptions {
            max_permits: 2,
            window_duration: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
        })
        .unwrap();

        assert!(sw.try_acquire().await.unwrap());
        assert!(sw.try_acquire().await.unwrap());

        tokio::time::advance(Duration::from_millis(250)).await;

        assert!(sw.try_acquire().await.unwrap());
    }

    #[tokio::test]
    async fn rejects_construction_with_zero_max_permits() {
        let err = SlidingWindowCounterLimiter::new(SlidingWindowCounterOptions {
            max_permits: 0,
            window_duration: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
        })
        .unwrap_err();
        assert!(err.message.contains("max_permits"));
    }
}
