use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::error::{AcquireError, ConfigError, DisposedError, RateLimitExceeded};
use crate::stats::Statistics;

const ALGO: &str = "SlidingWindowLog";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Construction parameters for [`SlidingWindowLogLimiter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlidingWindowLogOptions {
    pub max_permits: u64,
    #[serde(with = "crate::config::duration_millis")]
    pub window_duration: Duration,
    #[serde(with = "crate::config::duration_millis", default = "default_poll_interval")]
    pub poll_interval: Duration,
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

impl SlidingWindowLogOptions {
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

struct Inner {
    max_permits: u64,
    window_duration: Duration,
    poll_interval: Duration,
    log: Mutex<VecDeque<Instant>>,
    acquired: AtomicU64,
    rejected: AtomicU64,
    disposed: AtomicBool,
}

/// Exact timestamp log, O(`max_permits`) memory. Prefer
/// [`SlidingWindowCounterLimiter`](super::SlidingWindowCounterLimiter)
/// when `max_permits` is large.
#[derive(Clone)]
pub struct SlidingWindowLogLimiter(Arc<Inner>);

impl SlidingWindowLogLimiter {
    pub fn new(opts: SlidingWindowLogOptions) -> Result<Self, ConfigError> {
        opts.validate()?;
        Ok(Self(Arc::new(Inner {
            max_permits: opts.max_permits,
            window_duration: opts.window_duration,
            poll_interval: opts.poll_interval,
            log: Mutex::new(VecDeque::new()),
            acquired: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        })))
    }

    /// Remove every head entry older than `now - window_duration`.
    fn evict(inner: &Inner, log: &mut VecDeque<Instant>, now: Instant) {
        let horizon = now.checked_sub(inner.window_duration).unwrap_or(now);
        while let Some(&front) = log.front() {
            if front <= horizon {
                log.pop_front();
            } else {
                break;
            }
        }
    }

    fn time_until_oldest_expires(inner: &Inner, log: &VecDeque<Instant>, now: Instant) -> Duration {
        match log.front() {
            Some(&oldest) => (oldest + inner.window_duration).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    pub async fn try_acquire(&self) -> Result<bool, DisposedError> {
        if self.0.disposed.load(Ordering::Acquire) {
            return Err(DisposedError);
        }
        let mut log = self.0.log.lock().await;
        let now = Instant::now();
        Self::evict(&self.0, &mut log, now);
        if (log.len() as u64) < self.0.max_permits {
            log.push_back(now);
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
                let mut log = self.0.log.lock().await;
                let now = Instant::now();
                Self::evict(&self.0, &mut log, now);
                if (log.len() as u64) < self.0.max_permits {
                    log.push_back(now);
                    self.0.acquired.fetch_add(1, Ordering::Relaxed);
                    (true, Duration::ZERO)
                } else {
                    (false, Self::time_until_oldest_expires(&self.0, &log, now))
                }
            };
            if admitted {
                return Ok(());
            }

            let now = Instant::now();
            if deadline.is_some_and(|dl| dl <= now) {
                self.0.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(AcquireError::from(
                    RateLimitExceeded::new(ALGO, "deadline expired waiting for the oldest entry to expire")
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
        let mut log = self.0.log.lock().await;
        Self::evict(&self.0, &mut log, Instant::now());
        Ok(Statistics {
            permits_acquired: self.0.acquired.load(Ordering::Relaxed),
            permits_rejected: self.0.rejected.load(Ordering::Relaxed),
            current_permits: self.0.max_permits.saturating_sub(log.len() as u64),
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
    async fn no_edge_burst_across_window_boundary() {
        // max=3, window=120ms.
        let sw = SlidingWindowLogLimiter::new(SlidingWindowLogOptions {
            max_permits: 3,
            window_duration: Duration::from_millis(120),
            poll_interval: Duration::from_millis(10),
        })
        .unwrap();

        assert!(sw.try_acquire().await.unwrap());
        assert!(sw.try_acquire().await.unwrap());
        assert!(sw.try_acquire().await.unwrap());
        assert!(!sw.try_acquire().await.unwrap());

        tokio::time::advance(Duration::from_millis(70)).await;
        assert!(!sw.try_acquire().await.unwrap());

        tokio::time::advance(Duration::from_millis(56)).await;
        assert!(sw.try_acquire().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn at_most_max_permits_in_any_trailing_window() {
        let sw = SlidingWindowLogLimiter::new(SlidingWindowLogOptions {
            max_permits: 2,
            window_duration: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
        })
        .unwrap();

        assert!(sw.try_acquire().await.unwrap());
        tokio::time::advance(Duration::from_millis(10)).await;
        assert!(sw.try_acquire().await.unwrap());
        tokio::time::advance(Duration::from_millis(10)).await;
        // Both prior entries are still within the 50ms window.
        assert!(!sw.try_acquire().await.unwrap());
    }
}
