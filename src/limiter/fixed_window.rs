use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::error::{AcquireError, ConfigError, DisposedError, RateLimitExceeded};
use crate::stats::Statistics;

const ALGO: &str = "FixedWindow";

/// Construction parameters for [`FixedWindowLimiter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedWindowOptions {
    pub max_permits: u64,
    #[serde(with = "crate::config::duration_millis")]
    pub window_duration: Duration,
}

impl FixedWindowOptions {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_permits == 0 {
            return Err(ConfigError::new("max_permits must be greater than 0"));
        }
        if self.window_duration.is_zero() {
            return Err(ConfigError::new("window_duration must be greater than 0"));
        }
        Ok(())
    }
}

struct State {
    remaining: u64,
    window_end: Instant,
}

struct Inner {
    max_permits: u64,
    window_duration: Duration,
    state: Mutex<State>,
    acquired: AtomicU64,
    rejected: AtomicU64,
    disposed: AtomicBool,
}

/// Counter per window with multi-window catch-up on long idle gaps.
/// No internal waiter queue: blocking callers simply sleep until the
/// next window boundary and retry.
#[derive(Clone)]
pub struct FixedWindowLimiter(Arc<Inner>);

impl FixedWindowLimiter {
    pub fn new(opts: FixedWindowOptions) -> Result<Self, ConfigError> {
        opts.validate()?;
        let now = Instant::now();
        Ok(Self(Arc::new(Inner {
            max_permits: opts.max_permits,
            window_duration: opts.window_duration,
            state: Mutex::new(State {
                remaining: opts.max_permits,
                window_end: now + opts.window_duration,
            }),
            acquired: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        })))
    }

    /// Advance `window_end` past `now`, resetting `remaining` to
    /// `max_permits` for every window boundary crossed. Correct for
    /// arbitrarily long idle gaps — no phantom accumulation.
    fn advance(inner: &Inner, st: &mut State, now: Instant) {
        if now < st.window_end {
            return;
        }
        while st.window_end <= now {
            st.window_end += inner.window_duration;
        }
        st.remaining = inner.max_permits;
    }

    pub async fn try_acquire(&self) -> Result<bool, DisposedError> {
        if self.0.disposed.load(Ordering::Acquire) {
            return Err(DisposedError);
        }
        let mut st = self.0.state.lock().await;
        Self::advance(&self.0, &mut st, Instant::now());
        if st.remaining > 0 {
            st.remaining -= 1;
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
            let wake_at = {
                let mut st = self.0.state.lock().await;
                let now = Instant::now();
                Self::advance(&self.0, &mut st, now);
                if st.remaining > 0 {
                    st.remaining -= 1;
                    self.0.acquired.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                st.window_end
            };

            let now = Instant::now();
            let deadline_hit = deadline.is_some_and(|dl| dl <= now);
            if deadline_hit {
                self.0.rejected.fetch_add(1, Ordering::Relaxed);
                let st = self.0.state.lock().await;
                return Err(AcquireError::from(
                    RateLimitExceeded::new(ALGO, "deadline expired waiting for window reset")
                        .with_retry_after(st.window_end.saturating_duration_since(now)),
                ));
            }

            let sleep_until = match deadline {
                Some(dl) => wake_at.min(dl),
                None => wake_at,
            };
            tokio::time::sleep_until(sleep_until).await;
        }
    }

    pub async fn statistics(&self) -> Result<Statistics, DisposedError> {
        if self.0.disposed.load(Ordering::Acquire) {
            return Err(DisposedError);
        }
        let mut st = self.0.state.lock().await;
        Self::advance(&self.0, &mut st, Instant::now());
        Ok(Statistics {
            permits_acquired: self.0.acquired.load(Ordering::Relaxed),
            permits_rejected: self.0.rejected.load(Ordering::Relaxed),
            current_permits: st.remaining,
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
        // No timer, no waiter queue to fail — a disposed fixed-window
        // limiter simply starts rejecting via the `disposed` check above.
    }
}
