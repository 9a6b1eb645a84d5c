//! The six concurrent admission-control state machines and the tagged
//! union that lets a [`Pool`](crate::pool::Pool) hold any of them.

mod concurrency;
mod fixed_window;
mod leaky_bucket;
mod sliding_window_counter;
mod sliding_window_log;
mod token_bucket;
mod waiter;

pub use concurrency::{ConcurrencyLimiter, ConcurrencyOptions};
pub use fixed_window::{FixedWindowLimiter, FixedWindowOptions};
pub use leaky_bucket::{LeakyBucketLimiter, LeakyBucketOptions};
pub use sliding_window_counter::{SlidingWindowCounterLimiter, SlidingWindowCounterOptions};
pub use sliding_window_log::{SlidingWindowLogLimiter, SlidingWindowLogOptions};
pub use token_bucket::{TokenBucketLimiter, TokenBucketOptions};

use tokio::time::Instant;

use crate::error::{AcquireError, DisposedError};
use crate::stats::Statistics;

/// Tagged union over the six limiter algorithms.
///
/// The only operation whose behavior differs per algorithm is
/// `release`, and the six-member set is closed, so a tagged union is
/// equivalent to a capability interface here. A `dyn` trait would need
/// `async_trait` (or manual boxed futures) to stay object-safe with
/// suspending methods; the match-based tagged union avoids that extra
/// dependency and keeps each algorithm's inherent `async fn`s directly
/// callable.
#[derive(Clone)]
pub enum Limiter {
    TokenBucket(TokenBucketLimiter),
    FixedWindow(FixedWindowLimiter),
    SlidingWindowCounter(SlidingWindowCounterLimiter),
    SlidingWindowLog(SlidingWindowLogLimiter),
    LeakyBucket(LeakyBucketLimiter),
    Concurrency(ConcurrencyLimiter),
}

impl Limiter {
    /// Non-blocking admission attempt. Never suspends.
    pub async fn try_acquire(&self) -> Result<bool, DisposedError> {
        match self {
            Limiter::TokenBucket(l) => l.try_acquire().await,
            Limiter::FixedWindow(l) => l.try_acquire().await,
            Limiter::SlidingWindowCounter(l) => l.try_acquire().await,
            Limiter::SlidingWindowLog(l) => l.try_acquire().await,
            Limiter::LeakyBucket(l) => l.try_acquire().await,
            Limiter::Concurrency(l) => l.try_acquire().await,
        }
    }

    /// Suspending admission attempt bounded by an optional absolute
    /// deadline. `None` means wait indefinitely.
    pub async fn acquire(&self, deadline: Option<Instant>) -> Result<(), AcquireError> {
        match self {
            Limiter::TokenBucket(l) => l.acquire(deadline).await,
            Limiter::FixedWindow(l) => l.acquire(deadline).await,
            Limiter::SlidingWindowCounter(l) => l.acquire(deadline).await,
            Limiter::SlidingWindowLog(l) => l.acquire(deadline).await,
            Limiter::LeakyBucket(l) => l.acquire(deadline).await,
            Limiter::Concurrency(l) => l.acquire(deadline).await,
        }
    }

    /// Fresh statistics snapshot. `Err` only once `dispose()` has run.
    pub async fn statistics(&self) -> Result<Statistics, DisposedError> {
        match self {
            Limiter::TokenBucket(l) => l.statistics().await,
            Limiter::FixedWindow(l) => l.statistics().await,
            Limiter::SlidingWindowCounter(l) => l.statistics().await,
            Limiter::SlidingWindowLog(l) => l.statistics().await,
            Limiter::LeakyBucket(l) => l.statistics().await,
            Limiter::Concurrency(l) => l.statistics().await,
        }
    }

    /// Acknowledge that one previously granted permit has been
    /// consumed. A no-op on every algorithm except [`Concurrency`],
    /// which uses it to dispatch the next queued waiter.
    pub async fn release(&self) -> Result<(), DisposedError> {
        match self {
            Limiter::TokenBucket(l) => l.release().await,
            Limiter::FixedWindow(l) => l.release().await,
            Limiter::SlidingWindowCounter(l) => l.release().await,
            Limiter::SlidingWindowLog(l) => l.release().await,
            Limiter::LeakyBucket(l) => l.release().await,
            Limiter::Concurrency(l) => l.release().await,
        }
    }

    /// Idempotent teardown. Cancels any internal timer and fails every
    /// queued waiter with [`DisposedError`].
    pub async fn dispose(&self) {
        match self {
            Limiter::TokenBucket(l) => l.dispose().await,
            Limiter::FixedWindow(l) => l.dispose().await,
            Limiter::SlidingWindowCounter(l) => l.dispose().await,
            Limiter::SlidingWindowLog(l) => l.dispose().await,
            Limiter::LeakyBucket(l) => l.dispose().await,
            Limiter::Concurrency(l) => l.dispose().await,
        }
    }

    /// The algorithm tag used in error messages and statistics-adjacent
    /// logging (e.g. `"TokenBucket"`, `"Concurrency"`).
    pub fn algorithm(&self) -> &'static str {
        match self {
            Limiter::TokenBucket(_) => "TokenBucket",
            Limiter::FixedWindow(_) => "FixedWindow",
            Limiter::SlidingWindowCounter(_) => "SlidingWindow",
            Limiter::SlidingWindowLog(_) => "SlidingWindowLog",
            Limiter::LeakyBucket(_) => "LeakyBucket",
            Limiter::Concurrency(_) => "Concurrency",
        }
    }
}

impl From<TokenBucketLimiter> for Limiter {
    fn from(l: TokenBucketLimiter) -> Self {
        Limiter::TokenBucket(l)
    }
}

impl From<FixedWindowLimiter> for Limiter {
    fn from(l: FixedWindowLimiter) -> Self {
        Limiter::FixedWindow(l)
    }
}

impl From<SlidingWindowCounterLimiter> for Limiter {
    fn from(l: SlidingWindowCounterLimiter) -> Self {
        Limiter::SlidingWindowCounter(l)
    }
}

impl From<SlidingWindowLogLimiter> for Limiter {
    fn from(l: SlidingWindowLogLimiter) -> Self {
        Limiter::SlidingWindowLog(l)
    }
}

impl From<LeakyBucketLimiter> for Limiter {
    fn from(l: LeakyBucketLimiter) -> Self {
        Limiter::LeakyBucket(l)
    }
}

impl From<ConcurrencyLimiter> for Limiter {
    fn from(l: ConcurrencyLimiter) -> Self {
        Limiter::Concurrency(l)
    }
}
