use std::fmt;
use std::time::Duration;

/// The one expected business outcome: the caller should back off.
///
/// Carries the algorithm that rejected the request (for observability)
/// and, where the algorithm can estimate one, a retry-after hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitExceeded {
    pub algorithm: &'static str,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl RateLimitExceeded {
    pub fn new(algorithm: &'static str, message: impl Into<String>) -> Self {
        Self {
            algorithm,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

impl fmt::Display for RateLimitExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.retry_after {
            Some(d) => write!(
                f,
                "[{}] rate limit exceeded: {} (retry after {:?})",
                self.algorithm, self.message, d
            ),
            None => write!(f, "[{}] rate limit exceeded: {}", self.algorithm, self.message),
        }
    }
}

impl std::error::Error for RateLimitExceeded {}

/// Raised by any operation invoked on a limiter, pool, or storage after
/// `dispose()`. Programming error, not recoverable — callers should not
/// retry on this, only stop using the disposed handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisposedError;

impl fmt::Display for DisposedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "limiter has been disposed")
    }
}

impl std::error::Error for DisposedError {}

/// Raised at construction time when a parameter violates its stated
/// constraint (e.g. a zero duration or a zero capacity). Programming
/// error, not recoverable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid rate limiter configuration: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Unifies the two failure modes of the blocking `acquire` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    RateLimitExceeded(RateLimitExceeded),
    Disposed(DisposedError),
}

impl fmt::Display for AcquireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquireError::RateLimitExceeded(e) => write!(f, "{}", e),
            AcquireError::Disposed(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AcquireError {}

impl From<RateLimitExceeded> for AcquireError {
    fn from(e: RateLimitExceeded) -> Self {
        AcquireError::RateLimitExceeded(e)
    }
}

impl From<DisposedError> for AcquireError {
    fn from(e: DisposedError) -> Self {
        AcquireError::Disposed(e)
    }
}
