//! Admission-control rate limiting: six concurrent limiter algorithms,
//! a per-key pool on top of them, pluggable storage, key-extraction
//! strategies for deriving pool keys from request metadata, and a
//! parser for the standard `X-RateLimit-*`/`Retry-After` response
//! headers.
//!
//! No network I/O, no persistence, and no process-wide state: every
//! type here is a self-contained `tokio`-async value a caller wires
//! into their own request path.
//!
//! ```
//! use ratelimit_core::limiter::{TokenBucketLimiter, TokenBucketOptions};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let limiter = TokenBucketLimiter::new(TokenBucketOptions {
//!     capacity: 10,
//!     refill_amount: 1,
//!     refill_interval: Duration::from_millis(100),
//!     initial_tokens: None,
//! })?;
//!
//! if limiter.try_acquire().await? {
//!     // do the rate-limited work
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod extractor;
pub mod headers;
pub mod limiter;
pub mod pool;
pub mod stats;
pub mod storage;

pub use error::{AcquireError, ConfigError, DisposedError, RateLimitExceeded};
pub use extractor::{KeyExtractor, RequestMeta};
pub use headers::{parse_headers, parse_headers_at, HeaderMap, ParsedHeaders};
pub use limiter::Limiter;
pub use pool::Pool;
pub use stats::Statistics;
pub use storage::{InMemoryStorage, Storage};
