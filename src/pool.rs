//! Per-key admission pool: the `(key) -> Limiter` lookup plus the
//! blocking/non-blocking admission wrappers built on top of it.

use std::sync::Arc;

use tokio::time::{Duration, Instant};

use crate::error::{AcquireError, DisposedError, RateLimitExceeded};
use crate::extractor::KeyExtractor;
use crate::headers::HeaderMap;
use crate::limiter::Limiter;
use crate::stats::Statistics;
use crate::storage::{InMemoryStorage, Storage};

type LimiterFactory = dyn Fn() -> Limiter + Send + Sync;
type RejectionCallback = dyn Fn(&str, &RateLimitExceeded) + Send + Sync;

/// Per-key admission pool, generic over its [`Storage`] backend.
///
/// Combines the storage-facing operations (creation-on-lookup, removal,
/// disposal) with the admission-facing convenience wrappers
/// (`try_admit`, `admit`, `release`, `statistics_for`) as inherent
/// methods of one type, since nothing in this crate's surface
/// distinguishes them as separate layers.
pub struct Pool<S: Storage = InMemoryStorage> {
    storage: S,
    factory: Arc<LimiterFactory>,
    acquire_timeout: Option<Duration>,
    on_rejected: Option<Arc<RejectionCallback>>,
}

impl Pool<InMemoryStorage> {
    /// A pool backed by the in-process [`InMemoryStorage`].
    pub fn new(factory: impl Fn() -> Limiter + Send + Sync + 'static) -> Self {
        Self::with_storage(InMemoryStorage::new(), factory)
    }
}

impl<S: Storage> Pool<S> {
    pub fn with_storage(storage: S, factory: impl Fn() -> Limiter + Send + Sync + 'static) -> Self {
        Self {
            storage,
            factory: Arc::new(factory),
            acquire_timeout: None,
            on_rejected: None,
        }
    }

    /// Bound every blocking `admit` by this duration. `Duration::ZERO`
    /// makes `admit` behave as fail-fast (one `try_acquire`, then an
    /// immediate `RateLimitExceeded`). Not calling this leaves `admit`
    /// waiting indefinitely.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Register a callback invoked with `(key, &RateLimitExceeded)`
    /// whenever `try_admit` or `admit` rejects, before the error is
    /// returned to the caller.
    pub fn with_rejection_callback(mut self, callback: impl Fn(&str, &RateLimitExceeded) + Send + Sync + 'static) -> Self {
        self.on_rejected = Some(Arc::new(callback));
        self
    }

    async fn limiter_for(&self, key: &str) -> Result<Limiter, DisposedError> {
        self.storage.get_or_create(key, self.factory.as_ref()).await
    }

    fn notify_rejected(&self, key: &str, err: &RateLimitExceeded) {
        if let Some(cb) = &self.on_rejected {
            cb(key, err);
        }
    }

    /// Non-blocking admission attempt for `key`.
    pub async fn try_admit(&self, key: &str) -> Result<bool, DisposedError> {
        let limiter = self.limiter_for(key).await?;
        let admitted = limiter.try_acquire().await?;
        if !admitted {
            let err = RateLimitExceeded::new(limiter.algorithm(), "non-blocking admission rejected");
            self.notify_rejected(key, &err);
        }
        Ok(admitted)
    }

    /// Blocking admission attempt for `key`, bounded by the pool's
    /// configured `acquire_timeout` (or unbounded if none was set).
    pub async fn admit(&self, key: &str) -> Result<(), AcquireError> {
        let limiter = self.limiter_for(key).await?;

        let result = match self.acquire_timeout {
            Some(timeout) if timeout.is_zero() => {
                if limiter.try_acquire().await? {
                    Ok(())
                } else {
                    Err(AcquireError::from(RateLimitExceeded::new(
                        limiter.algorithm(),
                        "non-blocking mode",
                    )))
                }
            }
            Some(timeout) => limiter.acquire(Some(Instant::now() + timeout)).await,
            None => limiter.acquire(None).await,
        };

        if let Err(AcquireError::RateLimitExceeded(ref err)) = result {
            self.notify_rejected(key, err);
        }
        result
    }

    /// Release a previously admitted permit for `key`.
    pub async fn release(&self, key: &str) -> Result<(), DisposedError> {
        let limiter = self.limiter_for(key).await?;
        limiter.release().await
    }

    /// Current statistics snapshot for `key`. `None` only once the pool
    /// itself has been disposed.
    pub async fn statistics_for(&self, key: &str) -> Option<Statistics> {
        let limiter = self.limiter_for(key).await.ok()?;
        limiter.statistics().await.ok()
    }

    /// Dispose every managed limiter and mark the pool rejecting
    /// further admission. Idempotent.
    pub async fn dispose(&self) {
        self.storage.dispose().await;
    }

    /// Convenience: extract a key with `extractor` and `try_admit` it.
    pub async fn try_admit_with(&self, extractor: &KeyExtractor, headers: HeaderMap<'_>, path: &str) -> Result<bool, DisposedError> {
        let key = extractor.extract(crate::extractor::RequestMeta { headers, path });
        self.try_admit(&key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::{ConcurrencyLimiter, ConcurrencyOptions};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn one_slot_factory() -> Limiter {
        ConcurrencyLimiter::new(ConcurrencyOptions { max_concurrency: 1 })
            .unwrap()
            .into()
    }

    #[tokio::test]
    async fn try_admit_creates_lazily_and_partitions_by_key() {
        let pool = Pool::new(one_slot_factory);
        assert!(pool.try_admit("a").await.unwrap());
        assert!(!pool.try_admit("a").await.unwrap());
        // A different key gets its own limiter.
        assert!(pool.try_admit("b").await.unwrap());
    }

    #[tokio::test]
    async fn try_admit_invokes_rejection_callback_on_refusal() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_cb = calls.clone();
        let pool = Pool::new(one_slot_factory).with_rejection_callback(move |_key, _err| {
            calls_cb.fetch_add(1, Ordering::SeqCst);
        });

        assert!(pool.try_admit("k").await.unwrap());
        assert!(!pool.try_admit("k").await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_acquire_timeout_behaves_as_fail_fast() {
        let pool = Pool::new(one_slot_factory).with_acquire_timeout(Duration::ZERO);
        pool.admit("k").await.unwrap();
        let err = pool.admit("k").await.unwrap_err();
        match err {
            AcquireError::RateLimitExceeded(e) => assert_eq!(e.message, "non-blocking mode"),
            other => panic!("expected RateLimitExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn release_frees_the_slot_for_the_same_key() {
        let pool = Pool::new(one_slot_factory);
        assert!(pool.try_admit("k").await.unwrap());
        pool.release("k").await.unwrap();
        assert!(pool.try_admit("k").await.unwrap());
    }

    #[tokio::test]
    async fn statistics_for_reflects_the_keyed_limiter() {
        let pool = Pool::new(one_slot_factory);
        pool.try_admit("k").await.unwrap();
        let stats = pool.statistics_for("k").await.unwrap();
        assert_eq!(stats.permits_acquired, 1);
        assert_eq!(stats.current_permits, 0);
    }

    #[tokio::test]
    async fn statistics_for_is_none_only_after_pool_disposal() {
        let pool = Pool::new(one_slot_factory);
        pool.try_admit("k").await.unwrap();
        pool.dispose().await;
        assert_eq!(pool.statistics_for("k").await, None);
    }

    #[tokio::test]
    async fn dispose_is_idempotent_and_rejects_further_admission() {
        let pool = Pool::new(one_slot_factory);
        pool.dispose().await;
        pool.dispose().await;
        assert!(matches!(pool.try_admit("k").await, Err(DisposedError)));
    }

    #[tokio::test]
    async fn try_admit_with_derives_the_key_from_an_extractor() {
        use crate::extractor::KeyExtractor;

        let pool = Pool::new(one_slot_factory);
        let extractor = KeyExtractor::user();
        let headers = [("x-user-id", "bob")];

        assert!(pool
            .try_admit_with(&extractor, HeaderMap::new(&headers), "/widgets")
            .await
            .unwrap());
        // Same derived key ("bob") is exhausted on the second call.
        assert!(!pool
            .try_admit_with(&extractor, HeaderMap::new(&headers), "/widgets")
            .await
            .unwrap());
        // A different caller gets an independent limiter.
        let other_headers = [("x-user-id", "alice")];
        assert!(pool
            .try_admit_with(&extractor, HeaderMap::new(&other_headers), "/widgets")
            .await
            .unwrap());
    }
}
