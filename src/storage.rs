//! Pluggable key→limiter mapping. The extension seam for cross-process
//! coordination: a different `Storage` impl backed by a shared store is
//! how a caller would add that, entirely outside this crate's scope.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;

use crate::error::DisposedError;
use crate::limiter::Limiter;

/// Key→limiter storage used by [`Pool`](crate::pool::Pool).
///
/// Implementations own every limiter they hand back from
/// `get_or_create` and must dispose of it when it is removed, either
/// individually or via `dispose()`.
pub trait Storage: Send + Sync {
    /// Look up `key`, creating via `factory` on first access.
    fn get_or_create(
        &self,
        key: &str,
        factory: &(dyn Fn() -> Limiter + Send + Sync),
    ) -> impl std::future::Future<Output = Result<Limiter, DisposedError>> + Send;

    /// Remove and dispose the limiter for `key`, if present. Idempotent.
    fn remove(&self, key: &str) -> impl std::future::Future<Output = ()> + Send;

    /// Dispose every limiter whose `(key, limiter)` pair matches
    /// `predicate`, removing it from storage.
    fn remove_where<P>(&self, predicate: P) -> impl std::future::Future<Output = ()> + Send
    where
        P: Fn(&str, &Limiter) -> bool + Send;

    /// Dispose every managed limiter and clear the map. Idempotent;
    /// marks the storage rejecting further `get_or_create` calls with
    /// [`DisposedError`].
    fn dispose(&self) -> impl std::future::Future<Output = ()> + Send;
}

/// In-process `Storage` backed by a [`DashMap`], matching the
/// teacher's per-key bucket/window registries
/// (`proxy::filter::rate_limit::RateLimiter`).
#[derive(Default)]
pub struct InMemoryStorage {
    limiters: DashMap<String, Limiter>,
    disposed: AtomicBool,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct keys currently tracked.
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}

impl Storage for InMemoryStorage {
    async fn get_or_create(
        &self,
        key: &str,
        factory: &(dyn Fn() -> Limiter + Send + Sync),
    ) -> Result<Limiter, DisposedError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(DisposedError);
        }
        if let Some(existing) = self.limiters.get(key) {
            return Ok(existing.clone());
        }
        let limiter = self
            .limiters
            .entry(key.to_string())
            .or_insert_with(factory)
            .clone();
        Ok(limiter)
    }

    async fn remove(&self, key: &str) {
        if let Some((_, limiter)) = self.limiters.remove(key) {
            limiter.dispose().await;
        }
    }

    async fn remove_where<P>(&self, predicate: P)
    where
        P: Fn(&str, &Limiter) -> bool + Send,
    {
        let matched: Vec<String> = self
            .limiters
            .iter()
            .filter(|entry| predicate(entry.key(), entry.value()))
            .map(|entry| entry.key().clone())
            .collect();
        for key in matched {
            self.remove(&key).await;
        }
    }

    async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(entries = self.limiters.len(), "disposing limiter storage");
        for entry in self.limiters.iter() {
            entry.value().dispose().await;
        }
        self.limiters.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::{ConcurrencyLimiter, ConcurrencyOptions};

    fn factory() -> Limiter {
        ConcurrencyLimiter::new(ConcurrencyOptions { max_concurrency: 1 })
            .unwrap()
            .into()
    }

    #[tokio::test]
    async fn creates_lazily_and_reuses_on_subsequent_lookups() {
        let storage = InMemoryStorage::new();
        let a = storage.get_or_create("k1", &factory).await.unwrap();
        let b = storage.get_or_create("k1", &factory).await.unwrap();
        assert!(a.try_acquire().await.unwrap());
        // Same underlying limiter: second try_acquire on the "other"
        // handle observes the first's consumption.
        assert!(!b.try_acquire().await.unwrap());
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn remove_disposes_and_drops_the_entry() {
        let storage = InMemoryStorage::new();
        let limiter = storage.get_or_create("k1", &factory).await.unwrap();
        storage.remove("k1").await;
        assert!(storage.is_empty());
        assert!(matches!(limiter.try_acquire().await, Err(DisposedError)));
    }

    #[tokio::test]
    async fn remove_where_disposes_only_matching_entries() {
        let storage = InMemoryStorage::new();
        let keep = storage.get_or_create("keep", &factory).await.unwrap();
        let evict = storage.get_or_create("evict-me", &factory).await.unwrap();

        storage.remove_where(|key, _limiter| key.starts_with("evict")).await;

        assert_eq!(storage.len(), 1);
        assert!(matches!(evict.try_acquire().await, Err(DisposedError)));
        assert!(keep.try_acquire().await.unwrap());
    }

    #[tokio::test]
    async fn dispose_is_idempotent_and_rejects_further_creation() {
        let storage = InMemoryStorage::new();
        let limiter = storage.get_or_create("k1", &factory).await.unwrap();
        storage.dispose().await;
        storage.dispose().await;

        assert!(matches!(limiter.try_acquire().await, Err(DisposedError)));
        assert!(matches!(
            storage.get_or_create("k2", &factory).await,
            Err(DisposedError)
        ));
    }
}
